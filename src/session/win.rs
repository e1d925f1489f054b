use std::{
    collections::HashMap,
    sync::mpsc,
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Result};
use tracing::{error, info};
use windows::{
    core::w,
    Win32::{
        Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM},
        System::{
            LibraryLoader::GetModuleHandleW,
            RemoteDesktop::{
                WTSRegisterSessionNotification, WTSUnRegisterSessionNotification,
                NOTIFY_FOR_THIS_SESSION,
            },
        },
        UI::WindowsAndMessaging::{
            CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
            GetWindowLongPtrW, PostMessageW, PostQuitMessage, RegisterClassW, SetWindowLongPtrW,
            TranslateMessage, GWLP_USERDATA, MSG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_CLOSE,
            WM_DESTROY, WM_WTSSESSION_CHANGE, WNDCLASSW,
        },
    },
};

use super::{LockCallback, LockNotifier, SubscriptionHandle};

const WTS_SESSION_LOCK: usize = 0x7;
const WTS_SESSION_UNLOCK: usize = 0x8;

struct MessageWindow {
    /// Raw HWND, kept as an integer so the handle can cross threads.
    hwnd: isize,
    thread: JoinHandle<()>,
}

/// Receives `WM_WTSSESSION_CHANGE` on a hidden window. Each subscription owns a window and a
/// thread pumping its messages.
#[derive(Default)]
pub struct WindowsLockNotifier {
    next_handle: u64,
    windows: HashMap<SubscriptionHandle, MessageWindow>,
}

impl WindowsLockNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockNotifier for WindowsLockNotifier {
    fn subscribe(&mut self, callback: LockCallback) -> Result<SubscriptionHandle> {
        let (ready_sender, ready_receiver) = mpsc::channel::<Result<isize>>();
        let thread = thread::spawn(move || run_message_window(callback, ready_sender));
        let hwnd = ready_receiver
            .recv()
            .map_err(|_| anyhow!("Lock notification thread exited early"))??;
        info!("Registered for session notifications");

        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        self.windows.insert(handle, MessageWindow { hwnd, thread });
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<()> {
        let window = self
            .windows
            .remove(&handle)
            .ok_or_else(|| anyhow!("Unknown subscription {handle:?}"))?;
        unsafe {
            PostMessageW(
                HWND(window.hwnd as *mut _),
                WM_CLOSE,
                WPARAM(0),
                LPARAM(0),
            )?
        };
        window
            .thread
            .join()
            .map_err(|_| anyhow!("Lock notification thread panicked"))
    }
}

fn run_message_window(callback: LockCallback, ready: mpsc::Sender<Result<isize>>) {
    let hwnd = match unsafe { create_window() } {
        Ok(hwnd) => hwnd,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let callback = Box::into_raw(Box::new(callback));
    unsafe {
        SetWindowLongPtrW(hwnd, GWLP_USERDATA, callback as isize);
        if let Err(e) = WTSRegisterSessionNotification(hwnd, NOTIFY_FOR_THIS_SESSION) {
            let _ = DestroyWindow(hwnd);
            drop(Box::from_raw(callback));
            let _ = ready.send(Err(e.into()));
            return;
        }
    }
    let _ = ready.send(Ok(hwnd.0 as isize));

    let mut message = MSG::default();
    unsafe {
        while GetMessageW(&mut message, None, 0, 0).as_bool() {
            let _ = TranslateMessage(&message);
            DispatchMessageW(&message);
        }
        drop(Box::from_raw(callback));
    }
}

unsafe fn create_window() -> Result<HWND> {
    unsafe {
        let instance = GetModuleHandleW(None)?;
        let class_name = w!("OnlineMonitorLockWindow");
        let class = WNDCLASSW {
            lpfnWndProc: Some(window_procedure),
            hInstance: HINSTANCE(instance.0),
            lpszClassName: class_name,
            ..Default::default()
        };
        // Registering twice fails harmlessly, the class from the first subscription is reused.
        RegisterClassW(&class);
        Ok(CreateWindowExW(
            WINDOW_EX_STYLE(0),
            class_name,
            w!(""),
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            None,
            None,
            HINSTANCE(instance.0),
            None,
        )?)
    }
}

extern "system" fn window_procedure(
    hwnd: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    unsafe {
        match message {
            WM_WTSSESSION_CHANGE => {
                let callback = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *const LockCallback;
                if let Some(callback) = callback.as_ref() {
                    match wparam.0 {
                        WTS_SESSION_LOCK => callback(true),
                        WTS_SESSION_UNLOCK => callback(false),
                        _ => {}
                    }
                }
                LRESULT(0)
            }
            WM_CLOSE => {
                if let Err(e) = WTSUnRegisterSessionNotification(hwnd) {
                    error!("Failed to unregister session notifications {e:?}");
                }
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0);
                let _ = DestroyWindow(hwnd);
                LRESULT(0)
            }
            WM_DESTROY => {
                PostQuitMessage(0);
                LRESULT(0)
            }
            _ => DefWindowProcW(hwnd, message, wparam, lparam),
        }
    }
}
