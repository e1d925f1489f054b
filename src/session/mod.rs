//! Contains logic for following the lock state of the interactive session.
//! [GenericLockNotifier] picks the implementation for the current platform, [LockSubscription]
//! ties a subscription to a scope and feeds a [LockFlag] the monitor reads.

#[cfg(target_os = "linux")]
pub mod loginctl;
#[cfg(feature = "win")]
pub mod win;

#[cfg(feature = "win")]
extern crate windows;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use tracing::{error, info, warn};

#[cfg(test)]
use mockall::automock;

/// Receives `true` when the session gets locked and `false` when it is unlocked.
pub type LockCallback = Box<dyn Fn(bool) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Intended to serve as a contract every platform must implement.
#[cfg_attr(test, automock)]
pub trait LockNotifier: Send {
    /// Starts delivering lock transitions to `callback`. Implementations may report the current
    /// state right away.
    fn subscribe(&mut self, callback: LockCallback) -> Result<SubscriptionHandle>;

    fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<()>;
}

/// Serves as a cross-compatible LockNotifier implementation.
pub struct GenericLockNotifier {
    inner: Box<dyn LockNotifier>,
}

impl GenericLockNotifier {
    pub fn new() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsLockNotifier;
                Self {
                    inner: Box::new(WindowsLockNotifier::new()),
                }
            }
            else if #[cfg(target_os = "linux")] {
                use loginctl::LoginctlLockNotifier;
                Self {
                    inner: Box::new(LoginctlLockNotifier::from_env()),
                }
            }
            else {
                Self {
                    inner: Box::new(AlwaysUnlocked::default()),
                }
            }
        }
    }
}

impl Default for GenericLockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LockNotifier for GenericLockNotifier {
    fn subscribe(&mut self, callback: LockCallback) -> Result<SubscriptionHandle> {
        self.inner.subscribe(callback)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<()> {
        self.inner.unsubscribe(handle)
    }
}

/// Used where the platform can't tell whether the session is locked.
#[derive(Default)]
pub struct AlwaysUnlocked {
    next_handle: u64,
}

impl LockNotifier for AlwaysUnlocked {
    fn subscribe(&mut self, callback: LockCallback) -> Result<SubscriptionHandle> {
        callback(false);
        self.next_handle += 1;
        Ok(SubscriptionHandle(self.next_handle))
    }

    fn unsubscribe(&mut self, _handle: SubscriptionHandle) -> Result<()> {
        Ok(())
    }
}

/// Lock state shared between the notifier and the polling loop.
#[derive(Debug, Clone, Default)]
pub struct LockFlag(Arc<AtomicBool>);

impl LockFlag {
    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, locked: bool) {
        self.0.store(locked, Ordering::Release);
    }

    pub fn callback(&self) -> LockCallback {
        let flag = self.clone();
        Box::new(move |locked| {
            info!("Session {}", if locked { "locked" } else { "unlocked" });
            flag.set(locked)
        })
    }
}

/// Keeps a notifier subscribed until dropped.
///
/// When subscribing fails the flag is never written, so the session counts as unlocked.
pub struct LockSubscription {
    notifier: Box<dyn LockNotifier>,
    handle: Option<SubscriptionHandle>,
}

impl LockSubscription {
    pub fn subscribe(mut notifier: Box<dyn LockNotifier>, flag: &LockFlag) -> Self {
        let handle = notifier
            .subscribe(flag.callback())
            .inspect_err(|e| {
                warn!("Lock detection is unavailable, session is treated as unlocked {e:?}")
            })
            .ok();
        Self { notifier, handle }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for LockSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.notifier.unsubscribe(handle) {
                error!("Failed to unsubscribe from lock notifications {e:?}");
            }
        }
    }
}
