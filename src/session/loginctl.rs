use std::{collections::HashMap, process::Stdio, time::Duration};

use anyhow::{anyhow, bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LockCallback, LockNotifier, SubscriptionHandle};

const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Follows the `LockedHint` systemd-logind keeps for the session. Lock screens set it, so it
/// is polled in a background task and transitions are forwarded to the callback.
pub struct LoginctlLockNotifier {
    session: Option<String>,
    poll_interval: Duration,
    next_handle: u64,
    subscriptions: HashMap<SubscriptionHandle, CancellationToken>,
}

impl LoginctlLockNotifier {
    pub fn new(session: Option<String>, poll_interval: Duration) -> Self {
        Self {
            session,
            poll_interval,
            next_handle: 0,
            subscriptions: HashMap::new(),
        }
    }

    /// Uses the session the process was started in.
    pub fn from_env() -> Self {
        Self::new(std::env::var("XDG_SESSION_ID").ok(), LOCK_POLL_INTERVAL)
    }
}

fn locked_hint_args(session: &str) -> [&str; 5] {
    ["show-session", session, "-p", "LockedHint", "--value"]
}

fn parse_locked_hint(output: &[u8]) -> Result<bool> {
    match String::from_utf8_lossy(output).trim() {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => bail!("Unexpected LockedHint value {other:?}"),
    }
}

fn query_locked(session: &str) -> Result<bool> {
    let output = std::process::Command::new("loginctl")
        .args(locked_hint_args(session))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()?;
    if !output.status.success() {
        bail!("loginctl exited with {}", output.status);
    }
    parse_locked_hint(&output.stdout)
}

async fn query_locked_async(session: &str) -> Result<bool> {
    let output = tokio::process::Command::new("loginctl")
        .args(locked_hint_args(session))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        bail!("loginctl exited with {}", output.status);
    }
    parse_locked_hint(&output.stdout)
}

impl LockNotifier for LoginctlLockNotifier {
    fn subscribe(&mut self, callback: LockCallback) -> Result<SubscriptionHandle> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| anyhow!("XDG_SESSION_ID is not set, can't follow the session"))?;

        // Fails here when logind isn't around, which keeps the monitor in the unlocked mode.
        let mut last = query_locked(&session)?;
        callback(last);
        info!("Following lock state of session {session}");

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => return,
                    _ = tokio::time::sleep(interval) => ()
                }
                match query_locked_async(&session).await {
                    Ok(locked) if locked != last => {
                        debug!("LockedHint changed to {locked}");
                        last = locked;
                        callback(locked);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to query lock state {e:?}"),
                }
            }
        });

        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        self.subscriptions.insert(handle, token);
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<()> {
        let token = self
            .subscriptions
            .remove(&handle)
            .ok_or_else(|| anyhow!("Unknown subscription {handle:?}"))?;
        token.cancel();
        Ok(())
    }
}

impl Drop for LoginctlLockNotifier {
    fn drop(&mut self) {
        for token in self.subscriptions.values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse_locked_hint, LoginctlLockNotifier};
    use crate::session::{LockNotifier, SubscriptionHandle};

    #[test]
    fn test_parse_locked_hint() {
        assert!(parse_locked_hint(b"yes\n").unwrap());
        assert!(!parse_locked_hint(b"no\n").unwrap());
        assert!(parse_locked_hint(b"").is_err());
    }

    #[test]
    fn test_subscribe_without_session_fails() {
        let mut notifier = LoginctlLockNotifier::new(None, Duration::from_secs(1));

        assert!(notifier.subscribe(Box::new(|_| {})).is_err());
        assert!(notifier.unsubscribe(SubscriptionHandle(1)).is_err());
    }
}
