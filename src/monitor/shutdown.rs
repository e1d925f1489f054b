use std::{path::Path, time::Duration};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const STOP_REQUEST_FILE_NAME: &str = "stop.request";

const STOP_REQUEST_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Detects signals sent to the process and stop requests left in the application directory.
/// Returns once shutdown was requested by any of them, or when somebody else cancelled.
///
/// On Windows detached processes can't detect signals sent to them, the stop request file is
/// what `online-monitor stop` relies on there.
pub async fn detect_shutdown(cancelation: CancellationToken, stop_request: &Path) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C");
        },
        _ = terminate() => {
            info!("Received termination signal");
        },
        _ = watch_stop_request(stop_request) => {
            info!("Found stop request {stop_request:?}");
            if let Err(e) = tokio::fs::remove_file(stop_request).await {
                warn!("Failed to remove stop request {e:?}");
            }
        },
        _ = cancelation.cancelled() => {
            return;
        },
    };
    cancelation.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!("Can't listen for SIGTERM {e:?}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn watch_stop_request(path: &Path) {
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return;
        }
        tokio::time::sleep(STOP_REQUEST_CHECK_INTERVAL).await;
    }
}

/// Asks a running monitor to stop through the application directory.
pub async fn request_stop(stop_request: &Path) -> std::io::Result<()> {
    tokio::fs::write(stop_request, b"").await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use super::{detect_shutdown, request_stop};

    #[tokio::test]
    async fn test_stop_request_cancels_and_is_consumed() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("stop.request");
        let token = CancellationToken::new();

        let (_, written) = tokio::join!(detect_shutdown(token.clone(), &path), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            request_stop(&path).await
        });
        written?;

        assert!(token.is_cancelled());
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_returns_when_cancelled_elsewhere() -> Result<()> {
        let dir = tempdir()?;
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(
            Duration::from_secs(5),
            detect_shutdown(token, &dir.path().join("stop.request")),
        )
        .await?;
        Ok(())
    }
}
