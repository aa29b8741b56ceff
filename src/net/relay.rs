//! Bidirectional relay.
//!
//! Copies bytes between two connected streams until either direction
//! finishes. The first direction to complete half-closes its write side
//! and bounds the surviving direction with a grace deadline, so shutdown
//! never waits on a peer that will not speak again. Errors are swallowed;
//! the relay is best-effort and the caller owns both streams.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// How long the opposite direction may keep draining after the first
/// direction completes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Relay bytes between `left` and `right` in both directions.
///
/// Returns once both directions have completed, or once the grace
/// deadline after the first completion has passed.
pub async fn relay<L, R>(left: L, right: R)
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut left_read, mut left_write) = tokio::io::split(left);
    let (mut right_read, mut right_write) = tokio::io::split(right);

    let left_to_right = async {
        let copied = tokio::io::copy(&mut left_read, &mut right_write).await;
        let _ = right_write.shutdown().await;
        copied
    };
    let right_to_left = async {
        let copied = tokio::io::copy(&mut right_read, &mut left_write).await;
        let _ = left_write.shutdown().await;
        copied
    };

    tokio::pin!(left_to_right);
    tokio::pin!(right_to_left);

    tokio::select! {
        result = &mut left_to_right => {
            log_direction("left->right", result);
            if let Ok(result) = tokio::time::timeout(SHUTDOWN_GRACE, &mut right_to_left).await {
                log_direction("right->left", result);
            }
        }
        result = &mut right_to_left => {
            log_direction("right->left", result);
            if let Ok(result) = tokio::time::timeout(SHUTDOWN_GRACE, &mut left_to_right).await {
                log_direction("left->right", result);
            }
        }
    }
}

fn log_direction(name: &str, result: std::io::Result<u64>) {
    match result {
        Ok(bytes) => debug!("{} finished: {} bytes", name, bytes),
        Err(e) => debug!("{} error: {}", name, e),
    }
}
