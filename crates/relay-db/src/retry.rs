//! Reconnect-and-retry wrapper for store operations.
//!
//! The worker holds its pool for the lifetime of the process. When the
//! database drops the connection under a statement, the operation is retried
//! exactly once against a freshly acquired connection; any other error, and
//! any error on the retry, surfaces to the caller.

use std::future::Future;

use tracing::warn;

/// Is this error a lost/unavailable connection (as opposed to a statement
/// or decoding error)?
fn is_disconnect(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Run `op`, retrying exactly once if the first attempt fails with a
/// connection-level error.
pub async fn with_reconnect<T, F, Fut>(what: &str, op: F) -> Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) if is_disconnect(&e) => {
            warn!(operation = what, error = %e, "connection lost, retrying once");
            op().await
        }
        Err(e) => Err(e),
    }
}
