use std::future::Future;
use std::time::Duration;
use tracing::warn;
use volplane_core::{Result, VolumeError};

/// Run `fut`, failing with `Timeout` if it has not finished after `after`
///
/// The future is dropped on expiry. Callers write the volume record only
/// after the last await inside `fut`; when the side effect may still have
/// landed, they check the OS state and write the record if it did.
pub async fn with_deadline<T, F>(operation: &str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?after, "Operation exceeded its deadline");
            Err(VolumeError::timeout(operation, after))
        }
    }
}
