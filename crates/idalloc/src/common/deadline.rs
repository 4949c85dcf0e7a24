use crate::{Error, Result};
use core::future::Future;
use core::time::Duration;

/// Runs a storage call under a fixed deadline.
///
/// An elapsed deadline is reported as [`Error::Transient`] so it is treated as
/// a failure of this one operation, never of the process.
pub async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::transient(format!(
            "{what} timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}
