//! Fail-open and retry helpers
//!
//! Durability is best-effort while the process runs: a failed snapshot write
//! is logged and the in-memory state stays authoritative. Use [`fail_open`]
//! for that kind of side effect only, never for anything a caller must see.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Run an operation whose failure must not propagate.
///
/// Logs the error via `tracing::warn!` and returns `None`.
///
/// ```no_run
/// use tally_core::fail_open::fail_open;
/// use tally_core::Result;
///
/// async fn flush() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let flushed = fail_open("snapshot flush", || flush()).await;
///     assert!(flushed.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Retry an operation, sleeping for each entry of `delays` between attempts.
///
/// Makes `delays.len() + 1` attempts in total and returns the last error.
pub async fn retry_with_delays<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    delays: &[Duration],
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = delays.len() + 1;
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if attempt < attempts => {
                let delay = delays[attempt - 1];
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation_name, attempt, attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("{} failed after {} attempts: {}", operation_name, attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TallyError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, TallyError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(TallyError::Persistence("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_error() {
        let mut attempts = 0;
        let result = retry_with_delays(
            "test_op",
            || {
                attempts += 1;
                async move {
                    if attempts < 2 {
                        Err(TallyError::Delivery("connection refused".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            &[Duration::from_millis(1), Duration::from_millis(1)],
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let mut attempts = 0;
        let result = retry_with_delays(
            "test_op",
            || {
                attempts += 1;
                async move { Err::<i32, _>(TallyError::Delivery("down".to_string())) }
            },
            &[Duration::from_millis(1), Duration::from_millis(1)],
        )
        .await;
        assert!(matches!(result, Err(TallyError::Delivery(_))));
        assert_eq!(attempts, 3);
    }
}
