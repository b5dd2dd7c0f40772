//! Timeout wrapper.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Bound `fut` to `duration`, mapping expiry to [`Error::Timeout`].
///
/// # Errors
///
/// [`Error::Timeout`] on expiry; the future's own error otherwise.
pub async fn with_timeout<T, Fut>(duration: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn completes_within_budget() {
        let value = with_timeout(Duration::from_secs(1), async { Ok(5) })
            .await
            .expect("fast future");
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn expiry_maps_to_timeout_error() {
        let err = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .expect_err("sleeps past the budget");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(5)));
    }
}
