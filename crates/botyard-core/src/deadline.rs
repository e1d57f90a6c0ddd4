//! Bounded waits on external collaborators.

use std::future::Future;
use std::time::Duration;

use crate::error::BotError;

/// Await `fut`, failing with [`BotError::Timeout`] if it takes longer than
/// `after`.
///
/// The future is dropped on timeout, so callers must not have advanced any
/// state in anticipation of its result.
pub async fn within<F>(after: Duration, operation: &str, fut: F) -> Result<F::Output, BotError>
where
    F: Future,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| BotError::Timeout {
            operation: operation.to_owned(),
            after,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let out = within(Duration::from_secs(1), "noop", async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_slow_futures() {
        let out = within(
            Duration::from_millis(50),
            "registry list",
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;
        match out {
            Err(BotError::Timeout { operation, after }) => {
                assert_eq!(operation, "registry list");
                assert_eq!(after, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
