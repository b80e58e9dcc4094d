//! Bounded retry of optimistic transactions.

use std::future::Future;
use std::time::Duration;

use domains::error::{AppError, Result};
use domains::ports::{DocumentStore, Transaction};
use rand::Rng;
use tracing::{debug, warn};

/// How often and how patiently a conflicting transaction is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Retries immediately; mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff with equal jitter: a random delay in `[d/2, d]`
    /// where `d = base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay);
        let ceiling_us = u64::try_from(ceiling.as_micros()).unwrap_or(u64::MAX);
        let jittered = rand::thread_rng().gen_range(ceiling_us / 2..=ceiling_us);
        Duration::from_micros(jittered)
    }

    /// Runs `body` in a fresh transaction until it succeeds, fails with
    /// anything other than a conflict, or runs out of attempts.
    ///
    /// `body` owns the transaction and is responsible for committing it.
    pub async fn run<T, F, Fut>(
        &self,
        store: &dyn DocumentStore,
        operation: &'static str,
        mut body: F,
    ) -> Result<T>
    where
        F: FnMut(Box<dyn Transaction>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let tx = store.begin().await?;
            match body(tx).await {
                Err(AppError::WriteConflict { .. }) if attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    debug!(operation, attempt, ?delay, "transaction conflict, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AppError::WriteConflict { .. }) => {
                    warn!(operation, attempts = attempt, "transaction retries exhausted");
                    return Err(AppError::WriteConflict { attempts: attempt });
                }
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::ports::{MockDocumentStore, MockTransaction, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn store_with_commit_results(conflicts: u32) -> (MockDocumentStore, Arc<AtomicU32>) {
        let begun = Arc::new(AtomicU32::new(0));
        let counter = begun.clone();
        let mut store = MockDocumentStore::new();
        store.expect_begin().returning(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let mut tx = MockTransaction::new();
            tx.expect_commit().returning(move || {
                if n < conflicts {
                    Err(StoreError::Conflict("discussions/t1".into()))
                } else {
                    Ok(())
                }
            });
            Ok(Box::new(tx) as Box<dyn Transaction>)
        });
        (store, begun)
    }

    #[tokio::test]
    async fn conflicts_are_retried_transparently() {
        let (store, begun) = store_with_commit_results(2);
        let policy = RetryPolicy::immediate(5);

        let result = policy
            .run(&store, "test", |mut tx| async move {
                tx.commit().await?;
                Ok(42)
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(begun.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_write_conflict() {
        let (store, begun) = store_with_commit_results(u32::MAX);
        let policy = RetryPolicy::immediate(3);

        let result: Result<()> = policy
            .run(&store, "test", |mut tx| async move {
                tx.commit().await?;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(AppError::WriteConflict { attempts: 3 }));
        assert_eq!(begun.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let (store, begun) = store_with_commit_results(0);
        let policy = RetryPolicy::immediate(5);

        let result: Result<()> = policy
            .run(&store, "test", |_tx| async move {
                Err(AppError::ValidationError("nope".into()))
            })
            .await;

        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(begun.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(5) && first <= Duration::from_millis(10));
        let late = policy.backoff(9);
        assert!(late >= Duration::from_millis(25) && late <= Duration::from_millis(50));
        assert_eq!(RetryPolicy::immediate(3).backoff(4), Duration::ZERO);
    }
}
