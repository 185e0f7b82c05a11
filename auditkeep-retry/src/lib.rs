//! Retry and backoff for scheduled auditkeep maintenance jobs
//!
//! Operations report each failure as transient (worth another attempt) or
//! permanent. Transient failures are retried with exponential backoff until
//! the attempt limit or the backoff's elapsed-time budget runs out.

use backoff::backoff::Backoff;
pub use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Boxed error carried through retries
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: BoxError,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: BoxError,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: BoxError,
    },
}

impl RetryError {
    /// Wrap `err` as transient or permanent according to its classification
    pub fn classify<E>(operation: &'static str, err: E) -> Self
    where
        E: RetryableError + std::error::Error + Send + Sync + 'static,
    {
        if err.is_transient() {
            RetryError::Transient {
                operation,
                source: Box::new(err),
            }
        } else {
            RetryError::Permanent {
                operation,
                source: Box::new(err),
            }
        }
    }

    /// The underlying error
    pub fn source_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            RetryError::MaxRetriesExceeded { source, .. }
            | RetryError::Transient { source, .. }
            | RetryError::Permanent { source, .. } => source.as_ref(),
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Attempt limit plus backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Backoff for maintenance jobs: slow start, long budget
    pub fn maintenance() -> Self {
        Self::new(4, maintenance_backoff_policy())
    }
}

/// Execute an operation with a custom retry policy
///
/// `f` receives the 1-based attempt number. Returning
/// [`RetryError::Permanent`] stops immediately and is passed through.
pub async fn with_custom_backoff<F, Fut, T>(
    op_name: &'static str,
    policy: RetryPolicy,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    let RetryPolicy {
        max_attempts,
        mut backoff,
    } = policy;
    backoff.reset();
    let mut attempt = 1;

    loop {
        debug!(operation = op_name, attempt, "Attempting operation");

        let source = match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = op_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err @ RetryError::Permanent { .. }) => {
                warn!(operation = op_name, attempt, error = %err, "Operation failed permanently");
                return Err(err);
            }
            Err(RetryError::Transient { source, .. })
            | Err(RetryError::MaxRetriesExceeded { source, .. }) => source,
        };

        let delay = if attempt < max_attempts {
            backoff.next_backoff()
        } else {
            None
        };
        let Some(delay) = delay else {
            warn!(operation = op_name, attempt, error = %source, "Giving up on operation");
            return Err(RetryError::MaxRetriesExceeded {
                operation: op_name,
                attempts: attempt,
                source,
            });
        };

        warn!(
            operation = op_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %source,
            "Operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Backoff policy for maintenance stages (a locked database usually clears within minutes)
pub fn maintenance_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(5))
        .with_max_interval(Duration::from_secs(120))
        .with_max_elapsed_time(Some(Duration::from_secs(15 * 60)))
        .with_multiplier(3.0)
        .build()
}

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Error, Debug)]
    #[error("{message}")]
    struct StageError {
        message: &'static str,
        transient: bool,
    }

    impl RetryableError for StageError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn locked() -> StageError {
        StageError {
            message: "database is locked",
            transient: true,
        }
    }

    fn quick_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(10))
                .with_max_elapsed_time(None)
                .build(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_operation() {
        let result = with_custom_backoff("test_op", quick_policy(3), |_attempt| async {
            Ok("success")
        })
        .await;
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result = with_custom_backoff("test_op", quick_policy(5), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(RetryError::classify("test_op", locked()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result: RetryResult<()> = with_custom_backoff("test_op", quick_policy(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(permanent_error!(
                    "test_op",
                    StageError {
                        message: "permission denied",
                        transient: false,
                    }
                ))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_limit() {
        let result: RetryResult<()> = with_custom_backoff("test_op", quick_policy(3), |_| async {
            Err(RetryError::classify("test_op", locked()))
        })
        .await;

        match result {
            Err(RetryError::MaxRetriesExceeded { attempts, source, .. }) => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("database is locked"));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_follows_error() {
        let transient = RetryError::classify("op", locked());
        assert!(matches!(transient, RetryError::Transient { .. }));

        let permanent = RetryError::classify(
            "op",
            StageError {
                message: "missing",
                transient: false,
            },
        );
        assert!(matches!(permanent, RetryError::Permanent { .. }));
        assert!(permanent.source_error().to_string().contains("missing"));
    }

    #[test]
    fn test_policy_has_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, maintenance_backoff_policy()).max_attempts, 1);
        assert_eq!(RetryPolicy::maintenance().max_attempts, 4);
    }
}
