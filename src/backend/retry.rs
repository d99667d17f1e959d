//! Error classification and bounded retry for backend invocations.
//!
//! [`classify`] sorts a [`BackendError`] into one of four classes; only
//! [`ErrorClass::Transient`] errors are retried. [`RetryPolicy`] wraps a
//! single logical invocation with exponential backoff between attempts and
//! surfaces the last error unchanged once attempts are exhausted.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::BackendError;

/// Backoff multiplier applied between consecutive retry waits.
const BACKOFF_MULTIPLIER: u32 = 2;

/// Classification of a backend error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or invalid arguments; surfaced immediately.
    Validation,
    /// Quota or rate limit exhausted; surfaced immediately.
    Quota,
    /// Unavailability, timeouts, connection resets; retried.
    Transient,
    /// Anything else; surfaced immediately.
    Unknown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "validation"),
            ErrorClass::Quota => write!(f, "quota"),
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classifies a backend error by its kind, status code, or message.
pub fn classify(error: &BackendError) -> ErrorClass {
    match error {
        BackendError::InvalidRequest(_) => ErrorClass::Validation,
        BackendError::QuotaExceeded(_) => ErrorClass::Quota,
        BackendError::Unavailable(_) | BackendError::Timeout(_) => ErrorClass::Transient,
        BackendError::Api { code, .. } => match code {
            429 => ErrorClass::Quota,
            400 | 422 => ErrorClass::Validation,
            code if *code >= 500 => ErrorClass::Transient,
            _ => ErrorClass::Unknown,
        },
        BackendError::Other(message) => classify_message(message),
    }
}

/// Pattern-matches an untyped error message.
fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if lower.contains("quota") || lower.contains("rate limit") {
        ErrorClass::Quota
    } else if lower.contains("invalid") || lower.contains("malformed") {
        ErrorClass::Validation
    } else if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("unavailable")
        || lower.contains("connection")
        || lower.contains("reset")
        || lower.contains("temporarily")
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    }
}

/// Bounded exponential-backoff retry around one backend invocation.
///
/// The policy is synchronous per call: attempts for the same logical task run
/// one after another, never pipelined.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first.
    max_attempts: u32,
    /// Wait before the first retry.
    min_wait: Duration,
    /// Ceiling for the backoff wait.
    max_wait: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` total invocations.
    ///
    /// A `max_attempts` of zero is treated as one: the operation always runs
    /// at least once.
    pub fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_wait,
            max_wait: max_wait.max(min_wait),
        }
    }

    /// Creates a policy from the retry fields of a [`crate::config::ForgeConfig`].
    pub fn from_config(config: &crate::config::ForgeConfig) -> Self {
        Self::new(
            config.retry_attempts,
            config.retry_min_wait,
            config.retry_max_wait,
        )
    }

    /// Returns the total number of invocations this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `operation`, retrying transient failures up to the attempt limit.
    ///
    /// Validation, quota, and unknown errors are returned after a single
    /// invocation. Once attempts are exhausted the last transient error
    /// propagates as-is.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut wait = self.min_wait;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let class = classify(&err);
                    if class != ErrorClass::Transient {
                        debug!(class = %class, error = %err, "non-retryable backend error");
                        return Err(err);
                    }

                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "transient backend error"
                    );
                    last_error = Some(err);

                    if attempt < self.max_attempts {
                        tokio::time::sleep(wait).await;
                        wait = (wait * BACKOFF_MULTIPLIER).min(self.max_wait);
                    }
                }
            }
        }

        // max_attempts >= 1, so at least one error was recorded.
        Err(last_error
            .unwrap_or_else(|| BackendError::Other("retry attempts exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_classify_variants() {
        assert_eq!(
            classify(&BackendError::InvalidRequest("bad".into())),
            ErrorClass::Validation
        );
        assert_eq!(
            classify(&BackendError::QuotaExceeded("daily limit".into())),
            ErrorClass::Quota
        );
        assert_eq!(
            classify(&BackendError::Unavailable("refused".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&BackendError::Timeout("30s".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_classify_api_codes() {
        let quota = BackendError::Api {
            code: 429,
            message: "slow down".into(),
        };
        assert_eq!(classify(&quota), ErrorClass::Quota);

        let validation = BackendError::Api {
            code: 400,
            message: "bad field".into(),
        };
        assert_eq!(classify(&validation), ErrorClass::Validation);

        let server = BackendError::Api {
            code: 503,
            message: "overloaded".into(),
        };
        assert_eq!(classify(&server), ErrorClass::Transient);

        let odd = BackendError::Api {
            code: 418,
            message: "teapot".into(),
        };
        assert_eq!(classify(&odd), ErrorClass::Unknown);
    }

    #[test]
    fn test_classify_message_patterns() {
        assert_eq!(
            classify(&BackendError::Other("connection reset by peer".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&BackendError::Other("Quota exceeded for project".into())),
            ErrorClass::Quota
        );
        assert_eq!(
            classify(&BackendError::Other("malformed payload".into())),
            ErrorClass::Validation
        );
        assert_eq!(
            classify(&BackendError::Other("something odd happened".into())),
            ErrorClass::Unknown
        );
    }

    #[tokio::test]
    async fn test_retry_ceiling_on_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = fast_policy(3)
            .run(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Unavailable("down".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result.unwrap_err(), BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_validation_error_invokes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = fast_policy(5)
            .run(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::InvalidRequest("empty text".into()))
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            BackendError::InvalidRequest(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_quota_error_invokes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = fast_policy(5)
            .run(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::QuotaExceeded("limit reached".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = fast_policy(3)
            .run(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 3 {
                        Err(BackendError::Timeout("slow".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_immediate_success_invokes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = fast_policy(3)
            .run(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }
}
