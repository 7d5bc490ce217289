//! Bounded exponential backoff for transient provider failures.
//!
//! Only transport-level failures (connection errors, timeouts, rate limits,
//! 5xx responses) are retried here. Domain-level rejections such as a low
//! review score are routed by the orchestration graph, never by this layer.

use std::future::Future;
use std::time::Duration;

use crate::error::{ImageError, LlmError};

/// Default base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Upper bound for a single backoff delay in milliseconds.
const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Errors that can tell whether retrying the same call may succeed.
pub trait TransientError {
    /// Returns true if the failure is transient and the call may be retried.
    fn is_transient(&self) -> bool;
}

impl TransientError for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(msg) => is_transport_message(msg),
            LlmError::Timeout { .. } | LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

impl TransientError for ImageError {
    fn is_transient(&self) -> bool {
        match self {
            ImageError::RequestFailed(msg) => is_transport_message(msg),
            ImageError::Timeout { .. } | ImageError::RateLimited(_) => true,
            ImageError::ApiError { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

fn is_transport_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("temporarily")
        || lower.contains("error sending request")
}

/// Retry policy applied by provider clients around each network call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each subsequent one.
    pub base_delay: Duration,
    /// Ceiling for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given retry count and default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Sets the base backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum backoff delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait before retry number `retry` (1-based): 1s, 2s, 4s, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `operation`, retrying transient failures with exponential backoff.
    ///
    /// Non-transient errors are returned immediately. When every attempt fails
    /// the last transient error is returned.
    pub async fn execute<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransientError + std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries).with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_llm_error_transience() {
        assert!(LlmError::RateLimited("slow down".to_string()).is_transient());
        assert!(LlmError::Timeout { seconds: 60 }.is_transient());
        assert!(LlmError::RequestFailed("Connection refused".to_string()).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "unavailable".to_string()
        }
        .is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: "bad request".to_string()
        }
        .is_transient());
        assert!(!LlmError::ParseError("bad json".to_string()).is_transient());
        assert!(!LlmError::MissingApiKey("DEEPSEEK_API_KEY".to_string()).is_transient());
    }

    #[test]
    fn test_image_error_transience() {
        assert!(ImageError::Timeout { seconds: 60 }.is_transient());
        assert!(!ImageError::NoImageData.is_transient());
    }

    #[tokio::test]
    async fn test_execute_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<&str, LlmError> = fast_policy(3)
            .execute("test", || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(LlmError::RateLimited("busy".to_string()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.expect("should succeed on third attempt"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), LlmError> = fast_policy(3)
            .execute("test", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::ApiError {
                    code: 401,
                    message: "unauthorized".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(LlmError::ApiError { code: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_surfaces_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), LlmError> = fast_policy(2)
            .execute("test", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Timeout { seconds: 1 })
            })
            .await;

        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
