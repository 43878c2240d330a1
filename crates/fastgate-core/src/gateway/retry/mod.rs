//! Bounded retry with exponential backoff and jitter.
//!
//! Wraps a single logical upstream call. Non-retryable errors abort
//! immediately without consuming further attempts; a fast-fail rejection from
//! an open circuit is terminal for the whole loop, so an already-open circuit
//! is never hammered from inside one retry loop.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use fastgate_types::config::RetryConfig;
use fastgate_types::error::GatewayError;

#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff before attempt `attempt + 1`: `min(base * 2^attempt, cap) ± jitter`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.config.cap_delay_ms);
        let jittered = if self.config.jitter_ms > 0 {
            let span = self.config.jitter_ms as i64;
            let offset = rand::thread_rng().gen_range(-span..=span);
            base.saturating_add_signed(offset)
        } else {
            base
        };
        Duration::from_millis(jittered)
    }

    /// Run `op` up to `max_attempts` times.
    ///
    /// `op` receives the zero-based attempt number. Retryability is decided by
    /// [`GatewayError::is_retryable`]; exhaustion wraps the last cause.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    debug!(
                        attempt,
                        code = err.error_code(),
                        "non-retryable error, aborting retry loop"
                    );
                    return Err(err);
                },
                Err(err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(GatewayError::RetryExhausted {
                            attempts: max_attempts,
                            last_cause: Box::new(err),
                        });
                    }
                    let delay = self.backoff_delay(attempt - 1);
                    info!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        code = err.error_code(),
                        "retrying upstream call after backoff"
                    );
                    sleep(delay).await;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            cap_delay_ms: 4,
            jitter_ms: 0,
        })
    }

    #[tokio::test]
    async fn test_never_exceeds_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result: Result<(), _> = policy(3)
            .execute(|_| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::UpstreamTransport { message: "reset".into() })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            GatewayError::RetryExhausted { attempts, last_cause } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_cause.error_code(), "upstream_transport");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result: Result<(), _> = policy(5)
            .execute(|_| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::InvalidRequest { message: "bad payload".into() })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_circuit_open_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result: Result<(), _> = policy(5)
            .execute(|_| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::CircuitOpenRejected {
                        target: "t".into(),
                        retry_after_ms: 50,
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().error_code(), "circuit_open");
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let result = policy(3)
            .execute(|attempt| async move {
                if attempt < 2 {
                    Err(GatewayError::IncompleteStream)
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            base_delay_ms: 100,
            cap_delay_ms: 400,
            jitter_ms: 0,
        });

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(6), Duration::from_millis(400));
    }
}
