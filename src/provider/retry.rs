use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{EngineError, EngineResult};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::shutdown::Shutdown;

/// Retry configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 4000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    pub fn with_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// Exponential backoff with ±jitter_factor jitter.
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((clamped + jitter).max(0.0) as u64)
    }
}

/// Retry a fallible async operation with exponential backoff.
///
/// Only recoverable errors are retried. A shutdown during backoff returns the
/// last error immediately.
pub async fn retry_async<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    shutdown: &mut Shutdown,
    mut operation: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        if attempt >= config.max_retries || !err.is_recoverable() {
            return Err(err);
        }
        let delay = config.delay_for_attempt(attempt);
        log(
            Level::Warn,
            Domain::Market,
            "retry",
            obj(&[
                ("operation", v_str(operation_name)),
                ("attempt", v_num((attempt + 1) as f64)),
                ("max_attempts", v_num((config.max_retries + 1) as f64)),
                ("delay_ms", v_num(delay.as_millis() as f64)),
                ("error", v_str(&err.to_string())),
            ]),
        );
        if !shutdown.sleep(delay).await {
            return Err(err);
        }
        attempt += 1;
    }
}

/// Status codes worth another attempt.
pub fn is_retryable_http_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Describe a reqwest failure as a data outage.
pub fn describe_http_error(err: &reqwest::Error) -> EngineError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_decode() {
        "decode"
    } else {
        "request"
    };
    EngineError::DataUnavailable(format!("{} error: {}", kind, err))
}
