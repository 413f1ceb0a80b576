//! Exponential backoff retry executor.

use crate::error::{BundleEngineError, Result};
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Retry policy. Defaults: 3 attempts, 1s initial delay, 2x multiplier,
/// 30s cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Emitted between attempts while the executor is sleeping.
#[derive(Debug, Clone)]
pub struct BackingOff {
    pub retry_number: u32,
    pub delay: Duration,
    pub next_retry_at: SystemTime,
    pub error: String,
}

/// Run `operation` up to `config.max_attempts + 1` times total, applying
/// exponential backoff between recoverable failures. `on_backoff` is
/// invoked once per retry, before the sleep.
pub async fn run_with_retry<Op, Fut, T, OnBackoff>(
    config: RetryConfig,
    mut operation: Op,
    mut on_backoff: OnBackoff,
) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    OnBackoff: FnMut(BackingOff),
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_recoverable() {
                    return Err(err);
                }
                if attempt >= config.max_attempts {
                    return Err(err);
                }
                let delay = backoff_delay(&config, attempt);
                on_backoff(BackingOff {
                    retry_number: attempt + 1,
                    delay,
                    next_retry_at: SystemTime::now() + delay,
                    error: err.to_string(),
                });
                tracing::warn!(
                    retry_number = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let scaled = config.initial_delay.as_secs_f64() * config.multiplier.powi(attempt as i32);
    Duration::from_secs_f64(scaled).min(config.max_delay)
}
