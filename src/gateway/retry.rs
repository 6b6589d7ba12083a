//! Exponential backoff with jitter, ported from the teacher's
//! `BackoffCalculator` (xorshift64 PRNG, `base * multiplier^attempt` capped,
//! then +/- jitter_factor jitter) and wrapped into a retry loop for
//! fallible async vendor calls.

use anyhow::Result;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
    pub jitter_factor: f64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 200,
            multiplier: 2.0,
            max_ms: 10_000,
            jitter_factor: 0.3,
            max_attempts: 4,
        }
    }
}

pub struct BackoffCalculator {
    config: BackoffConfig,
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(12345)
                | 1,
        }
    }

    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    pub fn next_backoff(&mut self) -> Duration {
        let base = (self.config.base_ms as f64) * self.config.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.max_ms as f64);
        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter).max(self.config.base_ms as f64);
        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Retries `f` up to `config.max_attempts` times with backoff, as long as
/// the error is classified transient by `is_transient`. Non-transient
/// errors return immediately without consuming a retry.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    config: BackoffConfig,
    is_transient: impl Fn(&anyhow::Error) -> bool,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts;
    let mut backoff = BackoffCalculator::new(config);
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if backoff.attempt() + 1 < max_attempts && is_transient(&e) => {
                let wait = backoff.next_backoff();
                warn!(label, attempt = backoff.attempt(), wait_ms = wait.as_millis() as u64, error = %e, "retrying after transient error");
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut calc = BackoffCalculator::new(BackoffConfig {
            base_ms: 100,
            multiplier: 2.0,
            max_ms: 1000,
            jitter_factor: 0.0,
            max_attempts: 10,
        });
        let first = calc.next_backoff();
        let second = calc.next_backoff();
        assert!(first.as_millis() >= 100);
        assert!(second.as_millis() >= first.as_millis());
    }

    #[tokio::test]
    async fn retry_stops_on_non_transient() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(
            "test",
            BackoffConfig::default(),
            |_| false,
            || {
                calls += 1;
                async { Err(anyhow::anyhow!("permanent")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = retry_with_backoff(
            "test",
            BackoffConfig {
                base_ms: 1,
                multiplier: 1.0,
                max_ms: 2,
                jitter_factor: 0.0,
                max_attempts: 5,
            },
            |_| true,
            || {
                calls += 1;
                async move {
                    if calls < 3 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }
}
