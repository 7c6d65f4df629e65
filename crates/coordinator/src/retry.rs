//! Deadline-bounded retry with multiplicative backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use grantcraft_settings::TimingSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Wait after the first failure
    pub initial: Duration,
    /// Each later wait is the previous one times this
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            factor: 1.5,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(timing: &TimingSettings) -> Self {
        Self {
            initial: timing.retry_initial(),
            factor: timing.retry_factor,
        }
    }

    /// Run `op` until it succeeds or `deadline` passes; returns the last error
    /// at the deadline.
    pub async fn retry_until<T, E, F, Fut>(
        &self,
        deadline: Instant,
        label: &str,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut wait = self.initial;
        let mut attempt = 1u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(err);
            }
            debug!("{} attempt {} failed: {}; retrying in {:?}", label, attempt, err, wait);

            if now + wait >= deadline {
                tokio::time::sleep_until(deadline).await;
                return Err(err);
            }
            tokio::time::sleep(wait).await;
            wait = wait.mul_f64(self.factor);
            attempt += 1;
        }
    }
}
