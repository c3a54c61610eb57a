//! Exponential backoff with jitter for transient external failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Backoff schedule: `base * 2^(attempt-1)`, capped, then jittered by
/// `±jitter` and clamped to the cap again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fractional jitter, e.g. 0.2 for ±20%.
    pub jitter: f64,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(32),
            jitter: 0.2,
            max_retries: 3,
        }
    }
}

impl BackoffPolicy {
    /// No retries at all. Used by tests and one-shot CLI commands.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            cap: Duration::ZERO,
            jitter: 0.0,
            max_retries: 0,
        }
    }

    /// Delay before retry `attempt` (1-based), without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before retry `attempt` (1-based), jittered.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rng.random_range(-spread..=spread);
        nominal.mul_f64(factor).min(self.cap)
    }

    /// Longest total sleep across every retry, jitter included.
    pub fn max_total_delay(&self) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        (1..=self.max_retries)
            .map(|attempt| self.nominal_delay(attempt).mul_f64(1.0 + spread).min(self.cap))
            .sum()
    }

    /// Longest time a retried operation can take when each attempt is
    /// bounded by `attempt_timeout`.
    pub fn worst_case(&self, attempt_timeout: Duration) -> Duration {
        attempt_timeout.saturating_mul(self.max_retries + 1) + self.max_total_delay()
    }
}

/// Run `op`, retrying while `is_transient` holds for the error and retries remain.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &BackoffPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt, &mut rand::rng());
                warn!(
                    target: "docket::retry",
                    op = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
