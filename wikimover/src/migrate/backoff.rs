use std::time::Duration;

use rand::Rng;

use crate::config::MigrationConfig;

/// Delay schedule between status polls of an asynchronous remote task.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl PollBackoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(config.task_poll_base, config.task_poll_max, true)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    /// Doubles per attempt up to `max`. Jitter only ever shortens the wait,
    /// and never below half of it.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
        let delay_ms = if self.jitter && exp > 1 {
            rng.gen_range(exp / 2..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}
