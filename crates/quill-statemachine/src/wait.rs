use std::time::Duration;

/// How long to wait before attempt `attempt` (1-based) of a failed step.
pub trait WaitStrategy: Send + Sync {
    fn wait_for(&self, attempt: u32) -> Duration;
}

/// `base · 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialWait {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialWait {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl WaitStrategy for ExponentialWait {
    fn wait_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWait(pub Duration);

impl WaitStrategy for FixedWait {
    fn wait_for(&self, _attempt: u32) -> Duration {
        self.0
    }
}
