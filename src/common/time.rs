use std::time::{Duration, Instant};

pub struct Timeout {
    deadline: Instant,
}

impl Timeout {
    pub fn new(timeout_secs: u64) -> Self {
        Self::after(Duration::from_secs(timeout_secs))
    }

    pub fn after(delay: Duration) -> Self {
        Self {
            deadline: Instant::now() + delay,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ... for at most
/// `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempts are used up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let shift = (attempt - 1).min(16);
        Some(self.base.saturating_mul(1u32 << shift))
    }
}
