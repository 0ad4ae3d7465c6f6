//! Bounded exponential backoff for reconnect attempts.

use std::time::Duration;

use crate::error::LiveError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// How many reconnect attempts a session gets and how long to wait before each.
///
/// Attempts are numbered from 1. The delay before attempt `n` is
/// `min(max_delay, initial_delay * 2^(n-1))`, spread by up to
/// `±jitter_factor` of that value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl ReconnectPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Result<Self, LiveError> {
        if max_attempts == 0 {
            return Err(LiveError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if initial_delay > max_delay {
            return Err(LiveError::InvalidConfig(format!(
                "initial_delay ({initial_delay:?}) exceeds max_delay ({max_delay:?})"
            )));
        }
        if !(0.0..=1.0).contains(&jitter_factor) {
            return Err(LiveError::InvalidConfig(format!(
                "jitter_factor must be within 0.0..=1.0, got {jitter_factor}"
            )));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            jitter_factor,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Jitter-free delay before `attempt`, or `None` when the attempt is out of range.
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exponent = (attempt - 1).min(31);
        let delay = self
            .initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// Delay before `attempt` with random jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let spread = rand::random::<f64>() * 2.0 - 1.0;
        self.delay_with_spread(attempt, spread)
    }

    /// `spread` is clamped to `[-1, 1]` and scaled by the jitter factor.
    fn delay_with_spread(&self, attempt: u32, spread: f64) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        let factor = 1.0 + spread.clamp(-1.0, 1.0) * self.jitter_factor;
        let jittered = base.as_secs_f64() * factor.max(0.0);
        Some(Duration::try_from_secs_f64(jittered).unwrap_or(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}
