//! Exponential reconnect backoff with multiplicative jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::ClientError;

/// Reconnect delay policy shared by both transport roles.
///
/// The delay before attempt `n` is `min(base_delay * 2^n, max_delay)` plus a
/// uniform jitter in `[0, delay * jitter_factor]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Ceiling applied before jitter.
    pub max_delay: Duration,
    /// Fraction of the capped delay added as random jitter (0.0-1.0).
    pub jitter_factor: f64,
    /// Stop scheduling reconnects after this many attempts (`None` = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2_500),
            max_delay: Duration::from_millis(4_500),
            jitter_factor: 0.5,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Checks the policy for values that would break the delay formula.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if a delay is zero, the ceiling is
    /// below the base, or the jitter factor is outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_delay.is_zero() {
            return Err(ClientError::Config(
                "reconnect base delay must be > 0".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ClientError::Config(
                "reconnect max delay must be >= base delay".to_string(),
            ));
        }
        if !self.jitter_factor.is_finite() || !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ClientError::Config(
                "reconnect jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the capped delay for `attempt`, before jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Returns the jittered delay for `attempt`.
    #[must_use]
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.base_delay_for(attempt);
        let jitter = delay.as_secs_f64() * self.jitter_factor;
        if jitter <= 0.0 {
            return delay;
        }
        delay + Duration::from_secs_f64(rng.random_range(0.0..=jitter))
    }

    /// Returns `true` if no further reconnect should be scheduled after
    /// `attempts` failures.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
