//! Exponential backoff with jitter for transient backend failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Random spread applied to each delay (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy without jitter, for deterministic schedules.
    pub fn fixed(base_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            multiplier,
            jitter_factor: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = (self.base_delay_ms as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay_ms as f64);

        let jitter = if self.jitter_factor > 0.0 {
            (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor
        } else {
            0.0
        };
        let jittered = (delay_ms * (1.0 + jitter)).clamp(0.0, self.max_delay_ms as f64);

        Duration::from_millis(jittered as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.multiplier < 1.0 {
            return Err("retry.multiplier must be >= 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("retry.jitter_factor must be within 0.0..=1.0".into());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("retry.max_delay_ms must be >= retry.base_delay_ms".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy::fixed(100, 1_000, 2.0);
        let delays: Vec<u64> = (0..6).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 1.0,
            jitter_factor: 0.2,
        };
        for _ in 0..100 {
            let ms = policy.delay_for(0).as_millis() as u64;
            assert!((800..=1_200).contains(&ms), "{ms} out of range");
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::fixed(100, 2_000, 2.0);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(2_000));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(RetryPolicy::fixed(100, 50, 2.0).validate().is_err());
        assert!(RetryPolicy::fixed(100, 500, 0.5).validate().is_err());
        let mut policy = RetryPolicy::default();
        policy.jitter_factor = 1.5;
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }
}
