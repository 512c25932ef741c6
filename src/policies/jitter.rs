//! # Jitter for reconnect delays.
//!
//! [`JitterPolicy`] randomizes reconnect delays so that many relays pointed at the
//! same upstream do not reconnect in lockstep after an upstream restart.
//!
//! - [`JitterPolicy::None`]  exact delay
//! - [`JitterPolicy::Full`]  uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + uniform[0, delay/2]`

use rand::Rng;
use std::time::Duration;

/// Randomization applied on top of a computed backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No randomization. Predictable, useful in tests.
    None,

    /// Uniform delay in `[0, delay]`.
    ///
    /// Spreads load the most, but may reconnect almost immediately.
    Full,

    /// Half the delay plus a uniform share of the other half.
    ///
    /// Never waits less than `delay/2`.
    #[default]
    Equal,
}

impl JitterPolicy {
    /// Applies the policy to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return delay;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 { 0 } else { rng.random_range(0..=half) };
                Duration::from_millis(half + extra)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn zero_delay_stays_zero() {
        for p in [JitterPolicy::None, JitterPolicy::Full, JitterPolicy::Equal] {
            assert_eq!(p.apply(Duration::ZERO), Duration::ZERO);
        }
    }

    #[test]
    fn full_stays_within_delay() {
        let d = Duration::from_secs(2);
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(d) <= d);
        }
    }

    #[test]
    fn equal_keeps_lower_half() {
        let d = Duration::from_secs(2);
        for _ in 0..200 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_secs(1), "{j:?} below half");
            assert!(j <= d, "{j:?} above delay");
        }
    }
}
