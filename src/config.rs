//! # Relay configuration.
//!
//! [`RelayConfig`] centralizes the knobs of the relay runtime: shutdown grace,
//! stream idle detection, per-delivery timeout, lane sizing and the reconnect
//! policy.
//!
//! ## Sentinel values
//! - `idle_timeout = 0s` → no idle detection
//! - `delivery_timeout = 0s` → deliveries are not bounded
//! - `max_connect_attempts = 0` → reconnect forever

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Global configuration for a [`RelayService`](crate::RelayService).
///
/// All fields are public. Prefer the accessors over checking sentinels inline.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Maximum time `stop()` waits for in-flight deliveries to finish.
    ///
    /// Deliveries still pending after this are abandoned.
    pub grace: Duration,

    /// Time without any data from upstream after which the connection is
    /// considered lost and re-established.
    pub idle_timeout: Duration,

    /// Upper bound for a single `deliver` call.
    pub delivery_timeout: Duration,

    /// Pending deliveries buffered per subscriber (min 1).
    ///
    /// When full, the event is dropped for that subscriber only.
    pub lane_capacity: usize,

    /// Capacity of the status broadcast channel (min 1).
    pub status_capacity: usize,

    /// Consecutive failed connect attempts before the source gives up.
    pub max_connect_attempts: u32,

    /// Delay schedule between connect attempts.
    pub backoff: BackoffPolicy,

    /// Uptime after which a dropped connection counts as healthy.
    ///
    /// Shorter-lived connections keep climbing the backoff schedule, so an
    /// upstream that accepts and immediately closes is never reconnected in
    /// a tight loop. Longer-lived ones restart it from the first delay.
    pub stable_after: Duration,

    /// Send the last seen upstream event id when reconnecting.
    pub resume: bool,
}

impl RelayConfig {
    /// Idle threshold as an `Option` (`None` = disabled).
    #[inline]
    pub fn idle_limit(&self) -> Option<Duration> {
        (self.idle_timeout > Duration::ZERO).then_some(self.idle_timeout)
    }

    /// Delivery bound as an `Option` (`None` = unbounded).
    #[inline]
    pub fn delivery_limit(&self) -> Option<Duration> {
        (self.delivery_timeout > Duration::ZERO).then_some(self.delivery_timeout)
    }

    /// Connect attempt bound as an `Option` (`None` = unlimited).
    #[inline]
    pub fn connect_attempt_limit(&self) -> Option<u32> {
        (self.max_connect_attempts > 0).then_some(self.max_connect_attempts)
    }

    /// Lane capacity clamped to a minimum of 1.
    #[inline]
    pub fn lane_capacity_clamped(&self) -> usize {
        self.lane_capacity.max(1)
    }

    /// Status channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn status_capacity_clamped(&self) -> usize {
        self.status_capacity.max(1)
    }
}

impl Default for RelayConfig {
    /// - `grace = 30s`
    /// - `idle_timeout = 90s`
    /// - `delivery_timeout = 30s`
    /// - `lane_capacity = 256`
    /// - `status_capacity = 1024`
    /// - `max_connect_attempts = 0` (unlimited)
    /// - `backoff = BackoffPolicy::default()` (1s..60s, doubling, equal jitter)
    /// - `stable_after = 30s`
    /// - `resume = true`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            delivery_timeout: Duration::from_secs(30),
            lane_capacity: 256,
            status_capacity: 1024,
            max_connect_attempts: 0,
            backoff: BackoffPolicy::default(),
            stable_after: Duration::from_secs(30),
            resume: true,
        }
    }
}
