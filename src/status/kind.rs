//! # Relay status notifications.
//!
//! [`StatusKind`] classifies what the relay reports about itself:
//! - **Upstream**: connecting, connected, degraded (backing off), lost, closed
//! - **Per-message / per-event**: malformed message skipped, render failure
//! - **Per-subscriber**: delivery failure, lane overflow
//! - **Lifecycle**: started, stop requested, stopped within grace, grace exceeded
//!
//! Each [`Status`] carries a process-wide monotonic `seq` and optional metadata
//! filled in depending on the kind.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use eventrelay::{Status, StatusKind};
//!
//! let st = Status::new(StatusKind::Degraded)
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(4))
//!     .with_reason("connection refused");
//!
//! assert_eq!(st.kind, StatusKind::Degraded);
//! assert_eq!(st.delay_ms, Some(4000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static STATUS_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of relay statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    // === Upstream ===
    /// A connection attempt is starting.
    ///
    /// Sets: `attempt`
    Connecting,

    /// The upstream connection is established and streaming.
    ///
    /// Sets: `attempt`
    Connected,

    /// A connect attempt failed; the next one is scheduled.
    ///
    /// Sets: `attempt`, `delay_ms`, `reason`
    Degraded,

    /// An established connection dropped (read error, server close, idle).
    ///
    /// Sets: `reason`; `delay_ms` when the reconnect is scheduled here rather
    /// than by a following `Degraded`
    ConnectionLost,

    /// The source was closed and will not reconnect.
    SourceClosed,

    /// The connect attempt bound was reached; the source terminated.
    ///
    /// Sets: `attempt`, `reason`
    SourceExhausted,

    // === Per message / per event ===
    /// An upstream message could not be decoded and was skipped.
    ///
    /// Sets: `reason`
    MalformedSkipped,

    /// An event could not be rendered and was skipped for everyone.
    ///
    /// Sets: `event_seq`, `reason`
    RenderFailed,

    // === Per subscriber ===
    /// A delivery to one subscriber failed.
    ///
    /// Sets: `subscriber`, `event_seq`, `reason`
    DeliveryFailed,

    /// A subscriber lane was full or closed; the event was dropped for it.
    ///
    /// Sets: `subscriber`, `event_seq`, `reason`
    LaneOverflow,

    // === Lifecycle ===
    /// The ingestion loop was started.
    Started,

    /// `stop()` was called on a running relay.
    StopRequested,

    /// Everything drained within the grace period.
    StoppedWithinGrace,

    /// Grace elapsed with deliveries still pending.
    ///
    /// Sets: `reason` (abandoned subscribers)
    GraceExceeded,
}

/// A relay status with optional metadata.
#[derive(Debug, Clone)]
pub struct Status {
    /// Process-wide monotonic sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Classification.
    pub kind: StatusKind,
    /// Subscriber the status is about, rendered with `Debug`.
    pub subscriber: Option<Arc<str>>,
    /// Sequence number of the upstream event involved.
    pub event_seq: Option<u64>,
    /// Connect attempt number (1-based, consecutive failures).
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: Option<u64>,
    /// Human-readable detail.
    pub reason: Option<Arc<str>>,
}

impl Status {
    /// Creates a status of the given kind stamped with the current time.
    pub fn new(kind: StatusKind) -> Self {
        Self {
            seq: STATUS_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            subscriber: None,
            event_seq: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches the subscriber id, already rendered for display.
    #[inline]
    pub fn with_subscriber(mut self, subscriber: impl Into<Arc<str>>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    /// Attaches the upstream event's sequence number.
    #[inline]
    pub fn with_event_seq(mut self, seq: u64) -> Self {
        self.event_seq = Some(seq);
        self
    }

    /// Attaches the connect attempt number.
    #[inline]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches a human-readable detail.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// True for statuses that describe a contained failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            StatusKind::Degraded
                | StatusKind::ConnectionLost
                | StatusKind::SourceExhausted
                | StatusKind::MalformedSkipped
                | StatusKind::RenderFailed
                | StatusKind::DeliveryFailed
                | StatusKind::LaneOverflow
                | StatusKind::GraceExceeded
        )
    }
}
