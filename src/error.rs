//! Error types used by the relay.
//!
//! - [`SourceError`] upstream connection and decoding failures.
//! - [`RenderError`] an event could not be turned into message content.
//! - [`DeliveryError`] one delivery to one subscriber failed.
//! - [`RelayError`] lifecycle contract violations and unrecoverable termination.
//!
//! Everything except [`RelayError`] is contained where it happens: logged,
//! published as a [`Status`](crate::Status), and never propagated past the
//! ingestion loop.

use std::time::Duration;
use thiserror::Error;

use crate::core::RelayState;

/// # Errors produced by the upstream stream.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// A connection could not be established.
    #[error("connect failed: {reason}")]
    Connect {
        /// Transport-level reason.
        reason: String,
    },

    /// An established connection ended (read error or server close).
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Transport-level reason.
        reason: String,
    },

    /// No data arrived within the idle threshold.
    #[error("no data for {idle:?}")]
    IdleTimeout {
        /// The configured idle threshold.
        idle: Duration,
    },

    /// A single message could not be decoded into an event.
    #[error("malformed event: {reason}")]
    Malformed {
        /// Decoder message.
        reason: String,
    },

    /// The configured bound on consecutive connect attempts was reached.
    #[error("gave up after {attempts} connect attempts")]
    Exhausted {
        /// Number of failed attempts.
        attempts: u32,
    },

    /// The endpoint is unusable (bad URL, unsupported scheme).
    #[error("invalid endpoint: {reason}")]
    InvalidEndpoint {
        /// Why the endpoint was rejected.
        reason: String,
    },
}

impl SourceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceError::Connect { .. } => "source_connect",
            SourceError::ConnectionLost { .. } => "source_connection_lost",
            SourceError::IdleTimeout { .. } => "source_idle_timeout",
            SourceError::Malformed { .. } => "source_malformed",
            SourceError::Exhausted { .. } => "source_exhausted",
            SourceError::InvalidEndpoint { .. } => "source_invalid_endpoint",
        }
    }

    /// Whether the source keeps going after this error.
    ///
    /// ```
    /// use eventrelay::SourceError;
    ///
    /// assert!(SourceError::Connect { reason: "refused".into() }.is_recoverable());
    /// assert!(!SourceError::Exhausted { attempts: 5 }.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SourceError::Connect { .. }
                | SourceError::ConnectionLost { .. }
                | SourceError::IdleTimeout { .. }
                | SourceError::Malformed { .. }
        )
    }

    pub(crate) fn lost(reason: impl ToString) -> Self {
        SourceError::ConnectionLost {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn connect(reason: impl ToString) -> Self {
        SourceError::Connect {
            reason: reason.to_string(),
        }
    }
}

/// Rendering an event into message content failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("render failed: {reason}")]
pub struct RenderError {
    /// Renderer message.
    pub reason: String,
}

impl RenderError {
    /// Creates a render error from any displayable reason.
    pub fn new(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

/// # Errors produced by a single delivery.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport refused the message.
    #[error("rejected: {reason}")]
    Rejected {
        /// Transport message.
        reason: String,
    },

    /// The recipient is unknown to the transport or has blocked it.
    #[error("unknown or blocked recipient")]
    UnknownRecipient,

    /// Delivery did not finish within the configured bound.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The configured delivery timeout.
        timeout: Duration,
    },

    /// The delivery implementation panicked.
    #[error("delivery panicked: {info}")]
    Panicked {
        /// Panic payload, if it was a string.
        info: String,
    },
}

impl DeliveryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::Rejected { .. } => "delivery_rejected",
            DeliveryError::UnknownRecipient => "delivery_unknown_recipient",
            DeliveryError::Timeout { .. } => "delivery_timeout",
            DeliveryError::Panicked { .. } => "delivery_panicked",
        }
    }

    /// Creates a [`DeliveryError::Rejected`] from any displayable reason.
    pub fn rejected(reason: impl ToString) -> Self {
        DeliveryError::Rejected {
            reason: reason.to_string(),
        }
    }
}

/// # Errors reported to the caller of the lifecycle API.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RelayError {
    /// `start()` was called on a running service.
    #[error("relay is already running")]
    AlreadyRunning,

    /// The requested transition is not allowed from the current state.
    #[error("cannot go from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// State at the time of the call.
        from: RelayState,
        /// State the call would have entered.
        to: RelayState,
    },

    /// A command that needs a running relay was issued in another state.
    #[error("relay is not running (state {state:?})")]
    NotRunning {
        /// State at the time of the call.
        state: RelayState,
    },

    /// The ingestion task ended abnormally (panic or abort).
    #[error("ingestion task aborted: {reason}")]
    IngestAborted {
        /// Join error description.
        reason: String,
    },

    /// Stop grace period elapsed before every delivery lane drained.
    #[error("shutdown grace {grace:?} exceeded; abandoned lanes: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Subscribers whose pending deliveries were abandoned.
        stuck: Vec<String>,
    },

    /// The stream source terminated with an unrecoverable error.
    #[error("stream source terminated: {0}")]
    Source(#[from] SourceError),
}

impl RelayError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use eventrelay::RelayError;
    ///
    /// assert_eq!(RelayError::AlreadyRunning.as_label(), "relay_already_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RelayError::AlreadyRunning => "relay_already_running",
            RelayError::InvalidStateTransition { .. } => "relay_invalid_transition",
            RelayError::NotRunning { .. } => "relay_not_running",
            RelayError::IngestAborted { .. } => "relay_ingest_aborted",
            RelayError::GraceExceeded { .. } => "relay_grace_exceeded",
            RelayError::Source(_) => "relay_source_terminated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_split() {
        assert!(SourceError::lost("eof").is_recoverable());
        let idle = SourceError::IdleTimeout {
            idle: Duration::from_secs(1),
        };
        assert!(idle.is_recoverable());
        let malformed = SourceError::Malformed {
            reason: "x".into(),
        };
        assert!(malformed.is_recoverable());
        let endpoint = SourceError::InvalidEndpoint {
            reason: "x".into(),
        };
        assert!(!endpoint.is_recoverable());
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(SourceError::connect("refused").as_label(), "source_connect");
        assert_eq!(
            DeliveryError::UnknownRecipient.as_label(),
            "delivery_unknown_recipient"
        );
        let err = RelayError::from(SourceError::Exhausted { attempts: 3 });
        assert_eq!(err.as_label(), "relay_source_terminated");
        assert_eq!(
            err.to_string(),
            "stream source terminated: gave up after 3 connect attempts"
        );
    }
}
