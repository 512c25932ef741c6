//! Upstream message units and decoded events.

use std::sync::Arc;

use serde_json::Value;

use crate::error::SourceError;

/// One framed message as read off the wire, before decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// Message type, when the framing carries one (`event:` in SSE).
    pub event: Option<String>,
    /// Upstream-assigned identifier usable as a resume token.
    pub id: Option<String>,
    /// Message body.
    pub data: String,
}

impl RawMessage {
    /// A message carrying only a body.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Sets the upstream id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the message type.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }
}

/// A decoded upstream event.
///
/// The relay does not interpret `data`; it is handed as-is to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Arrival index within the [`StreamSource`](crate::StreamSource), starting at 1.
    pub seq: u64,
    /// Message type, if the upstream sent one.
    pub name: Option<Arc<str>>,
    /// Upstream identifier, if the upstream sent one.
    pub id: Option<Arc<str>>,
    /// Structured payload.
    pub data: Value,
}

impl Event {
    /// Decodes the JSON body of `raw` into an event with arrival index `seq`.
    pub fn decode(seq: u64, raw: &RawMessage) -> Result<Self, SourceError> {
        let data: Value =
            serde_json::from_str(&raw.data).map_err(|e| SourceError::Malformed {
                reason: e.to_string(),
            })?;
        Ok(Self {
            seq,
            name: raw.event.as_deref().map(Arc::from),
            id: raw.id.as_deref().map(Arc::from),
            data,
        })
    }
}
