//! # Upstream connector abstraction.
//!
//! A [`Connector`] opens one upstream connection and returns it as a stream of
//! [`Frame`]s. Reconnect, backoff, idle detection and decoding are handled by
//! [`StreamSource`](crate::StreamSource); a connector only knows how to open a
//! connection once.
//!
//! ## Stream items
//! - `Ok(Frame::Message)` a complete message
//! - `Ok(Frame::KeepAlive)` bytes arrived but completed no message (keepalive
//!   comment, partial message); resets idle detection only
//! - `Err(SourceError::Malformed)` one message was unusable; the connection is kept
//! - any other `Err` the connection broke; the source discards it
//! - end of stream (`None`) the server closed the connection

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::SourceError;
use crate::source::event::RawMessage;

/// One item read from a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete message.
    Message(RawMessage),
    /// Proof of life without a message.
    KeepAlive,
}

impl From<RawMessage> for Frame {
    fn from(msg: RawMessage) -> Self {
        Frame::Message(msg)
    }
}

/// A live upstream connection.
pub type MessageStream = BoxStream<'static, Result<Frame, SourceError>>;

/// Opens upstream connections.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use futures::StreamExt;
/// use eventrelay::{Connector, Frame, MessageStream, RawMessage, SourceError};
///
/// struct Fixed;
///
/// #[async_trait]
/// impl Connector for Fixed {
///     async fn connect(&self, _resume: Option<&str>) -> Result<MessageStream, SourceError> {
///         let items = vec![
///             Ok(Frame::from(RawMessage::data("1"))),
///             Ok(Frame::KeepAlive),
///             Ok(Frame::from(RawMessage::data("2"))),
///         ];
///         Ok(futures::stream::iter(items).boxed())
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a new connection.
    ///
    /// `resume` carries the id of the last event seen on a previous connection,
    /// when the upstream provided ids and resuming is enabled.
    async fn connect(&self, resume: Option<&str>) -> Result<MessageStream, SourceError>;

    /// Human-readable name (for logs).
    fn name(&self) -> &str {
        "upstream"
    }
}
