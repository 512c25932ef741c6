//! Upstream side of the relay.
//!
//! - [`Connector`] opens one upstream connection as a stream of [`Frame`]s
//! - [`StreamSource`] reconnect/backoff/idle handling and decoding into [`Event`]s
//! - [`SseConnector`], [`SseDecoder`] Server-Sent Events over HTTP

mod connector;
mod event;
mod sse;
mod stream;

pub use connector::{Connector, Frame, MessageStream};
pub use event::{Event, RawMessage};
pub use sse::{DEFAULT_MAX_MESSAGE, SseConnector, SseDecoder, decode_body};
pub use stream::StreamSource;
