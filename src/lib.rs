//! # eventrelay
//!
//! **eventrelay** relays events from one long-lived upstream event stream to a
//! dynamic set of downstream subscribers.
//!
//! Subscribers join and leave at any time. Every event observed while a
//! subscriber is registered is offered to it; upstream drops are absorbed by
//! reconnecting with backoff; a slow or failing subscriber never stalls
//! ingestion or delivery to anyone else.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!        upstream (SSE / any Connector)
//!                     │
//!                     ▼
//! ┌───────────────────────────────────────────┐
//! │  StreamSource                             │
//! │  - reconnect with BackoffPolicy           │
//! │  - idle timeout, resume from last id      │
//! │  - decode, skip malformed                 │
//! └────────────────────┬──────────────────────┘
//!                      │ Event (arrival order)
//!                      ▼
//! ┌───────────────────────────────────────────┐      ┌──────────────────────┐
//! │  Broadcaster (ingestion task)             │◄─────│  SubscriberRegistry  │◄── subscribe(id)
//! │  - render once                            │ snap │  (RwLock<HashSet>)   │◄── unsubscribe(id)
//! │  - snapshot registry                      │ shot └──────────────────────┘
//! │  - try_send into per-subscriber lanes     │
//! └──────┬──────────────────┬─────────────────┘
//!        ▼                  ▼
//!    [lane A]           [lane B]   ...          (bounded FIFO + worker task)
//!        │                  │
//!   deliver(A, ..)     deliver(B, ..)           (timeout, panic-safe)
//!
//! Everyone publishes Status ─► StatusBus (broadcast) ─► RelayService::statuses()
//! ```
//!
//! ### Lifecycle
//! ```text
//! Idle ──start()──► Running ──stop()──► Stopping ──► Stopped
//!                      └── source gave up ──┘
//!
//! stop():
//!   ├─► cancel source        (ingestion exits after the current fan-out)
//!   ├─► drain every lane     (bounded by RelayConfig::grace)
//!   └─► GraceExceeded { stuck } if ingestion or lanes were still busy at the deadline
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Upstream**      | Reconnecting event source, SSE transport.                      | [`StreamSource`], [`Connector`], [`SseConnector`] |
//! | **Subscribers**   | Thread-safe idempotent membership set.                         | [`SubscriberRegistry`], [`SubscriberId`]    |
//! | **Fan-out**       | Isolated per-subscriber delivery.                              | [`Broadcaster`], [`Render`], [`Deliver`]    |
//! | **Lifecycle**     | Start/stop, graceful shutdown, signal handling.                | [`RelayService`], [`RelayState`]            |
//! | **Policies**      | Reconnect backoff and jitter.                                  | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Observability** | Structured `tracing` logs and a status stream.                 | [`Status`], [`StatusKind`]                  |
//! | **Errors**        | Typed errors per failure domain.                               | [`SourceError`], [`DeliveryError`], [`RelayError`] |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use eventrelay::{
//!     DeliverFn, DeliveryError, Event, RelayConfig, RelayService, RenderError, SseConnector,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = RelayConfig::default();
//!     cfg.grace = Duration::from_secs(5);
//!
//!     let connector = Arc::new(SseConnector::new("http://127.0.0.1:9/events")?);
//!     let render = Arc::new(|ev: &Event| -> Result<String, RenderError> {
//!         ev.data["title"]
//!             .as_str()
//!             .map(|t| format!("New: {t}"))
//!             .ok_or_else(|| RenderError::new("no title"))
//!     });
//!     let deliver = DeliverFn::arc(|chat: i64, text: Arc<str>| async move {
//!         println!("[{chat}] {text}");
//!         Ok::<_, DeliveryError>(())
//!     });
//!
//!     let relay = RelayService::builder(connector, render, deliver)
//!         .config(cfg)
//!         .build();
//!
//!     relay.start()?;
//!     relay.subscribe(42)?;
//!     relay.stop().await?;
//!     Ok(())
//! }
//! ```
mod broadcast;
mod config;
mod core;
mod error;
mod policies;
mod registry;
mod source;
mod status;

// ---- Public re-exports ----

pub use broadcast::{Broadcaster, Deliver, DeliverFn, FanOut, Render};
pub use config::RelayConfig;
pub use core::{RelayBuilder, RelayService, RelayState, wait_for_shutdown_signal};
pub use error::{DeliveryError, RelayError, RenderError, SourceError};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use registry::{SubscriberId, SubscriberRegistry};
pub use source::{
    Connector, DEFAULT_MAX_MESSAGE, Event, Frame, MessageStream, RawMessage, SseConnector,
    SseDecoder, StreamSource, decode_body,
};
pub use status::{Status, StatusBus, StatusKind};
