//! Relay statuses: types and broadcast bus.
//!
//! - [`StatusKind`], [`Status`] what happened, with metadata
//! - [`StatusBus`] thin wrapper over `tokio::sync::broadcast`
//!
//! Publishers: `StreamSource` (connect/backoff/lost/malformed), `Broadcaster`
//! and its lanes (render/delivery/overflow), `RelayService` (lifecycle).
//! Consumers: whoever holds a receiver from
//! [`RelayService::statuses`](crate::RelayService::statuses).

mod bus;
mod kind;

pub use bus::StatusBus;
pub use kind::{Status, StatusKind};
