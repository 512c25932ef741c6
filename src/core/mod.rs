//! Relay core: lifecycle and wiring.
//!
//! The public API from this module is [`RelayService`] (with its
//! [`RelayBuilder`]) and the [`RelayState`] it moves through.
//!
//! Internal modules:
//! - [`service`]: start/stop state machine and graceful shutdown;
//! - [`ingest`]: the loop that pulls events and hands them to the broadcaster;
//! - [`builder`]: assembles a service from its collaborators;
//! - [`shutdown`]: cross-platform termination signal handling;
//! - [`state`]: lifecycle states.

mod builder;
mod ingest;
mod service;
mod shutdown;
mod state;

pub use builder::RelayBuilder;
pub use service::RelayService;
pub use shutdown::wait_for_shutdown_signal;
pub use state::RelayState;
