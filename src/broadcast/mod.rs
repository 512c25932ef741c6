//! Fan-out side of the relay.
//!
//! - [`Render`] / [`Deliver`] injected collaborators (content and transport)
//! - [`Broadcaster`] renders each event once and offers it to every current
//!   subscriber through a dedicated lane
//!
//! ## Architecture
//! ```text
//! on_event(event) ─► render ─► registry.snapshot()
//!                                  │
//!                  ┌───────────────┼───────────────┐
//!                  ▼               ▼               ▼
//!              [lane A]        [lane B]   ...  [lane N]      (bounded, FIFO)
//!                  │               │               │
//!           deliver(A, ..)  deliver(B, ..)  deliver(N, ..)   (timeout, panic-safe)
//! ```

mod broadcaster;
mod capability;
mod lane;

pub use broadcaster::{Broadcaster, FanOut};
pub use capability::{Deliver, DeliverFn, Render};
pub(crate) use lane::LaneWorkers;
