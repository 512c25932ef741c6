//! Reconnect policies.
//!
//! - [`BackoffPolicy`] how reconnect delays grow (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization to avoid synchronized reconnects
//!
//! ## Defaults
//! `BackoffPolicy::default()` → first=1s, factor=2.0, max=60s, jitter=Equal.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
