//! # Ingestion loop.
//!
//! The single consumer of the [`StreamSource`]: pulls events in arrival order
//! and hands each to the [`Broadcaster`]. Runs on its own task.
//!
//! ```text
//! loop {
//!   ├─► source.next_event()        (suspends on upstream read / backoff sleep)
//!   │     ├─ Some(event) → broadcaster.on_event(&event)   (never awaits delivery)
//!   │     ├─ None        → exit Ok      (source closed by stop())
//!   │     └─ Err         → exit Err     (connect bound exhausted)
//!   └─► cancellation is observed by the source before each pull
//! }
//! ```
//!
//! The broadcaster is handed back on exit so the caller can drain its lanes.

use crate::broadcast::Broadcaster;
use crate::error::SourceError;
use crate::registry::SubscriberId;
use crate::source::StreamSource;

/// Drives `source` into `broadcaster` until the source ends.
pub(crate) async fn run<Id: SubscriberId>(
    mut source: StreamSource,
    mut broadcaster: Broadcaster<Id>,
) -> (Broadcaster<Id>, Result<(), SourceError>) {
    let mut events: u64 = 0;
    let result = loop {
        match source.next_event().await {
            Ok(Some(event)) => {
                events += 1;
                // Render failures are already reported by the broadcaster.
                let _ = broadcaster.on_event(&event);
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    tracing::info!(events, ok = result.is_ok(), "ingestion stopped");
    (broadcaster, result)
}
