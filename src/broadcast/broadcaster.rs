//! # Broadcaster: isolated fan-out of one event to the current subscribers.
//!
//! ```text
//! on_event(event)
//!     │
//!     ├─► render(event) ── Err/panic ──► RenderFailed, skip event for everyone
//!     ├─► registry.snapshot()
//!     ├─► close lanes of ids no longer subscribed (they drain what they hold)
//!     └─► for id in snapshot:
//!            lane(id).try_send(content)
//!                ├─ Ok     → delivered later by the lane worker
//!                └─ Full   → LaneOverflow, dropped for this id only
//! ```
//!
//! ## Rules
//! - `on_event` never awaits a delivery: ingestion is never stalled by a subscriber
//! - Each event is offered to exactly the ids in the snapshot taken for it
//! - Per-subscriber order follows stream order; no order across subscribers
//! - Delivery failures never unsubscribe anyone

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::broadcast::capability::{Deliver, Render};
use crate::broadcast::lane::{Delivery, Lane, LaneParams, LaneWorkers};
use crate::config::RelayConfig;
use crate::error::RenderError;
use crate::registry::{SubscriberId, SubscriberRegistry};
use crate::source::Event;
use crate::status::{Status, StatusBus, StatusKind};

/// Outcome of offering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Subscribers whose lane accepted the event.
    pub offered: usize,
    /// Subscribers for which the event was dropped (lane full).
    pub dropped: usize,
}

/// Single in-order consumer of the event stream that fans each event out to
/// the registry's current members.
pub struct Broadcaster<Id: SubscriberId> {
    registry: Arc<SubscriberRegistry<Id>>,
    render: Arc<dyn Render>,
    params: LaneParams<Id>,
    lanes: HashMap<Id, Lane>,
    /// Closed lanes still delivering what they were given.
    retired: HashMap<Id, JoinHandle<()>>,
}

impl<Id: SubscriberId> Broadcaster<Id> {
    /// Creates a broadcaster over `registry`. Lanes are spawned lazily on the
    /// first event offered to each subscriber.
    pub fn new(
        registry: Arc<SubscriberRegistry<Id>>,
        render: Arc<dyn Render>,
        deliver: Arc<dyn Deliver<Id>>,
        cfg: &RelayConfig,
        status: StatusBus,
    ) -> Self {
        Self {
            registry,
            render,
            params: LaneParams {
                deliver,
                capacity: cfg.lane_capacity_clamped(),
                timeout: cfg.delivery_limit(),
                status,
                workers: LaneWorkers::default(),
            },
            lanes: HashMap::new(),
            retired: HashMap::new(),
        }
    }

    /// Renders `event` and hands it to every current subscriber's lane.
    ///
    /// Must be called from a Tokio runtime (lanes are spawned tasks).
    pub fn on_event(&mut self, event: &Event) -> Result<FanOut, RenderError> {
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| self.render.render(event)))
            .unwrap_or_else(|_| Err(RenderError::new("renderer panicked")));
        let content: Arc<str> = match rendered {
            Ok(text) => Arc::from(text),
            Err(err) => {
                tracing::warn!(seq = event.seq, error = %err, "render failed, event skipped");
                self.params.status.publish(
                    Status::new(StatusKind::RenderFailed)
                        .with_event_seq(event.seq)
                        .with_reason(err.to_string()),
                );
                return Err(err);
            }
        };

        let snapshot = self.registry.snapshot();
        self.retire_absent(&snapshot);

        let mut out = FanOut::default();
        for id in snapshot {
            let delivery = Delivery {
                seq: event.seq,
                content: Arc::clone(&content),
            };
            let sent = self.lane(id.clone()).sender.try_send(delivery);
            match sent {
                Ok(()) => out.offered += 1,
                Err(TrySendError::Full(_)) => {
                    out.dropped += 1;
                    self.report_overflow(&id, event.seq, "full");
                }
                Err(TrySendError::Closed(_)) => {
                    // Worker gone (aborted); start over on the next event.
                    out.dropped += 1;
                    self.lanes.remove(&id);
                    self.report_overflow(&id, event.seq, "closed");
                }
            }
        }

        tracing::debug!(
            seq = event.seq,
            offered = out.offered,
            dropped = out.dropped,
            "fan-out"
        );
        Ok(out)
    }

    /// Handle that can abort this broadcaster's lanes from outside.
    pub(crate) fn workers(&self) -> LaneWorkers<Id> {
        self.params.workers.clone()
    }

    /// Number of open lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Closes every lane and waits for them to drain until `deadline`.
    ///
    /// Lanes still busy at the deadline are aborted and returned as `Err` with
    /// their subscriber ids rendered with `Debug`.
    pub async fn drain(self, deadline: Instant) -> Result<(), Vec<String>> {
        let mut workers: Vec<(Id, JoinHandle<()>)> = self
            .lanes
            .into_iter()
            .map(|(id, lane)| (id, lane.worker))
            .collect();
        workers.extend(self.retired);

        let mut stuck = Vec::new();
        for (id, mut worker) in workers {
            if time::timeout_at(deadline, &mut worker).await.is_err() {
                worker.abort();
                stuck.push(format!("{id:?}"));
            }
        }

        if stuck.is_empty() { Ok(()) } else { Err(stuck) }
    }

    fn lane(&mut self, id: Id) -> &Lane {
        let params = &self.params;
        let retired = &mut self.retired;
        self.lanes.entry(id).or_insert_with_key(|id| {
            let prev = retired.remove(id);
            Lane::spawn(id.clone(), params, prev)
        })
    }

    fn retire_absent(&mut self, snapshot: &HashSet<Id>) {
        self.retired.retain(|_, worker| !worker.is_finished());

        let gone: Vec<Id> = self
            .lanes
            .keys()
            .filter(|id| !snapshot.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(lane) = self.lanes.remove(&id) {
                tracing::debug!(subscriber = ?id, "closing lane");
                self.retired.insert(id, lane.worker);
            }
        }
    }

    fn report_overflow(&self, id: &Id, seq: u64, reason: &'static str) {
        tracing::warn!(
            subscriber = ?id,
            seq,
            reason,
            "lane overflow, event dropped for subscriber"
        );
        self.params.status.publish(
            Status::new(StatusKind::LaneOverflow)
                .with_subscriber(format!("{id:?}"))
                .with_event_seq(seq)
                .with_reason(reason),
        );
    }
}
