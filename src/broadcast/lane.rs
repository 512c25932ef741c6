//! # Per-subscriber delivery lane.
//!
//! One bounded queue and one worker task per subscriber id. The worker delivers
//! queued content strictly in enqueue order, one at a time, so a subscriber
//! always sees events in stream order while different subscribers progress
//! independently.
//!
//! ```text
//! Broadcaster ── try_send ──► [queue] ──► worker ──► deliver(id, content)
//!                                            ├─ Err     → DeliveryFailed (logged, continue)
//!                                            ├─ timeout → DeliveryFailed (logged, continue)
//!                                            └─ panic   → DeliveryFailed (logged, continue)
//! ```
//!
//! A lane recreated for an id whose previous lane is still draining waits for
//! the previous worker before delivering anything.
//!
//! Every worker is also tracked in [`LaneWorkers`], so a shutdown that cannot
//! reach the broadcaster can still abort its lanes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time;
use tokio_util::task::AbortOnDropHandle;

use crate::broadcast::capability::Deliver;
use crate::error::DeliveryError;
use crate::registry::SubscriberId;
use crate::status::{Status, StatusBus, StatusKind};

/// Rendered content for one event, shared by every lane.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub seq: u64,
    pub content: Arc<str>,
}

pub(crate) struct Lane {
    pub sender: mpsc::Sender<Delivery>,
    pub worker: JoinHandle<()>,
}

/// Settings shared by all lanes of a broadcaster.
#[derive(Clone)]
pub(crate) struct LaneParams<Id: SubscriberId> {
    pub deliver: Arc<dyn Deliver<Id>>,
    pub capacity: usize,
    pub timeout: Option<Duration>,
    pub status: StatusBus,
    pub workers: LaneWorkers<Id>,
}

/// Abort handles of the lane workers spawned by one broadcaster.
#[derive(Clone)]
pub(crate) struct LaneWorkers<Id: SubscriberId> {
    inner: Arc<Mutex<Vec<(Id, AbortHandle)>>>,
}

impl<Id: SubscriberId> Default for LaneWorkers<Id> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<Id: SubscriberId> LaneWorkers<Id> {
    fn track(&self, id: Id, worker: &JoinHandle<()>) {
        let mut all = self.inner.lock();
        all.retain(|(_, h)| !h.is_finished());
        all.push((id, worker.abort_handle()));
    }

    /// Aborts every worker still running and returns their ids (`Debug` form).
    pub fn abort_all(&self) -> Vec<String> {
        let mut stuck: Vec<String> = Vec::new();
        for (id, handle) in self.inner.lock().drain(..) {
            if handle.is_finished() {
                continue;
            }
            handle.abort();
            let id = format!("{id:?}");
            if !stuck.contains(&id) {
                stuck.push(id);
            }
        }
        stuck
    }
}

impl Lane {
    /// Spawns the worker for `id`. `prev` is the still-running worker of an
    /// earlier lane for the same id, if any.
    pub fn spawn<Id: SubscriberId>(
        id: Id,
        params: &LaneParams<Id>,
        prev: Option<JoinHandle<()>>,
    ) -> Self {
        let (sender, rx) = mpsc::channel(params.capacity.max(1));
        let prev = prev.map(AbortOnDropHandle::new);
        let worker = tokio::spawn(run_lane(id.clone(), rx, params.clone(), prev));
        params.workers.track(id, &worker);
        Self { sender, worker }
    }
}

async fn run_lane<Id: SubscriberId>(
    id: Id,
    mut rx: mpsc::Receiver<Delivery>,
    params: LaneParams<Id>,
    prev: Option<AbortOnDropHandle<()>>,
) {
    if let Some(prev) = prev {
        let _ = prev.await;
    }

    while let Some(d) = rx.recv().await {
        let res = deliver_one(&*params.deliver, &id, &d.content, params.timeout).await;
        if let Err(err) = res {
            tracing::warn!(
                subscriber = ?id,
                seq = d.seq,
                error = %err,
                label = err.as_label(),
                "delivery failed"
            );
            params.status.publish(
                Status::new(StatusKind::DeliveryFailed)
                    .with_subscriber(format!("{id:?}"))
                    .with_event_seq(d.seq)
                    .with_reason(err.to_string()),
            );
        }
    }
}

/// Runs one delivery with the optional time bound, turning panics into errors.
async fn deliver_one<Id: SubscriberId>(
    deliver: &dyn Deliver<Id>,
    id: &Id,
    content: &str,
    timeout: Option<Duration>,
) -> Result<(), DeliveryError> {
    let fut = AssertUnwindSafe(deliver.deliver(id, content)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => time::timeout(limit, fut)
            .await
            .map_err(|_| DeliveryError::Timeout { timeout: limit })?,
        None => fut.await,
    };
    outcome.unwrap_or_else(|panic| {
        Err(DeliveryError::Panicked {
            info: panic_message(panic.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
