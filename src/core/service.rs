//! # RelayService: lifecycle owner of the relay.
//!
//! Wires [`StreamSource`] → [`Broadcaster`] → [`SubscriberRegistry`], runs the
//! ingestion loop on its own task and coordinates graceful shutdown.
//!
//! ## Architecture
//! ```text
//! RelayService::start()
//!     └─► spawn ingest::run(source, broadcaster)
//!            └─► loop: next_event() → on_event() → per-subscriber lanes
//!
//! subscribe(id) / unsubscribe(id)   (any task, any time while Running)
//!     └─► SubscriberRegistry        (the only state shared with ingestion)
//!
//! RelayService::stop()
//!     ├─► StopRequested
//!     ├─► cancel source token       (ingestion exits after the current fan-out)
//!     └─► under one grace deadline:
//!            ├─ wait for the ingestion task
//!            ├─ close every lane and wait for it to drain
//!            ├─ all done      → StoppedWithinGrace
//!            └─ deadline hit  → abort ingestion and lanes, GraceExceeded { stuck }
//! ```
//!
//! ## Rules
//! - `start()` only from `Idle`; a second call is [`RelayError::AlreadyRunning`]
//! - When the source gives up, the service leaves `Running` on its own and
//!   rejects commands; the next `stop()` returns the source error
//! - `stop()` on a stopping or stopped service is a no-op
//! - The registry survives `stop()`; it is never cleared here
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use eventrelay::{DeliverFn, DeliveryError, Event, RelayService, RenderError, SseConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = Arc::new(SseConnector::new("https://example.com/stream")?);
//!     let render = Arc::new(|ev: &Event| -> Result<String, RenderError> {
//!         Ok(ev.data.to_string())
//!     });
//!     let deliver = DeliverFn::arc(|chat: i64, text: Arc<str>| async move {
//!         println!("{chat} <- {text}");
//!         Ok::<_, DeliveryError>(())
//!     });
//!
//!     let relay = RelayService::builder(connector, render, deliver).build();
//!     relay.registry().subscribe(42);
//!     relay.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{Broadcaster, Deliver, LaneWorkers, Render};
use crate::config::RelayConfig;
use crate::core::builder::RelayBuilder;
use crate::core::{ingest, shutdown, state::RelayState};
use crate::error::{RelayError, SourceError};
use crate::registry::{SubscriberId, SubscriberRegistry};
use crate::source::{Connector, StreamSource};
use crate::status::{Status, StatusBus, StatusKind};

type IngestHandle<Id> = JoinHandle<(Broadcaster<Id>, Result<(), SourceError>)>;

struct Inner<Id: SubscriberId> {
    /// Present until `start()` hands them to the ingestion task.
    parts: Option<(StreamSource, Broadcaster<Id>)>,
    /// Present from `start()` until `stop()` collects it.
    ingest: Option<IngestHandle<Id>>,
}

/// Owns the relay lifecycle: `Idle → Running → Stopping → Stopped`.
pub struct RelayService<Id: SubscriberId> {
    cfg: RelayConfig,
    registry: Arc<SubscriberRegistry<Id>>,
    bus: StatusBus,
    /// Cancels the source; cancelled by `stop()`.
    token: CancellationToken,
    /// Cancelled when the ingestion task returns for any reason.
    finished: CancellationToken,
    /// Lane workers, reachable even while the broadcaster is in the task.
    lanes: LaneWorkers<Id>,
    /// Locked before `inner` when both are needed.
    state: Arc<Mutex<RelayState>>,
    inner: Mutex<Inner<Id>>,
}

impl<Id: SubscriberId> RelayService<Id> {
    /// Returns a builder wiring the given upstream, renderer and transport.
    pub fn builder(
        connector: Arc<dyn Connector>,
        render: Arc<dyn Render>,
        deliver: Arc<dyn Deliver<Id>>,
    ) -> RelayBuilder<Id> {
        RelayBuilder::new(connector, render, deliver)
    }

    pub(crate) fn new_internal(
        cfg: RelayConfig,
        registry: Arc<SubscriberRegistry<Id>>,
        connector: Arc<dyn Connector>,
        render: Arc<dyn Render>,
        deliver: Arc<dyn Deliver<Id>>,
    ) -> Self {
        let bus = StatusBus::new(cfg.status_capacity_clamped());
        let token = CancellationToken::new();
        let source = StreamSource::new(connector, &cfg, bus.clone(), token.clone());
        let broadcaster =
            Broadcaster::new(Arc::clone(&registry), render, deliver, &cfg, bus.clone());

        Self {
            cfg,
            registry,
            bus,
            token,
            finished: CancellationToken::new(),
            lanes: broadcaster.workers(),
            state: Arc::new(Mutex::new(RelayState::Idle)),
            inner: Mutex::new(Inner {
                parts: Some((source, broadcaster)),
                ingest: None,
            }),
        }
    }

    /// Starts ingestion on a new task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - [`RelayError::AlreadyRunning`] if the service is running
    /// - [`RelayError::InvalidStateTransition`] if it is stopping or stopped
    pub fn start(&self) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        match *state {
            RelayState::Idle => {}
            RelayState::Running => return Err(RelayError::AlreadyRunning),
            from => {
                return Err(RelayError::InvalidStateTransition {
                    from,
                    to: RelayState::Running,
                });
            }
        }
        let mut inner = self.inner.lock();
        let Some((source, broadcaster)) = inner.parts.take() else {
            return Err(RelayError::InvalidStateTransition {
                from: *state,
                to: RelayState::Running,
            });
        };

        *state = RelayState::Running;
        let finished = self.finished.clone();
        let shared = Arc::clone(&self.state);
        inner.ingest = Some(tokio::spawn(async move {
            let _done = finished.drop_guard();
            let (broadcaster, outcome) = ingest::run(source, broadcaster).await;
            if let Err(err) = &outcome {
                let mut state = shared.lock();
                if *state == RelayState::Running {
                    *state = RelayState::Stopping;
                    tracing::error!(error = %err, "source gave up, relay stops accepting commands");
                }
            }
            (broadcaster, outcome)
        }));
        drop(inner);
        drop(state);

        tracing::info!(subscribers = self.registry.len(), "relay started");
        self.bus.publish(Status::new(StatusKind::Started));
        Ok(())
    }

    /// Stops ingestion and waits, up to [`RelayConfig::grace`], for pending
    /// deliveries to finish.
    ///
    /// No events are consumed from the upstream after this returns.
    ///
    /// # Errors
    /// - [`RelayError::InvalidStateTransition`] if the service was never started
    /// - [`RelayError::GraceExceeded`] if ingestion or deliveries were abandoned
    ///   at the deadline
    /// - [`RelayError::Source`] if the source had already given up on its own
    /// - [`RelayError::IngestAborted`] if the ingestion task panicked
    pub async fn stop(&self) -> Result<(), RelayError> {
        let handle = {
            let mut state = self.state.lock();
            let mut inner = self.inner.lock();
            match *state {
                RelayState::Running => {}
                // The source gave up; its outcome has not been collected yet.
                RelayState::Stopping if inner.ingest.is_some() => {}
                RelayState::Stopping | RelayState::Stopped => return Ok(()),
                RelayState::Idle => {
                    return Err(RelayError::InvalidStateTransition {
                        from: RelayState::Idle,
                        to: RelayState::Stopping,
                    });
                }
            }
            *state = RelayState::Stopping;
            inner.ingest.take()
        };

        tracing::info!(grace = ?self.cfg.grace, "relay stop requested");
        self.bus.publish(Status::new(StatusKind::StopRequested));
        self.token.cancel();

        let deadline = Instant::now() + self.cfg.grace;
        let res = self.wait_with_grace(handle, deadline).await;

        *self.state.lock() = RelayState::Stopped;
        match &res {
            Err(RelayError::GraceExceeded { stuck, .. }) => {
                tracing::warn!(?stuck, "grace exceeded, pending deliveries abandoned");
                self.bus.publish(
                    Status::new(StatusKind::GraceExceeded).with_reason(stuck.join(", ")),
                );
            }
            _ => {
                tracing::info!("relay stopped");
                self.bus.publish(Status::new(StatusKind::StoppedWithinGrace));
            }
        }
        res
    }

    async fn wait_with_grace(
        &self,
        handle: Option<IngestHandle<Id>>,
        deadline: Instant,
    ) -> Result<(), RelayError> {
        let Some(mut handle) = handle else {
            return Ok(());
        };
        let (broadcaster, outcome) = match time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(out)) => out,
            Ok(Err(join)) => {
                self.lanes.abort_all();
                return Err(RelayError::IngestAborted {
                    reason: join.to_string(),
                });
            }
            Err(_) => {
                handle.abort();
                let mut stuck = vec!["ingest".to_string()];
                stuck.extend(self.lanes.abort_all());
                return Err(RelayError::GraceExceeded {
                    grace: self.cfg.grace,
                    stuck,
                });
            }
        };

        broadcaster
            .drain(deadline)
            .await
            .map_err(|stuck| RelayError::GraceExceeded {
                grace: self.cfg.grace,
                stuck,
            })?;
        outcome.map_err(RelayError::from)
    }

    /// Starts the service, waits for a termination signal (or for the source
    /// to give up), then stops gracefully.
    pub async fn run_until_signal(&self) -> Result<(), RelayError> {
        self.start()?;
        tokio::select! {
            _ = shutdown::wait_for_shutdown_signal() => {
                tracing::info!("termination signal received");
            }
            _ = self.finished.cancelled() => {}
        }
        self.stop().await
    }

    /// Adds `id` to the registry. Returns whether membership changed.
    ///
    /// # Errors
    /// [`RelayError::NotRunning`] unless the service is running. Use
    /// [`registry`](Self::registry) to pre-populate before `start()`.
    pub fn subscribe(&self, id: Id) -> Result<bool, RelayError> {
        self.ensure_running()?;
        Ok(self.registry.subscribe(id))
    }

    /// Removes `id` from the registry. Returns whether membership changed.
    ///
    /// Removing an absent id is not an error.
    pub fn unsubscribe(&self, id: &Id) -> Result<bool, RelayError> {
        self.ensure_running()?;
        Ok(self.registry.unsubscribe(id))
    }

    /// The shared subscriber registry.
    pub fn registry(&self) -> &Arc<SubscriberRegistry<Id>> {
        &self.registry
    }

    /// New receiver of relay statuses. Statuses published before this call
    /// are not seen.
    pub fn statuses(&self) -> broadcast::Receiver<Status> {
        self.bus.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &RelayConfig {
        &self.cfg
    }

    fn ensure_running(&self) -> Result<(), RelayError> {
        match self.state() {
            RelayState::Running => Ok(()),
            state => Err(RelayError::NotRunning { state }),
        }
    }
}
