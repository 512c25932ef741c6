//! # StreamSource: the reconnecting upstream reader.
//!
//! Turns a [`Connector`] into a lazy, conceptually infinite sequence of
//! [`Event`]s. Connection failures, drops and idle stalls are absorbed here:
//! the caller only ever sees the next event, or the end of the sequence once
//! the source is closed.
//!
//! ## Loop
//! ```text
//! next_event()
//!   loop {
//!     ├─► closed?               → Ok(None)            (SourceClosed)
//!     ├─► no connection:
//!     │     ├─ pending delay    → sleep (cancellable)
//!     │     ├─ connect(resume)  → Ok  → Connected
//!     │     │                   → Err → failures += 1
//!     │     │                           ├─ bound reached → Err(Exhausted)
//!     │     │                           └─ Degraded{delay = backoff.next(retries)}
//!     │     └─ continue
//!     └─► read one message (idle timeout, cancellable)
//!           ├─ keepalive  → restart idle timer, keep reading
//!           ├─ message    → decode → Ok(Some(event))
//!           │                     └─ malformed → MalformedSkipped, continue
//!           ├─ error/end  → ConnectionLost{delay}, drop connection
//!           └─ idle       → ConnectionLost{delay}, drop connection
//!   }
//! ```
//!
//! ## Rules
//! - Every reconnect waits out a backoff delay. The schedule restarts from
//!   its first step only after a connection stayed up for `stable_after`.
//! - A connection that delivered no message before dropping counts as a
//!   failed attempt toward `max_connect_attempts`.
//! - Any bytes from upstream, keepalives included, restart the idle timer;
//!   only messages count as delivery.
//! - Events have consecutive `seq` numbers starting at 1 across reconnects.
//! - Events missed while disconnected are not replayed unless the upstream
//!   honours the resume id.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt, stream};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::SourceError;
use crate::policies::BackoffPolicy;
use crate::source::connector::{Connector, Frame, MessageStream};
use crate::source::event::{Event, RawMessage};
use crate::status::{Status, StatusBus, StatusKind};

/// Outcome of waiting for the next message on a live connection.
enum Read {
    Message(RawMessage),
    Malformed(SourceError),
    Lost(SourceError),
    Cancelled,
}

/// Reconnecting reader over a [`Connector`].
pub struct StreamSource {
    connector: Arc<dyn Connector>,
    backoff: BackoffPolicy,
    idle: Option<Duration>,
    max_attempts: Option<u32>,
    stable_after: Duration,
    resume: bool,
    status: StatusBus,
    token: CancellationToken,

    conn: Option<MessageStream>,
    connected_at: Option<time::Instant>,
    /// Connection is open but has not produced a message yet.
    fresh: bool,
    /// Consecutive failed attempts since the last message.
    failures: u32,
    /// Step on the backoff schedule for the next reconnect.
    retries: u32,
    pending_delay: Option<Duration>,
    last_id: Option<String>,
    next_seq: u64,
    terminated: Option<SourceError>,
    closed_reported: bool,
}

impl StreamSource {
    /// Creates a source. No connection is made until the first read.
    ///
    /// Cancelling `token` (or calling [`close`](Self::close)) closes the source.
    pub fn new(
        connector: Arc<dyn Connector>,
        cfg: &RelayConfig,
        status: StatusBus,
        token: CancellationToken,
    ) -> Self {
        Self {
            connector,
            backoff: cfg.backoff,
            idle: cfg.idle_limit(),
            max_attempts: cfg.connect_attempt_limit(),
            stable_after: cfg.stable_after,
            resume: cfg.resume,
            status,
            token,
            conn: None,
            connected_at: None,
            fresh: false,
            failures: 0,
            retries: 0,
            pending_delay: None,
            last_id: None,
            next_seq: 1,
            terminated: None,
            closed_reported: false,
        }
    }

    /// Closes the current connection and stops reconnecting.
    ///
    /// Subsequent reads return `Ok(None)`.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Token that closes this source when cancelled.
    pub fn close_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Id of the last event seen, used as the resume token.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Returns the next event.
    ///
    /// - `Ok(Some(event))` next event in arrival order
    /// - `Ok(None)` the source was closed
    /// - `Err(SourceError::Exhausted)` the connect bound was reached; repeated
    ///   calls keep returning it
    pub async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        loop {
            if self.token.is_cancelled() {
                self.shut();
                return Ok(None);
            }
            if let Some(err) = &self.terminated {
                return Err(err.clone());
            }

            let Some(conn) = self.conn.as_mut() else {
                self.establish().await?;
                continue;
            };

            match read_one(conn, self.idle, &self.token).await {
                Read::Cancelled => continue,
                Read::Lost(err) => self.connection_lost(err)?,
                Read::Malformed(err) => {
                    self.message_seen();
                    self.skip_malformed(&err);
                }
                Read::Message(raw) => {
                    self.message_seen();
                    if raw.id.is_some() {
                        self.last_id.clone_from(&raw.id);
                    }
                    match Event::decode(self.next_seq, &raw) {
                        Ok(ev) => {
                            self.next_seq += 1;
                            return Ok(Some(ev));
                        }
                        Err(err) => self.skip_malformed(&err),
                    }
                }
            }
        }
    }

    /// Consumes the source into a `Stream` that ends when the source closes
    /// or gives up.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        stream::unfold(self, |mut src| async move {
            match src.next_event().await {
                Ok(Some(ev)) => Some((ev, src)),
                Ok(None) | Err(_) => None,
            }
        })
    }

    /// Tries to open a connection, waiting out any pending backoff first.
    ///
    /// Returns `Ok(())` once connected, after one failed attempt (delay
    /// scheduled), or when cancelled. Fails only when the bound is reached.
    async fn establish(&mut self) -> Result<(), SourceError> {
        if let Some(delay) = self.pending_delay.take() {
            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = self.token.cancelled() => return Ok(()),
            }
        }

        let attempt = self.failures + 1;
        self.status
            .publish(Status::new(StatusKind::Connecting).with_attempt(attempt));
        let resume = if self.resume { self.last_id.clone() } else { None };

        let res = select! {
            biased;
            _ = self.token.cancelled() => return Ok(()),
            res = self.connector.connect(resume.as_deref()) => res,
        };

        match res {
            Ok(conn) => {
                tracing::info!(
                    connector = self.connector.name(),
                    attempt,
                    resume = resume.as_deref().unwrap_or(""),
                    "upstream connected"
                );
                self.status
                    .publish(Status::new(StatusKind::Connected).with_attempt(attempt));
                self.conn = Some(conn);
                self.connected_at = Some(time::Instant::now());
                self.fresh = true;
                Ok(())
            }
            Err(err) => self.record_failure(err),
        }
    }

    fn message_seen(&mut self) {
        self.fresh = false;
        self.failures = 0;
    }

    fn skip_malformed(&self, err: &SourceError) {
        tracing::warn!(
            connector = self.connector.name(),
            error = %err,
            "skipping malformed upstream message"
        );
        self.status
            .publish(Status::new(StatusKind::MalformedSkipped).with_reason(err.to_string()));
    }

    fn connection_lost(&mut self, err: SourceError) -> Result<(), SourceError> {
        self.conn = None;
        let fresh = std::mem::take(&mut self.fresh);
        let stable = self
            .connected_at
            .take()
            .is_some_and(|at| at.elapsed() >= self.stable_after);
        if stable {
            self.failures = 0;
            self.retries = 0;
        }

        if fresh && !stable {
            tracing::warn!(
                connector = self.connector.name(),
                error = %err,
                "upstream connection lost before any message"
            );
            self.status
                .publish(Status::new(StatusKind::ConnectionLost).with_reason(err.to_string()));
            return self.record_failure(err);
        }

        let delay = self.schedule_retry();
        tracing::warn!(
            connector = self.connector.name(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "upstream connection lost"
        );
        self.status.publish(
            Status::new(StatusKind::ConnectionLost)
                .with_delay(delay)
                .with_reason(err.to_string()),
        );
        Ok(())
    }

    fn schedule_retry(&mut self) -> Duration {
        let delay = self.backoff.next(self.retries);
        self.retries = self.retries.saturating_add(1);
        self.pending_delay = Some(delay);
        delay
    }

    fn record_failure(&mut self, err: SourceError) -> Result<(), SourceError> {
        self.failures = self.failures.saturating_add(1);

        if self.max_attempts.is_some_and(|limit| self.failures >= limit) {
            let exhausted = SourceError::Exhausted {
                attempts: self.failures,
            };
            tracing::error!(
                connector = self.connector.name(),
                attempts = self.failures,
                error = %err,
                "giving up on upstream"
            );
            self.status.publish(
                Status::new(StatusKind::SourceExhausted)
                    .with_attempt(self.failures)
                    .with_reason(err.to_string()),
            );
            self.terminated = Some(exhausted.clone());
            return Err(exhausted);
        }

        let delay = self.schedule_retry();
        tracing::warn!(
            connector = self.connector.name(),
            attempt = self.failures,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "upstream unavailable, backing off"
        );
        self.status.publish(
            Status::new(StatusKind::Degraded)
                .with_attempt(self.failures)
                .with_delay(delay)
                .with_reason(err.to_string()),
        );
        Ok(())
    }

    fn shut(&mut self) {
        self.conn = None;
        if !std::mem::replace(&mut self.closed_reported, true) {
            tracing::debug!(connector = self.connector.name(), "stream source closed");
            self.status.publish(Status::new(StatusKind::SourceClosed));
        }
    }
}

async fn read_one(
    conn: &mut MessageStream,
    idle: Option<Duration>,
    token: &CancellationToken,
) -> Read {
    loop {
        let next = async {
            match idle {
                Some(limit) => time::timeout(limit, conn.next()).await.map_err(|_| ()),
                None => Ok(conn.next().await),
            }
        };
        let item = select! {
            biased;
            _ = token.cancelled() => return Read::Cancelled,
            item = next => item,
        };

        match item {
            Ok(Some(Ok(Frame::KeepAlive))) => tracing::trace!("upstream keepalive"),
            Ok(Some(Ok(Frame::Message(raw)))) => return Read::Message(raw),
            Ok(Some(Err(err @ SourceError::Malformed { .. }))) => return Read::Malformed(err),
            Ok(Some(Err(err))) => return Read::Lost(err),
            Ok(None) => return Read::Lost(SourceError::lost("closed by upstream")),
            Err(()) => {
                return Read::Lost(SourceError::IdleTimeout {
                    idle: idle.unwrap_or_default(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;
    use crate::source::sse::decode_body;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out scripted connections in order; once the script is empty every
    /// connect fails.
    struct Scripted {
        script: Mutex<VecDeque<Result<Vec<Result<RawMessage, SourceError>>, SourceError>>>,
        resumes: Mutex<Vec<Option<String>>>,
        hang_after: bool,
    }

    impl Scripted {
        fn new(
            script: Vec<Result<Vec<Result<RawMessage, SourceError>>, SourceError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                resumes: Mutex::new(Vec::new()),
                hang_after: false,
            })
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        async fn connect(&self, resume: Option<&str>) -> Result<MessageStream, SourceError> {
            self.resumes.lock().push(resume.map(str::to_string));
            let next = self.script.lock().pop_front();
            match next {
                Some(Ok(items)) => {
                    let frames = stream::iter(items.into_iter().map(|r| r.map(Frame::from)));
                    if self.hang_after {
                        Ok(frames.chain(stream::pending()).boxed())
                    } else {
                        Ok(frames.boxed())
                    }
                }
                Some(Err(e)) => Err(e),
                None => Err(SourceError::connect("script exhausted")),
            }
        }
    }

    fn cfg() -> RelayConfig {
        RelayConfig {
            backoff: BackoffPolicy::constant(Duration::from_millis(100)),
            idle_timeout: Duration::from_secs(5),
            ..RelayConfig::default()
        }
    }

    fn msg(n: u32) -> Result<RawMessage, SourceError> {
        Ok(RawMessage::data(format!("{{\"n\":{n}}}")).with_id(n.to_string()))
    }

    /// Every connection sends one message, optionally stays open for `hold`,
    /// then closes.
    struct OneShot {
        hold: Duration,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for OneShot {
        async fn connect(&self, _resume: Option<&str>) -> Result<MessageStream, SourceError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            let hold = self.hold;
            let close = stream::once(time::sleep(hold)).filter_map(|()| async { None });
            Ok(stream::iter([msg(n).map(Frame::from)]).chain(close).boxed())
        }
    }

    /// SSE body over `decode_body`: optionally one event, then a `: ping`
    /// comment every 30s, forever.
    struct Heartbeat {
        first: Option<&'static str>,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for Heartbeat {
        async fn connect(&self, _resume: Option<&str>) -> Result<MessageStream, SourceError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let first = stream::iter(self.first.map(|b| Ok(Bytes::from_static(b.as_bytes()))));
            let pings = stream::unfold((), |()| async {
                time::sleep(Duration::from_secs(30)).await;
                Some((Ok::<_, Infallible>(Bytes::from_static(b": ping\n\n")), ()))
            });
            Ok(decode_body(first.chain(pings)))
        }
    }

    fn drain_statuses(rx: &mut tokio::sync::broadcast::Receiver<Status>) -> Vec<Status> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn source(conn: Arc<Scripted>, cfg: &RelayConfig) -> (StreamSource, StatusBus) {
        let bus = StatusBus::new(64);
        let src = StreamSource::new(conn, cfg, bus.clone(), CancellationToken::new());
        (src, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_drop_and_resumes_from_last_id() {
        let conn = Scripted::new(vec![
            Ok(vec![msg(1)]),
            Err(SourceError::connect("refused")),
            Err(SourceError::connect("refused")),
            Ok(vec![msg(2)]),
        ]);
        let (mut src, bus) = source(conn.clone(), &cfg());
        let mut rx = bus.subscribe();

        let a = src.next_event().await.unwrap().unwrap();
        let b = src.next_event().await.unwrap().unwrap();
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(a.data["n"], 1);
        assert_eq!(b.data["n"], 2);

        let resumes = conn.resumes.lock().clone();
        assert_eq!(resumes[0], None);
        assert_eq!(resumes[3].as_deref(), Some("1"));

        let mut degraded = 0;
        while let Ok(st) = rx.try_recv() {
            if st.kind == StatusKind::Degraded {
                degraded += 1;
            }
        }
        assert_eq!(degraded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_is_skipped_without_reconnect() {
        let conn = Scripted::new(vec![Ok(vec![
            msg(1),
            Ok(RawMessage::data("<html>")),
            msg(2),
        ])]);
        let (mut src, _bus) = source(conn.clone(), &cfg());

        let a = src.next_event().await.unwrap().unwrap();
        let b = src.next_event().await.unwrap().unwrap();
        assert_eq!(a.data["n"], 1);
        assert_eq!(b.data["n"], 2);
        assert_eq!(b.seq, 2);
        assert_eq!(conn.resumes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_attempts() {
        let conn = Scripted::new(vec![]);
        let cfg = RelayConfig {
            max_connect_attempts: 3,
            ..cfg()
        };
        let (mut src, _bus) = source(conn.clone(), &cfg);

        let err = src.next_event().await.unwrap_err();
        assert_eq!(err, SourceError::Exhausted { attempts: 3 });
        assert_eq!(conn.resumes.lock().len(), 3);
        assert_eq!(src.next_event().await.unwrap_err(), err);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_replaced() {
        let conn = Arc::new(Scripted {
            script: Mutex::new(vec![Ok(vec![msg(1)]), Ok(vec![msg(2)])].into()),
            resumes: Mutex::new(Vec::new()),
            hang_after: true,
        });
        let (mut src, bus) = source(conn.clone(), &cfg());
        let mut rx = bus.subscribe();

        assert_eq!(src.next_event().await.unwrap().unwrap().data["n"], 1);
        assert_eq!(src.next_event().await.unwrap().unwrap().data["n"], 2);

        let lost: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|s| s.kind == StatusKind::ConnectionLost)
            .collect();
        assert_eq!(lost.len(), 1);
        assert!(lost[0].reason.as_deref().unwrap_or("").contains("no data"));
    }

    #[tokio::test(start_paused = true)]
    async fn keepalives_hold_a_quiet_connection_open() {
        let conn = Arc::new(Heartbeat {
            first: Some("id: 1\ndata: {\"n\":1}\n\n"),
            connects: AtomicUsize::new(0),
        });
        let cfg = RelayConfig {
            idle_timeout: Duration::from_secs(90),
            ..cfg()
        };
        let bus = StatusBus::new(64);
        let mut rx = bus.subscribe();
        let mut src = StreamSource::new(conn.clone(), &cfg, bus, CancellationToken::new());

        assert_eq!(src.next_event().await.unwrap().unwrap().data["n"], 1);
        assert!(time::timeout(Duration::from_secs(600), src.next_event()).await.is_err());

        assert_eq!(conn.connects.load(Ordering::SeqCst), 1);
        assert!(src.is_connected());
        assert!(!drain_statuses(&mut rx).iter().any(|s| s.kind == StatusKind::ConnectionLost));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_only_upstream_is_not_exhausted() {
        let conn = Arc::new(Heartbeat {
            first: None,
            connects: AtomicUsize::new(0),
        });
        let cfg = RelayConfig {
            idle_timeout: Duration::from_secs(90),
            max_connect_attempts: 3,
            ..cfg()
        };
        let bus = StatusBus::new(64);
        let mut src = StreamSource::new(conn.clone(), &cfg, bus, CancellationToken::new());

        assert!(time::timeout(Duration::from_secs(3600), src.next_event()).await.is_err());
        assert_eq!(conn.connects.load(Ordering::SeqCst), 1);
    }

    fn doubling() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    fn lost_delays(rx: &mut tokio::sync::broadcast::Receiver<Status>) -> Vec<u64> {
        drain_statuses(rx)
            .into_iter()
            .filter(|s| s.kind == StatusKind::ConnectionLost)
            .filter_map(|s| s.delay_ms)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_connections_back_off() {
        let conn = Arc::new(OneShot {
            hold: Duration::ZERO,
            connects: AtomicUsize::new(0),
        });
        let cfg = RelayConfig {
            backoff: doubling(),
            idle_timeout: Duration::ZERO,
            ..RelayConfig::default()
        };
        let bus = StatusBus::new(64);
        let mut rx = bus.subscribe();
        let mut src = StreamSource::new(conn.clone(), &cfg, bus, CancellationToken::new());

        let started = time::Instant::now();
        for n in 1..=5 {
            assert_eq!(src.next_event().await.unwrap().unwrap().data["n"], n);
        }

        assert_eq!(conn.connects.load(Ordering::SeqCst), 5);
        assert_eq!(lost_delays(&mut rx), vec![1000, 2000, 4000, 8000]);
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn stable_connection_restarts_the_backoff_schedule() {
        let conn = Arc::new(OneShot {
            hold: Duration::from_secs(40),
            connects: AtomicUsize::new(0),
        });
        let cfg = RelayConfig {
            backoff: doubling(),
            idle_timeout: Duration::ZERO,
            ..RelayConfig::default()
        };
        let bus = StatusBus::new(64);
        let mut rx = bus.subscribe();
        let mut src = StreamSource::new(conn, &cfg, bus, CancellationToken::new());

        for _ in 0..4 {
            src.next_event().await.unwrap().unwrap();
        }
        assert_eq!(lost_delays(&mut rx), vec![1000, 1000, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_ends_the_sequence() {
        let conn = Arc::new(Scripted {
            script: Mutex::new(vec![Ok(vec![msg(1)])].into()),
            resumes: Mutex::new(Vec::new()),
            hang_after: true,
        });
        let (mut src, _bus) = source(conn, &cfg());
        assert!(src.next_event().await.unwrap().is_some());

        src.close();
        assert_eq!(src.next_event().await, Ok(None));
        assert_eq!(src.next_event().await, Ok(None));
        assert!(!src.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn close_interrupts_backoff() {
        let conn = Scripted::new(vec![]);
        let cfg = RelayConfig {
            backoff: BackoffPolicy::constant(Duration::from_secs(3600)),
            ..cfg()
        };
        let (mut src, _bus) = source(conn, &cfg);
        let token = src.close_token();

        let reader = tokio::spawn(async move { src.next_event().await });
        time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        assert_eq!(reader.await.unwrap(), Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn into_stream_yields_in_order() {
        let conn = Scripted::new(vec![Ok(vec![msg(1), msg(2), msg(3)])]);
        let cfg = RelayConfig {
            max_connect_attempts: 1,
            ..cfg()
        };
        let (src, _bus) = source(conn, &cfg);
        let seqs: Vec<u64> = src.into_stream().map(|e| e.seq).collect().await;
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
