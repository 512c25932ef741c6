/// Lifecycle of a [`RelayService`](crate::RelayService).
///
/// ```text
/// Idle ──start()──► Running ──stop()──► Stopping ──(drained or grace)──► Stopped
///                       │                    ▲
///                       └── source gave up ──┘  (stop() still required)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    /// Built, not started. The registry may already hold subscribers.
    Idle,
    /// Ingesting and fanning out.
    Running,
    /// `stop()` in progress, or the source gave up and `stop()` has not
    /// collected its error yet. Commands are rejected.
    Stopping,
    /// Terminal.
    Stopped,
}

impl RelayState {
    /// Stable lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Idle => "idle",
            RelayState::Running => "running",
            RelayState::Stopping => "stopping",
            RelayState::Stopped => "stopped",
        }
    }
}
