//! Session lifecycle primitives shared by both execution tiers
//!
//! Every preview session owns one `Lifecycle`: its timestamps, its state
//! machine, a one-shot stop signal, and an exactly-once teardown guard.
//! Both the backend-process tier and the container tier embed this type in
//! their session records and drive the same transitions through it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use vitrine_spec::ProjectId;

/// Session state machine: Created → Ready → Active → Stopping → Terminated.
/// Ready means the port was confirmed reachable (or, for containers, the
/// launch succeeded even if unconfirmed); Active is re-entered on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Ready,
    Active,
    Stopping,
    Terminated,
}

/// Timestamps, state, and cancellation for one session
#[derive(Debug)]
pub struct Lifecycle {
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    last_access: Mutex<(Instant, DateTime<Utc>)>,
    state: Mutex<SessionState>,
    stop: CancellationToken,
    teardown_started: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        let now = Instant::now();
        let now_utc = Utc::now();
        Self {
            started_at: now,
            started_at_utc: now_utc,
            last_access: Mutex::new((now, now_utc)),
            state: Mutex::new(SessionState::Created),
            stop: CancellationToken::new(),
            teardown_started: AtomicBool::new(false),
        }
    }

    /// Backdate the start time; used by sweep tests to fabricate old sessions
    #[cfg(test)]
    pub fn backdated(age: Duration) -> Self {
        let mut lifecycle = Self::new();
        lifecycle.started_at = Instant::now()
            .checked_sub(age)
            .expect("backdate exceeds clock range");
        lifecycle
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    /// Refresh last-access; also re-enters Active from Ready
    pub fn touch(&self) {
        *self.last_access.lock().expect("lifecycle lock poisoned") = (Instant::now(), Utc::now());
        let mut state = self.state.lock().expect("lifecycle lock poisoned");
        if matches!(*state, SessionState::Ready | SessionState::Active) {
            *state = SessionState::Active;
        }
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.last_access.lock().expect("lifecycle lock poisoned").1
    }

    /// Time since the session started
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the session was last accessed
    pub fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .expect("lifecycle lock poisoned")
            .0
            .elapsed()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("lifecycle lock poisoned")
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("lifecycle lock poisoned") = state;
    }

    /// One-shot stop signal observed by the session's background tasks
    /// (output pumps, readiness poller). Safe to trip repeatedly.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn signal_stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Claim the teardown. Returns true exactly once, no matter how many
    /// callers race (idle sweep vs explicit stop), so resource release on
    /// the Terminated transition fires a single time.
    pub fn begin_teardown(&self) -> bool {
        let claimed = !self.teardown_started.swap(true, Ordering::SeqCst);
        if claimed {
            self.set_state(SessionState::Stopping);
        }
        claimed
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Status payload returned by both tiers
#[derive(Debug, Clone, Serialize)]
pub struct PreviewStatus {
    pub project_id: ProjectId,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_access: Option<DateTime<Utc>>,
}

impl PreviewStatus {
    /// Status for a project with no live session
    pub fn inactive(project_id: ProjectId) -> Self {
        Self {
            project_id,
            active: false,
            port: None,
            url: None,
            started_at: None,
            last_access: None,
        }
    }

    pub fn active(project_id: ProjectId, port: u16, lifecycle: &Lifecycle) -> Self {
        Self {
            project_id,
            active: true,
            port: Some(port),
            url: Some(format!("http://127.0.0.1:{}", port)),
            started_at: Some(lifecycle.started_at()),
            last_access: Some(lifecycle.last_access()),
        }
    }
}
