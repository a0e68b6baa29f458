//! Polling query unit.
//!
//! A polling query re-invokes a status-returning fetch on a fixed interval
//! while enabled, classifies each result, and fires a terminal side-effect
//! callback exactly once. The primary hazard is the stale tick: a naive
//! timer fires its callback after the consumer stopped caring. Every tick
//! therefore checks the session's liveness flag before any side effect, and
//! the callbacks themselves are `FnOnce` values consumed on the terminal
//! transition — "exactly once" is structural, not a scattered conditional.

use crate::fetch::Fetch;
use crate::gate::Gate;
use parking_lot::Mutex;
use quench_core::{CacheKey, CacheStore, FetchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// How a polled status is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Keep polling.
    Continue,
    /// Terminal success; fire the success callback once and stop.
    Success,
    /// Terminal failure; fire the error callback once and stop.
    Failure,
}

/// Canonical status set for slow asynchronous checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    /// The check has not started yet.
    Ready,
    /// The check is running.
    InProgress,
    /// The check finished successfully.
    Complete,
    /// The check was rejected.
    Rejected,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckStatus::Ready => "ready",
            CheckStatus::InProgress => "in-progress",
            CheckStatus::Complete => "complete",
            CheckStatus::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Default classifier for [`CheckStatus`]: `Complete` is success, `Rejected`
/// is failure, everything else keeps polling.
#[must_use]
pub fn classify_check_status(status: &CheckStatus) -> Classification {
    match status {
        CheckStatus::Complete => Classification::Success,
        CheckStatus::Rejected => Classification::Failure,
        CheckStatus::Ready | CheckStatus::InProgress => Classification::Continue,
    }
}

/// State of a polling query unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Not polling (gate closed, or never started).
    Idle,
    /// Actively polling.
    Polling,
    /// A result classified as success ended the session.
    TerminalSuccess,
    /// A result classified as failure (or a fetch error) ended the session.
    TerminalError,
}

/// Ephemeral per-session state shared between the poll task and its handle.
struct PollSession {
    live: AtomicBool,
    state: Mutex<PollState>,
}

impl PollSession {
    fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            state: Mutex::new(PollState::Idle),
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// A polling query, built then consumed by [`PollingQuery::start`].
///
/// Each observed status is also published into the cache store under the
/// unit's key, so plain readers can follow the latest status.
pub struct PollingQuery<S, F, C> {
    store: Arc<CacheStore>,
    key: CacheKey,
    fetcher: F,
    classifier: C,
    interval: Duration,
    gate: Gate,
    on_success: Option<Box<dyn FnOnce(S) + Send>>,
    on_error: Option<Box<dyn FnOnce(FetchError) + Send>>,
}

impl<S, F, C> PollingQuery<S, F, C>
where
    S: Clone + fmt::Debug + Send + Sync + 'static,
    F: Fetch<S> + Send + 'static,
    C: Fn(&S) -> Classification + Send + 'static,
{
    /// Creates a polling query with the given interval.
    pub fn new(
        store: Arc<CacheStore>,
        key: CacheKey,
        fetcher: F,
        classifier: C,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            key,
            fetcher,
            classifier,
            interval,
            gate: Gate::Always,
            on_success: None,
            on_error: None,
        }
    }

    /// Sets the enablement gate. While the gate is closed the loop idles;
    /// ticks are discarded, no callbacks fire, and polling resumes when the
    /// gate reopens.
    #[must_use]
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// Callback fired exactly once when a result classifies as success.
    #[must_use]
    pub fn on_success(mut self, callback: impl FnOnce(S) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Callback fired exactly once when a result classifies as failure or
    /// the fetch itself fails.
    #[must_use]
    pub fn on_error(mut self, callback: impl FnOnce(FetchError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Spawns the poll loop and returns its handle.
    ///
    /// The loop fetches immediately once enabled, then on every interval.
    /// Terminal classifications consume their callback and end the session;
    /// [`PollHandle::stop`] (or dropping the handle) tears the session down
    /// and suppresses any tick still in flight.
    #[must_use]
    pub fn start(self) -> PollHandle {
        let session = Arc::new(PollSession::new());
        let task_session = Arc::clone(&session);

        let PollingQuery {
            store,
            key,
            fetcher,
            classifier,
            interval,
            gate,
            mut on_success,
            mut on_error,
        } = self;

        let task = tokio::spawn(async move {
            loop {
                if !task_session.is_live() {
                    break;
                }

                if !gate.is_enabled() {
                    *task_session.state.lock() = PollState::Idle;
                    trace!(key = %key, "polling paused; gate closed");
                    gate.wait_enabled().await;
                    continue;
                }

                *task_session.state.lock() = PollState::Polling;
                let result = fetcher.fetch().await;

                // Stale tick suppression: a session stopped while the fetch
                // was suspended must observe no side effects at all.
                if !task_session.is_live() {
                    trace!(key = %key, "stale tick suppressed");
                    break;
                }
                if !gate.is_enabled() {
                    trace!(key = %key, "tick discarded; gate closed mid-flight");
                    continue;
                }

                match result {
                    Ok(status) => {
                        let class = classifier(&status);
                        trace!(key = %key, status = ?status, class = ?class, "poll tick");
                        let publish = status.clone();
                        let _ = store.publish_with::<S, _>(&key, |_| publish);

                        match class {
                            Classification::Continue => {}
                            Classification::Success => {
                                *task_session.state.lock() = PollState::TerminalSuccess;
                                debug!(key = %key, "poll terminal success");
                                if let Some(callback) = on_success.take() {
                                    callback(status);
                                }
                                break;
                            }
                            Classification::Failure => {
                                *task_session.state.lock() = PollState::TerminalError;
                                debug!(key = %key, "poll terminal failure");
                                if let Some(callback) = on_error.take() {
                                    callback(FetchError::fatal(format!(
                                        "status classified as failure: {status:?}"
                                    )));
                                }
                                break;
                            }
                        }
                    }
                    Err(error) => {
                        *task_session.state.lock() = PollState::TerminalError;
                        debug!(key = %key, error = %error, "poll fetch failed");
                        if let Some(callback) = on_error.take() {
                            callback(error);
                        }
                        break;
                    }
                }

                tokio::time::sleep(interval).await;
            }
        });

        PollHandle {
            session,
            task: Some(task),
        }
    }
}

/// Handle to a running poll session.
///
/// Dropping the handle tears the session down the same way [`PollHandle::stop`]
/// does.
pub struct PollHandle {
    session: Arc<PollSession>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Current state of the session.
    #[must_use]
    pub fn state(&self) -> PollState {
        *self.session.state.lock()
    }

    /// Returns true while the session has not been stopped.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.session.is_live()
    }

    /// Returns true once a terminal state was reached.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state(),
            PollState::TerminalSuccess | PollState::TerminalError
        )
    }

    /// Ends the session: the scheduled tick is discarded and no further
    /// callbacks fire.
    pub fn stop(&self) {
        self.session.live.store(false, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Waits for the poll loop to finish (terminal state or stop).
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            // An aborted task is a normal way for a session to end.
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
