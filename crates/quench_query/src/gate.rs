//! Enablement gating and dependent composition.
//!
//! A [`Gate`] is a unit's `enabled` predicate. Besides plain on/off toggles,
//! a gate can read another unit's cached data as a precondition — an
//! account-scoped query waits for an identity, a banner query waits for the
//! account entry to report a completed status. A gate that evaluates to
//! false is a *gating state*, not an error: the unit reports its last known
//! snapshot and performs no fetch.
//!
//! Re-evaluation is reactive. [`Gate::wait_enabled`] subscribes to every
//! source that could flip the verdict (toggle and identity watch channels,
//! the store's change feed) *before* checking, so an event landing between
//! the check and the await is never missed.

use futures_util::future::{select_all, BoxFuture};
use futures_util::FutureExt;
use quench_core::{
    CacheEvent, CacheKey, CacheStore, EntrySnapshot, IdentitySource, SharedIdentity, Subject,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// A shared on/off switch for manually enabled units.
///
/// Clones share state; flipping any clone wakes every gate holding one.
#[derive(Debug, Clone)]
pub struct Toggle {
    sender: watch::Sender<bool>,
}

impl Toggle {
    /// Creates a toggle in the given position.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        let (sender, _) = watch::channel(enabled);
        Self { sender }
    }

    /// Flips the toggle.
    pub fn set(&self, enabled: bool) {
        self.sender.send_replace(enabled);
    }

    /// Current position.
    #[must_use]
    pub fn get(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// A unit's enablement predicate.
#[derive(Clone)]
pub enum Gate {
    /// Always enabled (the default for ungated queries).
    Always,
    /// Never enabled.
    Never,
    /// Enabled while a [`Toggle`] is on.
    Manual(Toggle),
    /// Enabled while the identity source resolves a subject.
    Identity(SharedIdentity),
    /// Enabled while a prerequisite cache entry satisfies a predicate.
    Entry {
        /// Store holding the prerequisite entry.
        store: Arc<CacheStore>,
        /// Synchronous re-evaluation of the predicate against the store.
        check: Arc<dyn Fn(&CacheStore) -> bool + Send + Sync>,
    },
    /// Enabled while every child gate is enabled.
    All(Vec<Gate>),
}

impl Gate {
    /// Gate that is always open.
    #[must_use]
    pub fn always() -> Self {
        Gate::Always
    }

    /// Gate that never opens.
    #[must_use]
    pub fn never() -> Self {
        Gate::Never
    }

    /// Gate controlled by a manual toggle.
    #[must_use]
    pub fn manual(toggle: &Toggle) -> Self {
        Gate::Manual(toggle.clone())
    }

    /// Gate open while a subject is signed in.
    #[must_use]
    pub fn identity(identity: &SharedIdentity) -> Self {
        Gate::Identity(identity.clone())
    }

    /// Gate open while the entry at `key` is a success whose data satisfies
    /// `predicate`. Pending, errored, absent and stale-refetching entries do
    /// not satisfy the gate unless their resolved data does.
    #[must_use]
    pub fn entry<T, P>(store: Arc<CacheStore>, key: CacheKey, predicate: P) -> Self
    where
        T: Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let check = Arc::new(move |s: &CacheStore| {
            matches!(s.get::<T>(&key), Ok(EntrySnapshot::Success(data)) if predicate(&data))
        });
        Gate::Entry { store, check }
    }

    /// Conjunction of gates: open only when all children are open.
    #[must_use]
    pub fn all(gates: impl IntoIterator<Item = Gate>) -> Self {
        Gate::All(gates.into_iter().collect())
    }

    /// Synchronously re-evaluates the predicate.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            Gate::Always => true,
            Gate::Never => false,
            Gate::Manual(toggle) => toggle.get(),
            Gate::Identity(identity) => identity.current().is_some(),
            Gate::Entry { store, check } => check(store),
            Gate::All(gates) => gates.iter().all(Gate::is_enabled),
        }
    }

    /// Waits until the gate is open.
    ///
    /// Returns immediately when already open. A [`Gate::Never`] (or an
    /// `All` containing one) waits forever; callers that might hold such a
    /// gate should race this against their own teardown signal.
    pub async fn wait_enabled(&self) {
        loop {
            // Subscribe first, check second: an event landing in between is
            // delivered to the subscriptions and re-checked next iteration.
            let mut sources = Vec::new();
            self.wake_sources(&mut sources);

            if self.is_enabled() {
                return;
            }

            if sources.is_empty() {
                // Nothing can ever flip this gate.
                std::future::pending::<()>().await;
            }

            let futures: Vec<BoxFuture<'static, ()>> =
                sources.into_iter().map(WakeSource::wait).collect();
            let _ = select_all(futures).await;
        }
    }

    /// Collects one subscription per source that could flip the verdict.
    fn wake_sources(&self, sources: &mut Vec<WakeSource>) {
        match self {
            Gate::Always | Gate::Never => {}
            Gate::Manual(toggle) => sources.push(WakeSource::Toggle(toggle.subscribe())),
            Gate::Identity(identity) => sources.push(WakeSource::Identity(identity.subscribe())),
            Gate::Entry { store, .. } => sources.push(WakeSource::Feed(store.subscribe())),
            Gate::All(gates) => {
                for gate in gates {
                    gate.wake_sources(sources);
                }
            }
        }
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gate::Always => write!(f, "Gate::Always"),
            Gate::Never => write!(f, "Gate::Never"),
            Gate::Manual(toggle) => write!(f, "Gate::Manual({})", toggle.get()),
            Gate::Identity(_) => write!(f, "Gate::Identity"),
            Gate::Entry { .. } => write!(f, "Gate::Entry"),
            Gate::All(gates) => f.debug_tuple("Gate::All").field(gates).finish(),
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Gate::Always
    }
}

/// One subscribed wake-up source.
enum WakeSource {
    Toggle(watch::Receiver<bool>),
    Identity(watch::Receiver<Option<Subject>>),
    Feed(broadcast::Receiver<CacheEvent>),
}

impl WakeSource {
    /// Resolves on the next event from this source. A closed source parks
    /// forever instead of waking in a busy loop.
    fn wait(self) -> BoxFuture<'static, ()> {
        match self {
            WakeSource::Toggle(mut rx) => async move {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            .boxed(),
            WakeSource::Identity(mut rx) => async move {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            .boxed(),
            WakeSource::Feed(mut rx) => async move {
                loop {
                    match rx.recv().await {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => return,
                        Err(broadcast::error::RecvError::Closed) => {
                            std::future::pending::<()>().await;
                        }
                    }
                }
            }
            .boxed(),
        }
    }
}
