//! Single-shot query unit.

use crate::fetch::Fetch;
use crate::gate::Gate;
use quench_core::{CacheKey, CacheResult, CacheStore, EntrySnapshot};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// A single-shot fetch bound to a cache key.
///
/// The unit ties together a key, a fetch function and an enablement gate.
/// Reading an enabled unit goes through the store's single-flight
/// `fetch_once`; reading a disabled unit returns the last known snapshot
/// (`Idle` if none exists) and performs no side effects. Disabling never
/// cancels a fetch already in flight — its result still lands in the cache
/// for later consumers.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(CacheStore::new());
/// let identity = SharedIdentity::signed_out();
///
/// let account = QueryUnit::new(
///     Arc::clone(&store),
///     CacheKey::new("account").push("u1"),
///     || async { remote::get_account("u1").await },
/// )
/// .with_gate(Gate::identity(&identity));
///
/// // stays idle until sign-in, then fetches exactly once
/// let snapshot = account.run().await?;
/// ```
pub struct QueryUnit<T, F> {
    store: Arc<CacheStore>,
    key: CacheKey,
    fetcher: F,
    gate: Gate,
    stale_after: Option<Duration>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> QueryUnit<T, F>
where
    T: Send + Sync + 'static,
    F: Fetch<T>,
{
    /// Creates an always-enabled unit.
    pub fn new(store: Arc<CacheStore>, key: CacheKey, fetcher: F) -> Self {
        Self {
            store,
            key,
            fetcher,
            gate: Gate::Always,
            stale_after: None,
            _marker: PhantomData,
        }
    }

    /// Sets the enablement gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// Overrides the store's default freshness window for this unit's key.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// The unit's cache key.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The unit's gate.
    #[must_use]
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Reads the unit.
    ///
    /// Disabled: returns the last known snapshot without fetching. Enabled:
    /// fetches through the store unless a fresh entry exists. Re-reading an
    /// errored key is the manual retry path — the error entry refetches.
    pub async fn read(&self) -> CacheResult<EntrySnapshot<T>> {
        if !self.gate.is_enabled() {
            trace!(key = %self.key, "query disabled; no fetch");
            return self.store.get::<T>(&self.key);
        }

        match self.stale_after {
            Some(stale_after) => {
                self.store
                    .fetch_once_with(&self.key, stale_after, || self.fetcher.fetch())
                    .await
            }
            None => self.store.fetch_once(&self.key, || self.fetcher.fetch()).await,
        }
    }

    /// Waits for the gate to open, then reads.
    ///
    /// This is the reactive dependent-query loop: when the prerequisite
    /// flips the gate true, exactly one fetch is issued (subject to the
    /// store's single-flight invariant).
    pub async fn run(&self) -> CacheResult<EntrySnapshot<T>> {
        self.gate.wait_enabled().await;
        self.read().await
    }

    /// Non-blocking read of the current snapshot, gated or not.
    pub fn snapshot(&self) -> CacheResult<EntrySnapshot<T>> {
        self.store.get::<T>(&self.key)
    }

    /// Discards the unit's entry; the next read refetches.
    pub fn invalidate(&self) {
        self.store.invalidate(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Toggle;
    use quench_core::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key() -> CacheKey {
        CacheKey::new("cards")
    }

    #[tokio::test]
    async fn enabled_unit_fetches_and_caches() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let fetch_calls = Arc::clone(&calls);
        let unit = QueryUnit::new(Arc::clone(&store), key(), move || {
            let calls = Arc::clone(&fetch_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(vec!["visa", "master"])
            }
        });

        let snap = unit.read().await.unwrap();
        assert_eq!(snap.data().map(Vec::len), Some(2));

        unit.read().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_unit_never_fetches() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let fetch_calls = Arc::clone(&calls);
        let unit = QueryUnit::new(Arc::clone(&store), key(), move || {
            let calls = Arc::clone(&fetch_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(1u32)
            }
        })
        .with_gate(Gate::never());

        let snap = unit.read().await.unwrap();
        assert!(snap.is_idle());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_unit_reports_last_known_state() {
        let store = Arc::new(CacheStore::new());
        let toggle = Toggle::new(true);

        let unit = QueryUnit::new(Arc::clone(&store), key(), || async {
            Ok::<_, FetchError>(7u32)
        })
        .with_gate(Gate::manual(&toggle));

        unit.read().await.unwrap();
        toggle.set(false);

        let snap = unit.read().await.unwrap();
        assert_eq!(snap.data(), Some(&7));
    }

    #[tokio::test]
    async fn toggling_enabled_triggers_exactly_one_fetch() {
        let store = Arc::new(CacheStore::new());
        let toggle = Toggle::new(false);
        let calls = Arc::new(AtomicU32::new(0));

        let fetch_calls = Arc::clone(&calls);
        let unit = QueryUnit::new(Arc::clone(&store), key(), move || {
            let calls = Arc::clone(&fetch_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(1u32)
            }
        })
        .with_gate(Gate::manual(&toggle));

        unit.read().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        toggle.set(true);
        unit.read().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Fresh entry: further reads do not refetch.
        unit.read().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_surfaces_without_throwing_and_retries() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let fetch_calls = Arc::clone(&calls);
        let unit = QueryUnit::new(Arc::clone(&store), key(), move || {
            let calls = Arc::clone(&fetch_calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FetchError::retryable("first attempt fails"))
                } else {
                    Ok(5u32)
                }
            }
        });

        let snap = unit.read().await.unwrap();
        assert!(snap.error().is_some());

        // Manual retry: re-request the same key.
        let snap = unit.read().await.unwrap();
        assert_eq!(snap.data(), Some(&5));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let fetch_calls = Arc::clone(&calls);
        let unit = QueryUnit::new(Arc::clone(&store), key(), move || {
            let calls = Arc::clone(&fetch_calls);
            async move { Ok::<_, FetchError>(calls.fetch_add(1, Ordering::SeqCst)) }
        });

        unit.read().await.unwrap();
        unit.invalidate();
        let snap = unit.read().await.unwrap();
        assert_eq!(snap.data(), Some(&1));
    }
}
