//! The cache store: single source of truth for every query unit.
//!
//! One store instance is created per session and injected into every unit
//! (`Arc<CacheStore>`); there are no module-level singletons. All mutation
//! goes through `fetch_once`, `publish_with` and `invalidate`; consumers
//! read snapshots and subscribe to the change feed.
//!
//! # Single flight
//!
//! At most one fetch is in flight per key. A `fetch_once` call that finds a
//! pending entry subscribes to the change feed *while still holding the map
//! lock*, then awaits the entry leaving the pending state. Because events
//! are emitted under the same lock, the waiter cannot miss the resolution.
//!
//! # Superseded flights
//!
//! Every fetch start is stamped with a flight token. `invalidate` removes
//! the entry (and with it the token), so a resolution arriving for a
//! removed or restarted entry is discarded instead of resurrecting stale
//! data. Caller-managed fetches get the same protection from entry
//! generations: `generation` captures the entry's insert-time token and
//! `publish_if` refuses to publish against a different one.

use crate::config::StoreConfig;
use crate::entry::{CacheEntry, EntrySnapshot, EntryState, Payload};
use crate::error::{CacheError, CacheResult, FetchError};
use crate::feed::{CacheEvent, ChangeFeed, ChangeKind};
use crate::key::CacheKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Process-wide keyed store mapping cache keys to entries.
pub struct CacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    feed: ChangeFeed,
    config: StoreConfig,
    /// Mints flight and generation tokens; shared so both are unique.
    next_token: AtomicU64,
}

/// What `fetch_once` decided to do after inspecting the entry.
enum FetchPlan {
    /// Entry is fresh; return it as-is.
    Cached(CacheEntry),
    /// Another caller's fetch is in flight; wait for it on the feed.
    Wait(broadcast::Receiver<CacheEvent>),
    /// This caller owns the fetch, stamped with the given flight token.
    Fetch(u64),
}

impl CacheStore {
    /// Creates a store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a store with the given configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            feed: ChangeFeed::new(config.feed_capacity),
            config,
            next_token: AtomicU64::new(0),
        }
    }

    /// Non-blocking typed read. Returns `Idle` when no entry exists.
    pub fn get<T: Send + Sync + 'static>(&self, key: &CacheKey) -> CacheResult<EntrySnapshot<T>> {
        let entries = self.entries.lock();
        match entries.get(key) {
            None => Ok(EntrySnapshot::Idle),
            Some(entry) => Self::snapshot(key, entry),
        }
    }

    /// Returns true if the key's entry is absent, pending, errored or past
    /// its freshness window.
    #[must_use]
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        let entries = self.entries.lock();
        entries.get(key).map_or(true, CacheEntry::is_stale)
    }

    /// Discards the entry for `key`; the next read refetches.
    ///
    /// Removing the entry also drops its flight token, so a fetch still in
    /// flight for the old generation resolves into nothing.
    pub fn invalidate(&self, key: &CacheKey) {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            debug!(key = %key, "cache entry invalidated");
            self.feed
                .emit(CacheEvent::new(key.clone(), ChangeKind::Invalidated));
        }
    }

    /// Subscribes to the change feed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.feed.subscribe()
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Fetches the entry for `key` at most once concurrently.
    ///
    /// - Fresh success: returns the cached snapshot without fetching.
    /// - Pending: awaits the in-flight fetch and returns its outcome.
    /// - Absent, stale, errored or invalidated: runs `fetch`, then resolves
    ///   or rejects the entry atomically.
    ///
    /// Uses the store's default freshness window; see
    /// [`CacheStore::fetch_once_with`] to override it per call.
    pub async fn fetch_once<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> CacheResult<EntrySnapshot<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let stale_after = self.config.default_stale_after;
        self.fetch_once_with(key, stale_after, fetch).await
    }

    /// [`CacheStore::fetch_once`] with an explicit freshness window.
    pub async fn fetch_once_with<T, F, Fut>(
        &self,
        key: &CacheKey,
        stale_after: Duration,
        fetch: F,
    ) -> CacheResult<EntrySnapshot<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let flight = match self.plan(key, stale_after) {
            FetchPlan::Cached(entry) => return Self::snapshot(key, &entry),
            FetchPlan::Wait(rx) => return self.wait_for_flight(key, rx).await,
            FetchPlan::Fetch(flight) => flight,
        };

        trace!(key = %key, flight, "fetch started");
        match fetch().await {
            Ok(data) => self.fetch_resolve(key, flight, Arc::new(data) as Payload),
            Err(error) => self.fetch_reject(key, flight, error),
        }

        let entries = self.entries.lock();
        match entries.get(key) {
            // Invalidated while we were fetching; superseded, report idle.
            None => Ok(EntrySnapshot::Idle),
            Some(entry) => Self::snapshot(key, entry),
        }
    }

    /// Atomically publishes a success payload computed from the previous one.
    ///
    /// This is the resolve-variant used by pagination to append a page to an
    /// accumulated result. It bypasses the pending protocol: the caller is
    /// responsible for serializing its own fetches (the paginated unit's
    /// in-flight guard does exactly that).
    pub fn publish_with<T, F>(&self, key: &CacheKey, update: F) -> CacheResult<EntrySnapshot<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> T,
    {
        let mut entries = self.entries.lock();
        let previous = match entries.get(key) {
            Some(entry) => match entry.data.as_ref() {
                Some(payload) => Some(Self::downcast::<T>(key, payload)?),
                None => None,
            },
            None => None,
        };
        let data: Arc<T> = Arc::new(update(previous.as_deref()));

        let (stale_after, generation) = entries.get(key).map_or_else(
            || {
                let minted = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
                (self.config.default_stale_after, minted)
            },
            |e| (e.stale_after, e.generation),
        );
        entries.insert(
            key.clone(),
            CacheEntry {
                state: EntryState::Success,
                data: Some(data.clone() as Payload),
                error: None,
                fetched_at: Instant::now(),
                stale_after,
                flight: None,
                generation,
            },
        );
        self.feed
            .emit(CacheEvent::new(key.clone(), ChangeKind::Resolved));
        Ok(EntrySnapshot::Success(data))
    }

    /// Generation token of the current entry, if one exists.
    #[must_use]
    pub fn generation(&self, key: &CacheKey) -> Option<u64> {
        let entries = self.entries.lock();
        entries.get(key).map(|entry| entry.generation)
    }

    /// [`CacheStore::publish_with`], guarded by an entry generation.
    ///
    /// Returns `Ok(None)` when the entry was invalidated or replaced since
    /// `generation` was captured; the payload is dropped, mirroring the
    /// flight-token check on `fetch_once` resolutions.
    pub fn publish_if<T, F>(
        &self,
        key: &CacheKey,
        generation: u64,
        update: F,
    ) -> CacheResult<Option<EntrySnapshot<T>>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> T,
    {
        let mut entries = self.entries.lock();
        let entry = match entries.get_mut(key) {
            Some(entry) if entry.generation == generation => entry,
            _ => {
                trace!(key = %key, generation, "superseded publish discarded");
                return Ok(None);
            }
        };
        let previous = match entry.data.as_ref() {
            Some(payload) => Some(Self::downcast::<T>(key, payload)?),
            None => None,
        };
        let data: Arc<T> = Arc::new(update(previous.as_deref()));
        entry.state = EntryState::Success;
        entry.data = Some(data.clone() as Payload);
        entry.error = None;
        entry.fetched_at = Instant::now();
        entry.flight = None;
        self.feed
            .emit(CacheEvent::new(key.clone(), ChangeKind::Resolved));
        Ok(Some(EntrySnapshot::Success(data)))
    }

    /// Decides, under the map lock, whether to reuse, wait or fetch.
    fn plan(&self, key: &CacheKey, stale_after: Duration) -> FetchPlan {
        let mut entries = self.entries.lock();
        let carried = match entries.get(key) {
            Some(entry) if entry.state == EntryState::Pending => {
                // Subscribe before the lock drops so the resolution event
                // cannot be missed.
                return FetchPlan::Wait(self.feed.subscribe());
            }
            Some(entry) if entry.state == EntryState::Success && !entry.is_stale() => {
                return FetchPlan::Cached(entry.clone());
            }
            Some(entry) => Some((entry.data.clone(), entry.fetched_at)),
            None => None,
        };

        let flight = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = CacheEntry::pending(flight, stale_after);
        // Keep the previous payload readable during a refetch.
        if let Some((data, fetched_at)) = carried {
            pending.data = data;
            pending.fetched_at = fetched_at;
        }
        entries.insert(key.clone(), pending);
        self.feed
            .emit(CacheEvent::new(key.clone(), ChangeKind::FetchStarted));
        FetchPlan::Fetch(flight)
    }

    /// Applies a successful fetch, unless the flight was superseded.
    fn fetch_resolve(&self, key: &CacheKey, flight: u64, data: Payload) {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.flight == Some(flight) => {
                entry.state = EntryState::Success;
                entry.data = Some(data);
                entry.error = None;
                entry.fetched_at = Instant::now();
                entry.flight = None;
                debug!(key = %key, flight, "fetch resolved");
                self.feed
                    .emit(CacheEvent::new(key.clone(), ChangeKind::Resolved));
            }
            _ => {
                trace!(key = %key, flight, "stale fetch result discarded");
            }
        }
    }

    /// Records a failed fetch, unless the flight was superseded.
    fn fetch_reject(&self, key: &CacheKey, flight: u64, error: FetchError) {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.flight == Some(flight) => {
                entry.state = EntryState::Error;
                entry.error = Some(error);
                entry.flight = None;
                debug!(key = %key, flight, "fetch rejected");
                self.feed
                    .emit(CacheEvent::new(key.clone(), ChangeKind::Rejected));
            }
            _ => {
                trace!(key = %key, flight, "stale fetch failure discarded");
            }
        }
    }

    /// Awaits the in-flight fetch for `key` and returns its outcome.
    async fn wait_for_flight<T: Send + Sync + 'static>(
        &self,
        key: &CacheKey,
        mut rx: broadcast::Receiver<CacheEvent>,
    ) -> CacheResult<EntrySnapshot<T>> {
        loop {
            match rx.recv().await {
                Ok(event) if &event.key == key => {
                    let entries = self.entries.lock();
                    match entries.get(key) {
                        None => return Ok(EntrySnapshot::Idle),
                        Some(entry) if entry.state != EntryState::Pending => {
                            return Self::snapshot(key, entry);
                        }
                        // Still pending (e.g. a FetchStarted echo); keep waiting.
                        Some(_) => {}
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed events; re-check the entry directly.
                    let entries = self.entries.lock();
                    match entries.get(key) {
                        None => return Ok(EntrySnapshot::Idle),
                        Some(entry) if entry.state != EntryState::Pending => {
                            return Self::snapshot(key, entry);
                        }
                        Some(_) => {}
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CacheError::FeedClosed {
                        key: key.to_string(),
                    });
                }
            }
        }
    }

    fn snapshot<T: Send + Sync + 'static>(
        key: &CacheKey,
        entry: &CacheEntry,
    ) -> CacheResult<EntrySnapshot<T>> {
        match entry.state {
            // A pending refetch keeps the previous payload readable.
            EntryState::Pending => Ok(EntrySnapshot::Pending(match entry.data.as_ref() {
                Some(payload) => Some(Self::downcast::<T>(key, payload)?),
                None => None,
            })),
            EntryState::Error => Ok(EntrySnapshot::Error(
                entry
                    .error
                    .clone()
                    .unwrap_or_else(|| FetchError::fatal("fetch rejected")),
            )),
            EntryState::Success => match entry.data.as_ref() {
                Some(payload) => Ok(EntrySnapshot::Success(Self::downcast::<T>(key, payload)?)),
                None => Ok(EntrySnapshot::Idle),
            },
        }
    }

    fn downcast<T: Send + Sync + 'static>(
        key: &CacheKey,
        payload: &Payload,
    ) -> CacheResult<Arc<T>> {
        payload
            .clone()
            .downcast::<T>()
            .map_err(|_| CacheError::TypeMismatch {
                key: key.to_string(),
            })
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.lock().len())
            .field("config", &self.config)
            .finish()
    }
}
