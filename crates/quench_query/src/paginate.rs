//! Cursor-paginated query unit.
//!
//! A paginated query fetches successive pages keyed by an opaque cursor
//! returned from the previous page, accumulating an ordered, append-only
//! sequence of pages in a single cache entry. A null cursor is the sentinel
//! for "no more pages".
//!
//! The unit is a state machine:
//!
//! ```text
//! Idle ──fetch──▶ FetchingFirst ──ok──▶ NextReady ◀─ok── FetchingNext
//!                      │                    │                 ▲
//!                      ▼                    └──fetch_next─────┘
//!                    Error ◀──────────────err┘
//!                     (accumulated pages preserved; retry allowed)
//!
//! NextReady/FetchingNext ──null cursor──▶ NoMorePages (further calls no-op)
//! ```
//!
//! A `fetch_next` issued while a fetch is already in flight is an idempotent
//! no-op, which is what keeps the page order append-only and duplicate-free.

use crate::gate::Gate;
use parking_lot::Mutex;
use quench_core::{CacheKey, CacheResult, CacheStore, EntrySnapshot, FetchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

/// Opaque pagination token produced by one page fetch and consumed by the
/// next. Only the remote side interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// One fetched unit of a paginated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Records in this page, in remote order.
    pub items: Vec<T>,
    /// Cursor for the following page; `None` means no more pages.
    pub cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// Creates a page.
    pub fn new(items: Vec<T>, cursor: Option<Cursor>) -> Self {
        Self { items, cursor }
    }
}

/// Accumulated pages in fetch order, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pages: Vec<Page<T>>,
}

impl<T> Paginated<T> {
    /// The accumulated pages.
    #[must_use]
    pub fn pages(&self) -> &[Page<T>] {
        &self.pages
    }

    /// Cursor for the next fetch, if the last page carried one.
    #[must_use]
    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.pages.last().and_then(|page| page.cursor.as_ref())
    }

    /// Iterates all accumulated records in append order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    /// Flattens the pages into one record sequence.
    #[must_use]
    pub fn flatten(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }

    /// Total number of accumulated records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }

    /// Returns true when no records have been accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Paginated<T> {
    fn default() -> Self {
        Self { pages: Vec::new() }
    }
}

/// A cursor-taking page fetch.
///
/// `cursor` is `None` for the first page. Implemented for any
/// `Fn(Option<Cursor>) -> Future` closure.
pub trait FetchPage<T>: Send + Sync {
    /// Fetches one page.
    fn fetch_page(
        &self,
        cursor: Option<Cursor>,
    ) -> impl Future<Output = Result<Page<T>, FetchError>> + Send;
}

impl<T, F, Fut> FetchPage<T> for F
where
    F: Fn(Option<Cursor>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>, FetchError>> + Send,
{
    fn fetch_page(
        &self,
        cursor: Option<Cursor>,
    ) -> impl Future<Output = Result<Page<T>, FetchError>> + Send {
        (self)(cursor)
    }
}

/// State of a paginated query unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Nothing fetched yet.
    Idle,
    /// First page fetch in flight.
    FetchingFirst,
    /// At least one page accumulated; ready to fetch the next.
    NextReady,
    /// Follow-up page fetch in flight.
    FetchingNext,
    /// The last page carried a null cursor; `fetch_next` is a no-op.
    NoMorePages,
    /// The newest page attempt failed; accumulated pages are preserved and
    /// the same cursor may be retried.
    Error,
}

/// What `fetch_next` decided to do after inspecting the state machine.
enum NextPlan {
    /// In flight or exhausted; nothing to do.
    Noop,
    /// No pages yet; fetch the first page.
    First,
    /// Fetch the page after `cursor`; `generation` pins the cache entry the
    /// new page is allowed to be appended to.
    Fetch { cursor: Cursor, generation: u64 },
}

/// Cursor-paginated query unit.
///
/// The accumulated [`Paginated`] result lives in the cache store under the
/// unit's key, so invalidating the key clears the whole result and a filter
/// parameter baked into the key restarts pagination from scratch when it
/// changes.
pub struct PaginatedQuery<T, F> {
    store: Arc<CacheStore>,
    key: CacheKey,
    fetcher: F,
    gate: Gate,
    state: Mutex<PageState>,
    last_error: Mutex<Option<FetchError>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> PaginatedQuery<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: FetchPage<T>,
{
    /// Creates an always-enabled paginated unit.
    pub fn new(store: Arc<CacheStore>, key: CacheKey, fetcher: F) -> Self {
        Self {
            store,
            key,
            fetcher,
            gate: Gate::Always,
            state: Mutex::new(PageState::Idle),
            last_error: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Sets the enablement gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// The unit's cache key (including any filter segments).
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Current state of the pagination machine.
    #[must_use]
    pub fn state(&self) -> PageState {
        *self.state.lock()
    }

    /// Error recorded by the newest failed page attempt, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<FetchError> {
        self.last_error.lock().clone()
    }

    /// Non-blocking read of the accumulated result.
    pub fn pages(&self) -> CacheResult<EntrySnapshot<Paginated<T>>> {
        self.store.get::<Paginated<T>>(&self.key)
    }

    /// Flattened accumulated records, in strict append order.
    pub fn flattened(&self) -> CacheResult<Vec<T>> {
        Ok(self
            .pages()?
            .data()
            .map(Paginated::flatten)
            .unwrap_or_default())
    }

    /// Fetches the first page when enabled and none is cached.
    ///
    /// Reads by other consumers of the same key attach to the same flight
    /// through the store's single-flight protocol.
    pub async fn fetch_first(&self) -> CacheResult<EntrySnapshot<Paginated<T>>> {
        if !self.gate.is_enabled() {
            trace!(key = %self.key, "paginated query disabled; no fetch");
            return self.pages();
        }

        {
            let mut state = self.state.lock();
            match *state {
                PageState::FetchingFirst | PageState::FetchingNext => return self.pages(),
                PageState::NextReady | PageState::NoMorePages => return self.pages(),
                PageState::Error if self.has_pages() => {
                    // The first page succeeded earlier; nothing to do here.
                    *state = PageState::NextReady;
                    return self.pages();
                }
                PageState::Idle | PageState::Error => *state = PageState::FetchingFirst,
            }
        }

        let snapshot = self
            .store
            .fetch_once(&self.key, || async {
                let page = self.fetcher.fetch_page(None).await?;
                Ok(Paginated { pages: vec![page] })
            })
            .await?;

        self.settle(&snapshot);
        Ok(snapshot)
    }

    /// Requests the page after the last fetched one.
    ///
    /// No-op while a fetch is in flight or once a null cursor was observed.
    /// On failure the accumulated pages survive and the same cursor may be
    /// retried by calling this again.
    pub async fn fetch_next(&self) -> CacheResult<EntrySnapshot<Paginated<T>>> {
        if !self.gate.is_enabled() {
            trace!(key = %self.key, "paginated query disabled; no fetch");
            return self.pages();
        }

        let plan = self.plan_next()?;
        let (cursor, generation) = match plan {
            NextPlan::Noop => return self.pages(),
            NextPlan::First => return self.fetch_first().await,
            NextPlan::Fetch { cursor, generation } => (cursor, generation),
        };

        trace!(key = %self.key, cursor = %cursor, "fetching next page");
        match self.fetcher.fetch_page(Some(cursor.clone())).await {
            Ok(page) => {
                let exhausted = page.cursor.is_none();
                let published =
                    self.store
                        .publish_if::<Paginated<T>, _>(&self.key, generation, |prev| {
                            let mut result = prev.cloned().unwrap_or_default();
                            result.pages.push(page);
                            result
                        })?;
                let Some(snapshot) = published else {
                    // Entry invalidated or replaced mid-fetch; the page
                    // belongs to a discarded result.
                    trace!(key = %self.key, cursor = %cursor, "appended page superseded");
                    *self.state.lock() = PageState::Idle;
                    return self.pages();
                };
                *self.last_error.lock() = None;
                *self.state.lock() = if exhausted {
                    PageState::NoMorePages
                } else {
                    PageState::NextReady
                };
                Ok(snapshot)
            }
            Err(error) => {
                debug!(key = %self.key, cursor = %cursor, error = %error, "page fetch failed");
                *self.last_error.lock() = Some(error);
                *self.state.lock() = PageState::Error;
                // Accumulated pages are preserved; only this attempt failed.
                self.pages()
            }
        }
    }

    /// Discards the whole accumulated result and restarts from idle.
    pub fn invalidate(&self) {
        self.store.invalidate(&self.key);
        *self.state.lock() = PageState::Idle;
        *self.last_error.lock() = None;
    }

    /// Decides atomically what `fetch_next` should do.
    fn plan_next(&self) -> CacheResult<NextPlan> {
        let mut state = self.state.lock();
        match *state {
            PageState::FetchingFirst | PageState::FetchingNext | PageState::NoMorePages => {
                Ok(NextPlan::Noop)
            }
            PageState::Idle => Ok(NextPlan::First),
            PageState::NextReady | PageState::Error => {
                match self.store.get::<Paginated<T>>(&self.key)? {
                    EntrySnapshot::Success(result) => match result.next_cursor() {
                        Some(cursor) => {
                            let Some(generation) = self.store.generation(&self.key) else {
                                // Invalidated between the read and here; restart.
                                *state = PageState::Idle;
                                return Ok(NextPlan::First);
                            };
                            *state = PageState::FetchingNext;
                            Ok(NextPlan::Fetch {
                                cursor: cursor.clone(),
                                generation,
                            })
                        }
                        None => {
                            *state = PageState::NoMorePages;
                            Ok(NextPlan::Noop)
                        }
                    },
                    // First page never landed (or was invalidated); restart.
                    _ => {
                        *state = PageState::Idle;
                        Ok(NextPlan::First)
                    }
                }
            }
        }
    }

    /// Folds a first-page outcome back into the state machine.
    fn settle(&self, snapshot: &EntrySnapshot<Paginated<T>>) {
        let mut state = self.state.lock();
        *state = match snapshot {
            EntrySnapshot::Success(result) => {
                *self.last_error.lock() = None;
                if result.next_cursor().is_some() {
                    PageState::NextReady
                } else {
                    PageState::NoMorePages
                }
            }
            EntrySnapshot::Error(error) => {
                *self.last_error.lock() = Some(error.clone());
                PageState::Error
            }
            EntrySnapshot::Idle | EntrySnapshot::Pending(_) => PageState::Idle,
        };
    }

    fn has_pages(&self) -> bool {
        matches!(
            self.store.get::<Paginated<T>>(&self.key),
            Ok(EntrySnapshot::Success(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Script of cursor -> page used by most tests.
    fn two_page_fetcher(
        calls: Arc<AtomicU32>,
    ) -> impl Fn(Option<Cursor>) -> std::pin::Pin<Box<dyn Future<Output = Result<Page<&'static str>, FetchError>> + Send>>
           + Send
           + Sync {
        let mut script: HashMap<Option<Cursor>, Page<&'static str>> = HashMap::new();
        script.insert(
            None,
            Page::new(vec!["t1", "t2"], Some(Cursor::new("c1"))),
        );
        script.insert(Some(Cursor::new("c1")), Page::new(vec!["t3"], None));

        move |cursor| {
            calls.fetch_add(1, Ordering::SeqCst);
            let page = script.get(&cursor).cloned();
            Box::pin(async move {
                page.ok_or_else(|| FetchError::fatal("cursor not in script"))
            })
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("transactions").push("u1").push(None::<&str>)
    }

    #[tokio::test]
    async fn accumulates_pages_in_append_order() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let unit = PaginatedQuery::new(Arc::clone(&store), key(), two_page_fetcher(calls));

        unit.fetch_first().await.unwrap();
        assert_eq!(unit.state(), PageState::NextReady);
        assert_eq!(unit.flattened().unwrap(), vec!["t1", "t2"]);

        unit.fetch_next().await.unwrap();
        assert_eq!(unit.state(), PageState::NoMorePages);
        assert_eq!(unit.flattened().unwrap(), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn null_cursor_makes_fetch_next_a_noop() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let unit =
            PaginatedQuery::new(Arc::clone(&store), key(), two_page_fetcher(Arc::clone(&calls)));

        unit.fetch_first().await.unwrap();
        unit.fetch_next().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Exhausted: further requests fetch nothing and keep the state.
        unit.fetch_next().await.unwrap();
        unit.fetch_next().await.unwrap();
        assert_eq!(unit.state(), PageState::NoMorePages);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(unit.flattened().unwrap(), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn fetch_first_is_idempotent_once_loaded() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let unit =
            PaginatedQuery::new(Arc::clone(&store), key(), two_page_fetcher(Arc::clone(&calls)));

        unit.fetch_first().await.unwrap();
        unit.fetch_first().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_on_next_preserves_accumulated_pages() {
        let store = Arc::new(CacheStore::new());
        let attempts = Arc::new(AtomicU32::new(0));

        let fetch_attempts = Arc::clone(&attempts);
        let fetcher = move |cursor: Option<Cursor>| {
            let attempts = Arc::clone(&fetch_attempts);
            async move {
                match cursor {
                    None => Ok(Page::new(vec![1, 2], Some(Cursor::new("c1")))),
                    Some(_) => {
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(FetchError::retryable("flaky page"))
                        } else {
                            Ok(Page::new(vec![3], None))
                        }
                    }
                }
            }
        };
        let unit = PaginatedQuery::new(Arc::clone(&store), key(), fetcher);

        unit.fetch_first().await.unwrap();
        unit.fetch_next().await.unwrap();

        assert_eq!(unit.state(), PageState::Error);
        assert_eq!(unit.last_error().unwrap().message, "flaky page");
        // Previously accumulated pages survive the failed attempt.
        assert_eq!(unit.flattened().unwrap(), vec![1, 2]);

        // Retrying the same cursor succeeds.
        unit.fetch_next().await.unwrap();
        assert_eq!(unit.state(), PageState::NoMorePages);
        assert_eq!(unit.flattened().unwrap(), vec![1, 2, 3]);
        assert!(unit.last_error().is_none());
    }

    #[tokio::test]
    async fn disabled_unit_does_not_paginate() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let unit =
            PaginatedQuery::new(Arc::clone(&store), key(), two_page_fetcher(Arc::clone(&calls)))
                .with_gate(Gate::never());

        let snap = unit.fetch_first().await.unwrap();
        assert!(snap.is_idle());
        unit.fetch_next().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(unit.state(), PageState::Idle);
    }

    #[tokio::test]
    async fn invalidate_restarts_from_idle() {
        let store = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let unit =
            PaginatedQuery::new(Arc::clone(&store), key(), two_page_fetcher(Arc::clone(&calls)));

        unit.fetch_first().await.unwrap();
        unit.fetch_next().await.unwrap();
        assert_eq!(unit.state(), PageState::NoMorePages);

        unit.invalidate();
        assert_eq!(unit.state(), PageState::Idle);
        assert!(unit.flattened().unwrap().is_empty());

        unit.fetch_first().await.unwrap();
        assert_eq!(unit.flattened().unwrap(), vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn invalidate_during_next_fetch_discards_the_page() {
        let store = Arc::new(CacheStore::new());
        let fetcher = |cursor: Option<Cursor>| async move {
            match cursor {
                None => Ok(Page::new(vec![1, 2], Some(Cursor::new("c1")))),
                Some(_) => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(Page::new(vec![3], None))
                }
            }
        };
        let unit = Arc::new(PaginatedQuery::new(Arc::clone(&store), key(), fetcher));

        unit.fetch_first().await.unwrap();
        let next = {
            let unit = Arc::clone(&unit);
            tokio::spawn(async move { unit.fetch_next().await.unwrap() })
        };

        // Let the next-page fetch start, then drop the entry from under it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.invalidate(unit.key());

        next.await.unwrap();
        // The late page must not resurrect the discarded result.
        assert_eq!(unit.state(), PageState::Idle);
        assert!(unit.flattened().unwrap().is_empty());
    }

    #[tokio::test]
    async fn changing_the_filter_changes_the_key() {
        let store = Arc::new(CacheStore::new());
        let all = CacheKey::new("transactions").push("u1").push(None::<&str>);
        let deposits = CacheKey::new("transactions").push("u1").push(Some("deposit"));
        assert_ne!(all, deposits);

        let fetcher = |_cursor: Option<Cursor>| async {
            Ok::<_, FetchError>(Page::new(vec![1], None))
        };
        let unit_all = PaginatedQuery::new(Arc::clone(&store), all, fetcher);
        let unit_deposits = PaginatedQuery::new(Arc::clone(&store), deposits, fetcher);

        unit_all.fetch_first().await.unwrap();
        // The filtered unit starts from scratch under its own key.
        assert_eq!(unit_deposits.state(), PageState::Idle);
        assert!(unit_deposits.flattened().unwrap().is_empty());
    }

    #[test]
    fn paginated_flatten_and_counts() {
        let result = Paginated {
            pages: vec![
                Page::new(vec![1, 2], Some(Cursor::new("c1"))),
                Page::new(vec![3], None),
            ],
        };
        assert_eq!(result.flatten(), vec![1, 2, 3]);
        assert_eq!(result.len(), 3);
        assert!(!result.is_empty());
        assert!(result.next_cursor().is_none());
    }
}
