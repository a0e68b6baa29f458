//! Scripted fetch doubles.
//!
//! The same shape as a mock transport: canned results queued behind a
//! mutex, setter methods, and call counters for asserting fetch-count
//! invariants (single flight, no-op fetch-next, one fetch per gate flip).

use parking_lot::Mutex;
use quench_core::FetchError;
use quench_query::{CheckStatus, Cursor, Fetch, FetchPage, Page};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

/// A single-shot fetcher replaying a queued script.
///
/// When the queue runs dry the last produced result repeats, which keeps
/// polling loops supplied with a stable status.
pub struct ScriptedFetcher<T> {
    script: Mutex<VecDeque<Result<T, FetchError>>>,
    last: Mutex<Option<Result<T, FetchError>>>,
    calls: AtomicU32,
}

impl<T: Clone> ScriptedFetcher<T> {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// Creates a script from a sequence of successes.
    #[must_use]
    pub fn of(values: impl IntoIterator<Item = T>) -> Self {
        let fetcher = Self::new();
        for value in values {
            fetcher.push_ok(value);
        }
        fetcher
    }

    /// Queues a success.
    pub fn push_ok(&self, value: T) {
        self.script.lock().push_back(Ok(value));
    }

    /// Queues a failure.
    pub fn push_err(&self, error: FetchError) {
        self.script.lock().push_back(Err(error));
    }

    /// Number of fetches performed so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<T, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock();
        match self.script.lock().pop_front() {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(FetchError::fatal("script exhausted"))),
        }
    }
}

impl<T: Clone> Default for ScriptedFetcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Fetch<T> for ScriptedFetcher<T> {
    fn fetch(&self) -> impl Future<Output = Result<T, FetchError>> + Send {
        let result = self.next();
        async move { result }
    }
}

/// Builds a status script for polling tests.
#[must_use]
pub fn status_script(statuses: impl IntoIterator<Item = CheckStatus>) -> ScriptedFetcher<CheckStatus> {
    ScriptedFetcher::of(statuses)
}

/// A page fetcher replaying a cursor -> page script.
pub struct ScriptedPages<T> {
    pages: Mutex<HashMap<Option<Cursor>, Page<T>>>,
    fail_once: Mutex<Option<Option<Cursor>>>,
    calls: AtomicU32,
}

impl<T: Clone> ScriptedPages<T> {
    /// Creates an empty page script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            fail_once: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// Creates a chained script: page `i` points at page `i + 1`, the last
    /// page carries a null cursor.
    #[must_use]
    pub fn chain(pages: Vec<Vec<T>>) -> Self {
        let script = Self::new();
        let count = pages.len();
        for (index, items) in pages.into_iter().enumerate() {
            let cursor = if index == 0 {
                None
            } else {
                Some(Cursor::new(format!("c{index}")))
            };
            let next = if index + 1 < count {
                Some(Cursor::new(format!("c{}", index + 1)))
            } else {
                None
            };
            script.insert(cursor, Page::new(items, next));
        }
        script
    }

    /// Maps a cursor to the page it fetches.
    pub fn insert(&self, cursor: Option<Cursor>, page: Page<T>) {
        self.pages.lock().insert(cursor, page);
    }

    /// Makes the next fetch for `cursor` fail, once.
    pub fn fail_once(&self, cursor: Option<Cursor>) {
        *self.fail_once.lock() = Some(cursor);
    }

    /// Number of page fetches performed so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self, cursor: Option<Cursor>) -> Result<Page<T>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut fail = self.fail_once.lock();
        if fail.as_ref() == Some(&cursor) {
            *fail = None;
            return Err(FetchError::retryable("scripted page failure"));
        }
        drop(fail);

        self.pages
            .lock()
            .get(&cursor)
            .cloned()
            .ok_or_else(|| FetchError::fatal("cursor not in script"))
    }
}

impl<T: Clone> Default for ScriptedPages<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> FetchPage<T> for ScriptedPages<T> {
    fn fetch_page(
        &self,
        cursor: Option<Cursor>,
    ) -> impl Future<Output = Result<Page<T>, FetchError>> + Send {
        let result = self.next(cursor);
        async move { result }
    }
}
