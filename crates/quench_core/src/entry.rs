//! Cache entries and consumer-facing snapshots.

use crate::error::FetchError;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Type-erased payload stored in an entry.
///
/// The store is heterogeneous: each key may hold a different payload type.
/// Typed reads downcast back through [`EntrySnapshot`].
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A fetch is in flight for this key.
    Pending,
    /// The last fetch resolved with data.
    Success,
    /// The last fetch rejected with an error.
    Error,
}

/// One stored record: status, data, error and staleness bookkeeping.
///
/// Entries are owned exclusively by the store and mutated only through its
/// `fetch_start` / `fetch_resolve` / `fetch_reject` / `invalidate`
/// operations. State, data and timestamp always change together under one
/// lock, so readers never observe a torn update.
#[derive(Clone)]
pub struct CacheEntry {
    /// Current lifecycle state.
    pub state: EntryState,
    /// Last successfully fetched payload. Retained while a refetch is
    /// pending so stale data stays readable.
    pub data: Option<Payload>,
    /// Last recorded fetch failure.
    pub error: Option<FetchError>,
    /// When the payload was last fetched.
    pub fetched_at: Instant,
    /// How long after `fetched_at` the payload counts as fresh.
    pub stale_after: Duration,
    /// Token of the fetch currently in flight, if any. A resolution carrying
    /// a different token is discarded as superseded.
    pub flight: Option<u64>,
    /// Token stamped when the entry was inserted, stable across in-place
    /// mutations. A guarded publish carrying a different generation is
    /// discarded as superseded.
    pub generation: u64,
}

impl CacheEntry {
    /// Creates a pending entry for a fetch that just started. The flight
    /// token doubles as the fresh entry's generation.
    #[must_use]
    pub fn pending(flight: u64, stale_after: Duration) -> Self {
        Self {
            state: EntryState::Pending,
            data: None,
            error: None,
            fetched_at: Instant::now(),
            stale_after,
            flight: Some(flight),
            generation: flight,
        }
    }

    /// Returns true if the entry's payload is older than its freshness
    /// window. Pending and errored entries always count as stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self.state {
            EntryState::Success => self.fetched_at.elapsed() >= self.stale_after,
            EntryState::Pending | EntryState::Error => true,
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("state", &self.state)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("fetched_at", &self.fetched_at)
            .field("stale_after", &self.stale_after)
            .field("flight", &self.flight)
            .field("generation", &self.generation)
            .finish()
    }
}

/// What a consumer sees when reading a key.
///
/// `Idle` covers both "no entry exists" and "the unit is disabled and has
/// never fetched" — a gating state, not an error.
#[derive(Debug, Clone)]
pub enum EntrySnapshot<T> {
    /// No entry exists for the key.
    Idle,
    /// A fetch is in flight. A refetch of a previously successful entry
    /// keeps the stale payload readable while the new one loads.
    Pending(Option<Arc<T>>),
    /// The entry resolved with data.
    Success(Arc<T>),
    /// The entry rejected with an error.
    Error(FetchError),
}

impl<T> EntrySnapshot<T> {
    /// Returns the readable payload: resolved data, or the stale payload
    /// retained while a refetch is in flight.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            EntrySnapshot::Success(data) => Some(data),
            EntrySnapshot::Pending(Some(stale)) => Some(stale),
            _ => None,
        }
    }

    /// Returns the recorded error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            EntrySnapshot::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Returns true for [`EntrySnapshot::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, EntrySnapshot::Success(_))
    }

    /// Returns true for [`EntrySnapshot::Idle`].
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, EntrySnapshot::Idle)
    }

    /// Returns true for [`EntrySnapshot::Pending`].
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, EntrySnapshot::Pending(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_success_is_not_stale() {
        let mut entry = CacheEntry::pending(1, Duration::from_secs(60));
        entry.state = EntryState::Success;
        entry.data = Some(Arc::new(42u32) as Payload);
        entry.fetched_at = Instant::now();
        entry.flight = None;
        assert!(!entry.is_stale());
    }

    #[test]
    fn zero_ttl_is_immediately_stale() {
        let mut entry = CacheEntry::pending(1, Duration::ZERO);
        entry.state = EntryState::Success;
        entry.flight = None;
        assert!(entry.is_stale());
    }

    #[test]
    fn errored_entry_is_stale() {
        let mut entry = CacheEntry::pending(1, Duration::from_secs(60));
        entry.state = EntryState::Error;
        entry.error = Some(FetchError::retryable("boom"));
        assert!(entry.is_stale());
    }

    #[test]
    fn snapshot_accessors() {
        let snap: EntrySnapshot<u32> = EntrySnapshot::Success(Arc::new(7));
        assert_eq!(snap.data(), Some(&7));
        assert!(snap.is_success());

        let snap: EntrySnapshot<u32> = EntrySnapshot::Error(FetchError::fatal("no"));
        assert_eq!(snap.error().map(|e| e.message.as_str()), Some("no"));

        let snap: EntrySnapshot<u32> = EntrySnapshot::Idle;
        assert!(snap.is_idle());
        assert!(snap.data().is_none());
    }

    #[test]
    fn pending_refetch_keeps_stale_data_readable() {
        let snap: EntrySnapshot<u32> = EntrySnapshot::Pending(Some(Arc::new(5)));
        assert!(snap.is_pending());
        assert_eq!(snap.data(), Some(&5));

        let snap: EntrySnapshot<u32> = EntrySnapshot::Pending(None);
        assert!(snap.is_pending());
        assert!(snap.data().is_none());
    }
}
