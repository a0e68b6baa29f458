//! Change feed for observing cache mutations.
//!
//! The feed emits one event per store mutation, enabling:
//! - reactive re-evaluation of dependent gates
//! - readers waiting out an in-flight fetch for the same key
//! - UI adapters re-rendering when an entry changes
//!
//! Events are emitted while the store's map lock is held, so a subscriber
//! that registered before releasing the lock observes every later mutation —
//! there is no window in which a resolution can slip past a waiter.

use crate::key::CacheKey;
use tokio::sync::broadcast;

/// What kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A fetch started; the entry is now pending.
    FetchStarted,
    /// A fetch resolved; the entry now holds data.
    Resolved,
    /// A fetch rejected; the entry now holds an error.
    Rejected,
    /// The entry was discarded; the next read will refetch.
    Invalidated,
}

/// A single mutation event.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    /// Key of the mutated entry.
    pub key: CacheKey,
    /// Kind of mutation.
    pub kind: ChangeKind,
}

impl CacheEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(key: CacheKey, kind: ChangeKind) -> Self {
        Self { key, kind }
    }
}

/// Broadcast feed of cache mutations.
///
/// Built on [`tokio::sync::broadcast`]: subscribers are async tasks, lagging
/// subscribers only miss events (they must re-read the store, which waiters
/// do anyway), and dropped receivers clean up on their own.
#[derive(Debug)]
pub struct ChangeFeed {
    sender: broadcast::Sender<CacheEvent>,
}

impl ChangeFeed {
    /// Creates a feed with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to all future mutation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Emits an event to all subscribers.
    ///
    /// Delivery failure only means there are no subscribers, which is fine.
    pub fn emit(&self, event: CacheEvent) {
        let _ = self.sender.send(event);
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey::new("account").push("u1")
    }

    #[tokio::test]
    async fn emit_and_receive() {
        let feed = ChangeFeed::new(16);
        let mut rx = feed.subscribe();

        feed.emit(CacheEvent::new(key(), ChangeKind::Resolved));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, key());
        assert_eq!(event.kind, ChangeKind::Resolved);
    }

    #[tokio::test]
    async fn multiple_subscribers_see_every_event() {
        let feed = ChangeFeed::new(16);
        let mut rx1 = feed.subscribe();
        let mut rx2 = feed.subscribe();

        feed.emit(CacheEvent::new(key(), ChangeKind::FetchStarted));
        feed.emit(CacheEvent::new(key(), ChangeKind::Resolved));

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::FetchStarted);
            assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Resolved);
        }
    }

    #[tokio::test]
    async fn subscriber_count_tracks_drops() {
        let feed = ChangeFeed::new(16);
        assert_eq!(feed.subscriber_count(), 0);

        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let feed = ChangeFeed::new(16);
        feed.emit(CacheEvent::new(key(), ChangeKind::Invalidated));
    }
}
