//! Identity source: who is the current authenticated subject.
//!
//! Absence of a subject is a valid state, not an error — it propagates to
//! dependent query units as "not yet enabled".

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Caller-supplied stable identifier.
    pub id: String,
    /// Whether the subject completed authentication.
    pub authenticated: bool,
}

impl Subject {
    /// Creates an authenticated subject.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authenticated: true,
        }
    }
}

/// Read-only resolution of the current subject.
///
/// Synchronous by contract: gates call this on every re-evaluation.
pub trait IdentitySource: Send + Sync {
    /// Returns the current subject, or `None` when signed out.
    fn current(&self) -> Option<Subject>;
}

/// Watch-channel-backed identity source.
///
/// Cloning shares the underlying channel; any clone observes sign-in and
/// sign-out performed through any other clone. [`SharedIdentity::changed`]
/// lets async gates wake when the subject flips.
#[derive(Debug, Clone)]
pub struct SharedIdentity {
    sender: watch::Sender<Option<Subject>>,
}

impl SharedIdentity {
    /// Creates a signed-out identity source.
    #[must_use]
    pub fn signed_out() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Creates an identity source with a subject already present.
    #[must_use]
    pub fn signed_in(subject: Subject) -> Self {
        let (sender, _) = watch::channel(Some(subject));
        Self { sender }
    }

    /// Signs a subject in.
    pub fn sign_in(&self, subject: Subject) {
        self.sender.send_replace(Some(subject));
    }

    /// Signs the current subject out.
    pub fn sign_out(&self) {
        self.sender.send_replace(None);
    }

    /// Subscribes to subject changes.
    ///
    /// Race-free gating reads: subscribe first, then check
    /// [`IdentitySource::current`], then await
    /// [`tokio::sync::watch::Receiver::changed`] — a sign-in landing between
    /// the check and the await is still observed.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Subject>> {
        self.sender.subscribe()
    }

    /// Waits until the subject changes (sign-in, sign-out or replacement).
    pub async fn changed(&self) {
        let mut rx = self.sender.subscribe();
        // The store side never drops while a clone exists, but a closed
        // channel must not busy-loop the caller.
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl IdentitySource for SharedIdentity {
    fn current(&self) -> Option<Subject> {
        self.sender.borrow().clone()
    }
}

impl Default for SharedIdentity {
    fn default() -> Self {
        Self::signed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_subject_is_a_state() {
        let identity = SharedIdentity::signed_out();
        assert_eq!(identity.current(), None);
    }

    #[test]
    fn sign_in_and_out() {
        let identity = SharedIdentity::signed_out();
        identity.sign_in(Subject::new("u1"));
        assert_eq!(identity.current().unwrap().id, "u1");

        identity.sign_out();
        assert_eq!(identity.current(), None);
    }

    #[test]
    fn clones_share_state() {
        let identity = SharedIdentity::signed_out();
        let other = identity.clone();
        identity.sign_in(Subject::new("u1"));
        assert_eq!(other.current().unwrap().id, "u1");
    }

    #[tokio::test]
    async fn changed_wakes_on_sign_in() {
        let identity = SharedIdentity::signed_out();
        let waiter = identity.clone();

        let handle = tokio::spawn(async move {
            waiter.changed().await;
            waiter.current()
        });

        // Give the waiter a chance to subscribe first.
        tokio::task::yield_now().await;
        identity.sign_in(Subject::new("u1"));

        let observed = handle.await.unwrap();
        assert_eq!(observed.unwrap().id, "u1");
    }
}
