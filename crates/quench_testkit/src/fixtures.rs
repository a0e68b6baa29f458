//! Test fixtures: stores and identities with common setups.

use quench_core::{CacheStore, SharedIdentity, StoreConfig, Subject};
use std::sync::Arc;
use std::time::Duration;

/// A store with default configuration, ready to inject into units.
#[must_use]
pub fn store() -> Arc<CacheStore> {
    Arc::new(CacheStore::new())
}

/// A store whose entries go stale after `stale_after`.
#[must_use]
pub fn store_with_ttl(stale_after: Duration) -> Arc<CacheStore> {
    Arc::new(CacheStore::with_config(
        StoreConfig::new().with_default_stale_after(stale_after),
    ))
}

/// An identity source with `id` already signed in.
#[must_use]
pub fn signed_in(id: &str) -> SharedIdentity {
    SharedIdentity::signed_in(Subject::new(id))
}

/// A signed-out identity source.
#[must_use]
pub fn signed_out() -> SharedIdentity {
    SharedIdentity::signed_out()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quench_core::IdentitySource;

    #[test]
    fn fixtures_build() {
        let store = store();
        assert_eq!(store.config().feed_capacity, 256);

        let identity = signed_in("u1");
        assert_eq!(identity.current().unwrap().id, "u1");
        assert!(signed_out().current().is_none());
    }
}
