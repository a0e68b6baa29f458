//! Store configuration.

use std::time::Duration;

/// Configuration for a [`crate::CacheStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Freshness window applied to entries that don't specify their own.
    pub default_stale_after: Duration,
    /// Per-subscriber buffer capacity of the change feed.
    pub feed_capacity: usize,
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default freshness window.
    #[must_use]
    pub const fn with_default_stale_after(mut self, stale_after: Duration) -> Self {
        self.default_stale_after = stale_after;
        self
    }

    /// Sets the change feed capacity.
    #[must_use]
    pub const fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_stale_after: Duration::from_secs(60),
            feed_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = StoreConfig::new()
            .with_default_stale_after(Duration::from_secs(5))
            .with_feed_capacity(32);
        assert_eq!(config.default_stale_after, Duration::from_secs(5));
        assert_eq!(config.feed_capacity, 32);
    }
}
