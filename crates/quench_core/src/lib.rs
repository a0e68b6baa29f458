//! # quench core
//!
//! Keyed query cache for client-side data synchronization.
//!
//! This crate provides:
//! - Structural cache keys ([`CacheKey`])
//! - The cache store with single-flight fetching, staleness tracking and
//!   invalidation ([`CacheStore`])
//! - A change feed of cache mutations for reactive consumers ([`ChangeFeed`])
//! - The identity source resolving the current subject ([`SharedIdentity`])
//!
//! ## Key Invariants
//!
//! - At most one fetch is in flight per key; concurrent readers attach to
//!   the existing flight.
//! - Entry mutations are atomic: state, data and timestamp change together
//!   under one lock, never observed torn.
//! - Fetch failures are recorded on the entry, never thrown across a
//!   component boundary.
//! - An invalidated entry's superseded in-flight result is discarded, not
//!   resurrected.
//!
//! Query units (single-shot, paginated, polling) live in `quench_query` and
//! are built entirely on this crate's operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entry;
mod error;
mod feed;
mod identity;
mod key;
mod store;

pub use config::StoreConfig;
pub use entry::{CacheEntry, EntrySnapshot, EntryState, Payload};
pub use error::{CacheError, CacheResult, FetchError};
pub use feed::{CacheEvent, ChangeFeed, ChangeKind};
pub use identity::{IdentitySource, SharedIdentity, Subject};
pub use key::{CacheKey, KeySegment};
pub use store::CacheStore;
