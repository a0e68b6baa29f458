//! # quench query
//!
//! Query units built on the `quench_core` cache:
//!
//! - [`QueryUnit`] — a single-shot fetch bound to a cache key, with an
//!   `enabled` gate that suppresses fetching entirely when closed
//! - [`PaginatedQuery`] — successive pages keyed by an opaque cursor,
//!   accumulated append-only
//! - [`PollingQuery`] — a fixed-interval poll with terminal classification
//!   and one-shot side-effect callbacks
//! - [`Gate`] — the dependent-composition rule: a unit's enablement may
//!   read the identity source or another unit's cached data
//!
//! ## Key Invariants
//!
//! - A disabled unit never transitions its cache entry and never fetches.
//! - A gate flipping open triggers exactly one fetch.
//! - Page order is monotonic and append-only; a fetch-next during an
//!   in-flight fetch is a no-op.
//! - A terminal poll outcome fires its callback exactly once per session,
//!   and a tick suspended across teardown fires nothing at all.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod fetch;
mod gate;
mod paginate;
mod poll;
mod query;

pub use fetch::Fetch;
pub use gate::{Gate, Toggle};
pub use paginate::{Cursor, FetchPage, Page, PageState, Paginated, PaginatedQuery};
pub use poll::{
    classify_check_status, CheckStatus, Classification, PollHandle, PollState, PollingQuery,
};
pub use query::QueryUnit;
