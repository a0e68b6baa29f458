//! Fetch function contract.
//!
//! A fetcher is whatever produces a unit's data: an HTTP call, a database
//! read, a scripted test double. The layer treats it as opaque — it either
//! yields a value or fails with a [`FetchError`], and failures are recorded
//! on the cache entry rather than thrown at the caller.

use quench_core::FetchError;
use std::future::Future;

/// A single-shot fetch producing a `T`.
///
/// Implemented for any `Fn() -> Future` closure, so units accept both plain
/// closures and hand-written fetcher types.
pub trait Fetch<T>: Send + Sync {
    /// Performs the fetch.
    fn fetch(&self) -> impl Future<Output = Result<T, FetchError>> + Send;
}

impl<T, F, Fut> Fetch<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send,
{
    fn fetch(&self) -> impl Future<Output = Result<T, FetchError>> + Send {
        (self)()
    }
}
