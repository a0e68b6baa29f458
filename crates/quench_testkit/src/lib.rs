//! # quench testkit
//!
//! Test utilities for the quench cache layer.
//!
//! This crate provides:
//! - Scripted fetch doubles with call counters
//! - Property-based generators for keys and page chains
//! - Store and identity fixtures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quench_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_store() {
//!     let store = store();
//!     let fetcher = ScriptedFetcher::of([1u32, 2]);
//!     // ... drive units against the script
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fetchers;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fetchers::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fetchers::*;
pub use fixtures::*;
pub use generators::*;
