//! Property-based test generators using proptest.
//!
//! Strategies for random keys and page chains that maintain the invariants
//! pagination relies on: unique cursors, a terminal null cursor.

use proptest::prelude::*;
use quench_core::{CacheKey, KeySegment};
use quench_query::{Cursor, Page};

/// Strategy for a single key segment.
pub fn key_segment_strategy() -> impl Strategy<Value = KeySegment> {
    prop_oneof![
        prop::string::string_regex("[a-z][a-z0-9_-]{0,15}")
            .expect("invalid regex")
            .prop_map(KeySegment::Text),
        any::<i64>().prop_map(KeySegment::Int),
        any::<bool>().prop_map(KeySegment::Bool),
        Just(KeySegment::Null),
    ]
}

/// Strategy for a cache key with 1 to 4 segments.
pub fn cache_key_strategy() -> impl Strategy<Value = CacheKey> {
    prop::collection::vec(key_segment_strategy(), 1..=4)
        .prop_map(|segments| segments.into_iter().collect())
}

/// Strategy for a page chain: every page points at the next via a unique
/// cursor and the last page carries a null cursor.
pub fn page_chain_strategy(
    max_pages: usize,
    max_items: usize,
) -> impl Strategy<Value = Vec<Page<u32>>> {
    prop::collection::vec(prop::collection::vec(any::<u32>(), 0..=max_items), 1..=max_pages)
        .prop_map(|chunks| {
            let count = chunks.len();
            chunks
                .into_iter()
                .enumerate()
                .map(|(index, items)| {
                    let next = if index + 1 < count {
                        Some(Cursor::new(format!("c{}", index + 1)))
                    } else {
                        None
                    };
                    Page::new(items, next)
                })
                .collect()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_keys_are_self_equal(key in cache_key_strategy()) {
            let clone = key.clone();
            prop_assert_eq!(&key, &clone);
            prop_assert!(!key.is_empty());
        }

        #[test]
        fn page_chains_end_with_null_cursor(pages in page_chain_strategy(5, 8)) {
            prop_assert!(pages.last().unwrap().cursor.is_none());
            for page in &pages[..pages.len() - 1] {
                prop_assert!(page.cursor.is_some());
            }
        }

        #[test]
        fn page_chain_cursors_are_unique(pages in page_chain_strategy(6, 4)) {
            let cursors: Vec<_> = pages.iter().filter_map(|p| p.cursor.clone()).collect();
            let mut deduped = cursors.clone();
            deduped.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            deduped.dedup();
            prop_assert_eq!(cursors.len(), deduped.len());
        }
    }
}
