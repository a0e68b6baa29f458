//! Cache key model.
//!
//! A [`CacheKey`] is an ordered, finite tuple of primitive segments that
//! identifies one logical query. Equality is structural: two keys built from
//! the same segments in the same order address the same cache entry, no
//! matter where they were constructed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of a cache key.
///
/// Segments are deliberately limited to primitives so that keys stay
/// hashable, comparable and cheap to clone. `Null` is a real segment — it
/// keeps key shapes stable when an optional parameter (a filter, a page
/// size) is absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySegment {
    /// A text segment (domain tags, subject ids, filter names).
    Text(String),
    /// An integer segment.
    Int(i64),
    /// A boolean segment.
    Bool(bool),
    /// An absent optional parameter.
    Null,
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Text(s) => write!(f, "{s:?}"),
            KeySegment::Int(i) => write!(f, "{i}"),
            KeySegment::Bool(b) => write!(f, "{b}"),
            KeySegment::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        KeySegment::Text(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        KeySegment::Text(value)
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        KeySegment::Int(value)
    }
}

impl From<bool> for KeySegment {
    fn from(value: bool) -> Self {
        KeySegment::Bool(value)
    }
}

impl<S: Into<KeySegment>> From<Option<S>> for KeySegment {
    fn from(value: Option<S>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => KeySegment::Null,
        }
    }
}

/// Structural key identifying one logical query in the cache.
///
/// Keys are order-sensitive tuples: `["transactions", "u1", null]` and
/// `["transactions", null, "u1"]` are different keys. Callers must use one
/// shape per logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    segments: Vec<KeySegment>,
}

impl CacheKey {
    /// Creates a key with a leading domain tag.
    #[must_use]
    pub fn new(domain: impl Into<KeySegment>) -> Self {
        Self {
            segments: vec![domain.into()],
        }
    }

    /// Appends a segment, returning the extended key.
    #[must_use]
    pub fn push(mut self, segment: impl Into<KeySegment>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Returns the key's segments in order.
    #[must_use]
    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the key has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{segment}")?;
        }
        write!(f, "]")
    }
}

impl<S: Into<KeySegment>> FromIterator<S> for CacheKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().map(Into::into).collect(),
        }
    }
}
