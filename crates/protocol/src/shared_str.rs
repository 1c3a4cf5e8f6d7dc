use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An immutable, reference-counted string.
///
/// Buffers repeat the same handful of labels (thread states, process names)
/// on thousands of rows; cloning a `SharedStr` is a refcount bump.
#[derive(Debug, Clone, Eq, PartialOrd, Ord)]
pub struct SharedStr(Arc<str>);

impl SharedStr {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether both values point at the same allocation.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for SharedStr {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.0 == *other.0
    }
}

// Must agree with `str`'s hash so sets can be queried by `&str`.
impl std::hash::Hash for SharedStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self.0).hash(state);
    }
}

impl PartialEq<&str> for SharedStr {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl std::ops::Deref for SharedStr {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for SharedStr {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SharedStr {
    #[inline]
    fn from(s: &str) -> Self {
        SharedStr(Arc::from(s))
    }
}

impl From<String> for SharedStr {
    #[inline]
    fn from(s: String) -> Self {
        SharedStr(Arc::from(s))
    }
}

impl std::fmt::Display for SharedStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for SharedStr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SharedStr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SharedStr::from(s))
    }
}

/// Deduplicates strings while a buffer is being built.
///
/// Lives for one materialization pass; every distinct string is allocated
/// once and every row gets a clone of that allocation.
#[derive(Debug, Default)]
pub struct StrInterner {
    seen: HashSet<SharedStr>,
}

impl StrInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> SharedStr {
        if let Some(existing) = self.seen.get(s) {
            return existing.clone();
        }
        let shared = SharedStr::from(s);
        self.seen.insert(shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_shares_allocations() {
        let mut interner = StrInterner::new();
        let a = interner.intern("Running");
        let b = interner.intern("Running");
        let c = interner.intern("Sleeping");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn compares_with_str() {
        let s = SharedStr::from(String::from("Runnable"));
        assert_eq!(s, "Runnable");
        assert_eq!(format!("{s}"), "Runnable");
    }

    #[test]
    fn serializes_as_plain_string() {
        let s = SharedStr::from("D");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"D\"");
        let back: SharedStr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, "D");
    }
}
