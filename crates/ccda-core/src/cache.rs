//! Identity cache
//!
//! Deduplicates records by `(kind, identifier system, identifier value)`.
//! The first record registered under a key wins for the rest of the document.

use crate::record::{RecordKind, RecordRef};
use std::collections::HashMap;

/// Derived identity of a real-world entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub kind: RecordKind,
    pub system: String,
    pub value: String,
}

impl IdentityKey {
    pub fn new(kind: RecordKind, system: &str, value: &str) -> Self {
        Self {
            kind,
            system: system.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<IdentityKey, RecordRef>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `record` under its derived key; no-op if the key exists
    ///
    /// Returns whether the entry was inserted.
    pub fn add(&mut self, record: &RecordRef, system: &str, value: &str) -> bool {
        let key = IdentityKey::new(record.kind, system, value);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, record.clone());
        true
    }

    pub fn try_get(&self, kind: RecordKind, system: &str, value: &str) -> Option<&RecordRef> {
        self.entries.get(&IdentityKey::new(kind, system, value))
    }

    pub fn contains(&self, kind: RecordKind, system: &str, value: &str) -> bool {
        self.try_get(kind, system, value).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: RecordKind, id: &str) -> RecordRef {
        RecordRef {
            kind,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_first_writer_wins() {
        let mut cache = IdentityCache::new();
        let first = record(RecordKind::Condition, "1");
        let second = record(RecordKind::Condition, "2");

        assert!(cache.add(&first, "urn:oid:1.2", "A"));
        assert!(!cache.add(&second, "urn:oid:1.2", "A"));

        assert_eq!(cache.try_get(RecordKind::Condition, "urn:oid:1.2", "A"), Some(&first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_includes_kind() {
        let mut cache = IdentityCache::new();
        cache.add(&record(RecordKind::Practitioner, "1"), "npi", "123");

        assert!(cache.contains(RecordKind::Practitioner, "npi", "123"));
        assert!(!cache.contains(RecordKind::Organization, "npi", "123"));
        assert!(!cache.contains(RecordKind::Practitioner, "npi", "124"));
    }
}
