//! In-memory reference store.
//!
//! [`InMemoryRefStore`] keeps all refs in a `HashMap` behind a single
//! `RwLock`; holding the write lock across the read-compare-write sequence
//! is what makes [`RefStore::apply`] an atomic compare-and-swap.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use grit_types::ObjectId;

use crate::error::{RefError, RefResult};
use crate::names::validate_ref_name;
use crate::traits::RefStore;
use crate::types::{Ref, RefUpdate};

/// An in-memory implementation of [`RefStore`].
#[derive(Debug, Default)]
pub struct InMemoryRefStore {
    refs: RwLock<HashMap<String, ObjectId>>,
}

impl InMemoryRefStore {
    /// Create a new empty ref store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refs currently stored.
    pub fn len(&self) -> usize {
        self.refs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no refs exist.
    pub fn is_empty(&self) -> bool {
        self.refs.read().expect("lock poisoned").is_empty()
    }
}

impl RefStore for InMemoryRefStore {
    fn read(&self, name: &str) -> RefResult<Option<ObjectId>> {
        let refs = self.refs.read().expect("lock poisoned");
        Ok(refs.get(name).copied())
    }

    fn list(&self, prefix: &str) -> RefResult<Vec<Ref>> {
        let refs = self.refs.read().expect("lock poisoned");
        let mut result: Vec<Ref> = refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, target)| Ref::new(name.clone(), *target))
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn apply(&self, update: &RefUpdate) -> RefResult<()> {
        validate_ref_name(&update.name)?;

        let mut refs = self.refs.write().expect("lock poisoned");
        let actual = refs.get(&update.name).copied();
        if actual != update.expected_old {
            return Err(RefError::StaleRef {
                name: update.name.clone(),
                expected: update.expected_old,
                actual,
            });
        }
        match update.new {
            Some(target) => {
                refs.insert(update.name.clone(), target);
                debug!(name = %update.name, target = %target.short_hex(), "ref updated");
            }
            None => {
                refs.remove(&update.name);
                debug!(name = %update.name, "ref deleted");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_hash([byte; 20])
    }

    #[test]
    fn create_and_read() {
        let store = InMemoryRefStore::new();
        store
            .apply(&RefUpdate::create("refs/heads/main", id(1)))
            .unwrap();
        assert_eq!(store.read("refs/heads/main").unwrap(), Some(id(1)));
    }

    #[test]
    fn read_missing_returns_none() {
        let store = InMemoryRefStore::new();
        assert_eq!(store.read("refs/heads/nope").unwrap(), None);
    }

    #[test]
    fn update_requires_matching_old_value() {
        let store = InMemoryRefStore::new();
        store
            .apply(&RefUpdate::create("refs/heads/main", id(1)))
            .unwrap();
        store
            .apply(&RefUpdate::update("refs/heads/main", id(1), id(2)))
            .unwrap();
        assert_eq!(store.read("refs/heads/main").unwrap(), Some(id(2)));
    }

    #[test]
    fn stale_update_is_rejected() {
        let store = InMemoryRefStore::new();
        store
            .apply(&RefUpdate::create("refs/heads/main", id(1)))
            .unwrap();
        let err = store
            .apply(&RefUpdate::update("refs/heads/main", id(9), id(2)))
            .unwrap_err();
        assert!(matches!(err, RefError::StaleRef { .. }));
        assert_eq!(store.read("refs/heads/main").unwrap(), Some(id(1)));
    }

    #[test]
    fn create_fails_if_ref_exists() {
        let store = InMemoryRefStore::new();
        store
            .apply(&RefUpdate::create("refs/heads/main", id(1)))
            .unwrap();
        let err = store
            .apply(&RefUpdate::create("refs/heads/main", id(2)))
            .unwrap_err();
        assert!(matches!(err, RefError::StaleRef { .. }));
    }

    #[test]
    fn delete_with_matching_old() {
        let store = InMemoryRefStore::new();
        store
            .apply(&RefUpdate::create("refs/heads/gone", id(1)))
            .unwrap();
        store
            .apply(&RefUpdate::delete("refs/heads/gone", id(1)))
            .unwrap();
        assert_eq!(store.read("refs/heads/gone").unwrap(), None);
    }

    #[test]
    fn list_is_sorted_and_filtered() {
        let store = InMemoryRefStore::new();
        store
            .apply(&RefUpdate::create("refs/heads/b", id(2)))
            .unwrap();
        store
            .apply(&RefUpdate::create("refs/heads/a", id(1)))
            .unwrap();
        store
            .apply(&RefUpdate::create("refs/tags/v1", id(3)))
            .unwrap();

        let heads = store.list("refs/heads/").unwrap();
        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0].name, "refs/heads/a");
        assert_eq!(heads[1].name, "refs/heads/b");

        let all = store.list("refs/").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn invalid_name_is_rejected() {
        let store = InMemoryRefStore::new();
        let err = store
            .apply(&RefUpdate::create("refs/heads/bad..name", id(1)))
            .unwrap_err();
        assert!(matches!(err, RefError::InvalidName(_)));
    }

    #[test]
    fn concurrent_cas_has_exactly_one_winner() {
        let store = Arc::new(InMemoryRefStore::new());
        store
            .apply(&RefUpdate::create("refs/heads/main", id(1)))
            .unwrap();

        let mut handles = Vec::new();
        for byte in [2u8, 3u8] {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.apply(&RefUpdate::update("refs/heads/main", id(1), id(byte)))
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "exactly one concurrent update must win");
        let losses = results
            .iter()
            .filter(|r| matches!(r, Err(RefError::StaleRef { .. })))
            .count();
        assert_eq!(losses, 1);

        let final_value = store.read("refs/heads/main").unwrap().unwrap();
        assert!(final_value == id(2) || final_value == id(3));
    }
}
