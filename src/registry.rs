//! In-memory registry of known volumes.
//!
//! The registry is the single source of truth for `List`, `Get` and `Path`.
//! Each method takes the internal lock for exactly one read or write, so no
//! caller ever observes a half-inserted record. Multi-step lifecycle
//! operations are serialised per name by [`crate::locks::NameLocks`], not
//! here.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::volume::{VolumeName, VolumeRecord};

/// Concurrency-safe map from volume name to [`VolumeRecord`].
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    records: RwLock<BTreeMap<VolumeName, VolumeRecord>>,
}

impl VolumeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the record stored under its name.
    pub fn put(&self, record: VolumeRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.name.clone(), record);
    }

    /// Returns a copy of the record for `name`, if registered.
    #[must_use]
    pub fn get(&self, name: &VolumeName) -> Option<VolumeRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns `true` when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &VolumeName) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Removes the record for `name`, returning it when present.
    pub fn delete(&self, name: &VolumeName) -> Option<VolumeRecord> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Returns a consistent snapshot of every record, ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<VolumeRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no volume is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::volume::{CleanupPolicy, LifecycleState};

    fn record(name: &str) -> VolumeRecord {
        VolumeRecord::registered(
            VolumeName::parse(name).expect("valid name"),
            Utf8PathBuf::from(format!("/root/{name}/_data")),
            format!("p_{name}"),
            CleanupPolicy::DeleteBucket,
        )
    }

    #[fixture]
    fn registry() -> VolumeRegistry {
        VolumeRegistry::new()
    }

    #[rstest]
    fn get_returns_inserted_record(registry: VolumeRegistry) {
        registry.put(record("v1"));
        let found = registry
            .get(&VolumeName::parse("v1").expect("valid name"))
            .expect("record should exist");
        assert_eq!(found.bucket_name, "p_v1");
    }

    #[rstest]
    fn put_overwrites_existing_record(registry: VolumeRegistry) {
        registry.put(record("v1"));
        let mut updated = record("v1");
        updated.state = LifecycleState::Mounted;
        registry.put(updated);

        let name = VolumeName::parse("v1").expect("valid name");
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&name).map(|rec| rec.state),
            Some(LifecycleState::Mounted)
        );
    }

    #[rstest]
    fn delete_removes_record(registry: VolumeRegistry) {
        registry.put(record("v1"));
        let name = VolumeName::parse("v1").expect("valid name");
        assert!(registry.delete(&name).is_some());
        assert!(registry.get(&name).is_none());
        assert!(registry.delete(&name).is_none());
    }

    #[rstest]
    fn list_is_ordered_by_name(registry: VolumeRegistry) {
        registry.put(record("b"));
        registry.put(record("a"));
        let names = registry
            .list()
            .into_iter()
            .map(|rec| rec.name.as_str().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn concurrent_puts_are_all_visible() {
        let registry = Arc::new(VolumeRegistry::new());
        let handles = (0..8)
            .map(|idx| {
                let shared = Arc::clone(&registry);
                thread::spawn(move || shared.put(record(&format!("vol-{idx}"))))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("writer thread should not panic");
        }
        assert_eq!(registry.len(), 8);
    }
}
