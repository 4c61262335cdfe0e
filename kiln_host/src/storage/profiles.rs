//! Profile persistence: one blob per sanitized id plus an index blob.

use kiln_shared::profile::{self, ProfileError};
use kiln_shared::types::MAX_PROFILES;
use kiln_shared::{FiringProfile, KeyValueStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

const NS: &str = "profiles";
const INDEX_KEY: &str = "idx";

#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("profile store is full ({MAX_PROFILES} profiles)")]
    Full,
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Invalid(#[from] ProfileError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("corrupt profile blob for {0}")]
    Corrupt(String),
}

#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn KeyValueStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn read_index(&self) -> Vec<String> {
        let Some(bytes) = self.store.get_blob(NS, INDEX_KEY) else {
            return Vec::new();
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!("corrupt profile index, resetting: {}", e);
            Vec::new()
        })
    }

    fn write_index(&self, ids: &[String]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(ids).map_err(|e| StoreError::Io(e.to_string()))?;
        self.store.set_blob(NS, INDEX_KEY, &bytes)
    }

    /// Upsert. New ids are appended to the index if there is room.
    pub fn save(&self, p: &FiringProfile) -> Result<(), ProfileStoreError> {
        profile::validate(p)?;

        let mut index = self.read_index();
        let is_new = !index.iter().any(|id| id == &p.id);
        if is_new && index.len() >= MAX_PROFILES {
            return Err(ProfileStoreError::Full);
        }

        let key = profile::sanitize_store_key(&p.id);
        let bytes =
            serde_json::to_vec(p).map_err(|e| StoreError::Io(e.to_string()))?;
        self.store.set_blob(NS, &key, &bytes)?;

        if is_new {
            index.push(p.id.clone());
            self.write_index(&index)?;
        }
        tracing::info!(id = %p.id, name = %p.name, "profile saved");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<FiringProfile, ProfileStoreError> {
        let key = profile::sanitize_store_key(id);
        let bytes = self
            .store
            .get_blob(NS, &key)
            .ok_or_else(|| ProfileStoreError::NotFound(id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|_| ProfileStoreError::Corrupt(id.to_string()))
    }

    /// Deleting a missing id is a no-op success.
    pub fn delete(&self, id: &str) -> Result<(), ProfileStoreError> {
        let key = profile::sanitize_store_key(id);
        self.store.remove(NS, &key)?;

        let mut index = self.read_index();
        if let Some(pos) = index.iter().position(|entry| entry == id) {
            index.remove(pos);
            self.write_index(&index)?;
            tracing::info!(id, "profile deleted");
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        self.read_index()
    }

    /// First boot with an empty store: install the factory set.
    pub fn seed_defaults(&self) -> Result<(), ProfileStoreError> {
        if !self.list().is_empty() {
            return Ok(());
        }
        let defaults = profile::default_profiles();
        tracing::info!("no profiles found, loading {} defaults", defaults.len());
        for p in &defaults {
            self.save(p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirKvStore;
    use tempfile::tempdir;

    fn make_store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempdir().unwrap();
        let kv = Arc::new(DirKvStore::open(dir.path()).unwrap());
        (dir, ProfileStore::new(kv))
    }

    #[test]
    fn save_load_is_identity() {
        let (_dir, store) = make_store();
        let p = profile::default_profiles().remove(0);
        store.save(&p).unwrap();
        assert_eq!(store.load(&p.id).unwrap(), p);
    }

    #[test]
    fn upsert_does_not_duplicate_index_entries() {
        let (_dir, store) = make_store();
        let mut p = profile::default_profiles().remove(0);
        store.save(&p).unwrap();
        p.name = "Renamed".to_string();
        store.save(&p).unwrap();
        assert_eq!(store.list(), vec![p.id.clone()]);
        assert_eq!(store.load(&p.id).unwrap().name, "Renamed");
    }

    #[test]
    fn delete_missing_is_noop_and_load_after_delete_fails() {
        let (_dir, store) = make_store();
        store.delete("ghost").unwrap();

        let p = profile::default_profiles().remove(1);
        store.save(&p).unwrap();
        store.delete(&p.id).unwrap();
        assert!(matches!(
            store.load(&p.id),
            Err(ProfileStoreError::NotFound(_))
        ));
        assert!(store.list().is_empty());
    }

    #[test]
    fn store_caps_at_max_profiles() {
        let (_dir, store) = make_store();
        let template = profile::default_profiles().remove(0);
        for i in 0..MAX_PROFILES {
            let mut p = template.clone();
            p.id = format!("profile-{i}");
            store.save(&p).unwrap();
        }
        let mut extra = template.clone();
        extra.id = "one-too-many".to_string();
        assert!(matches!(store.save(&extra), Err(ProfileStoreError::Full)));
        // Updating an existing profile still works at capacity.
        let mut update = template;
        update.id = "profile-0".to_string();
        store.save(&update).unwrap();
    }

    #[test]
    fn seeding_installs_defaults_once() {
        let (_dir, store) = make_store();
        store.seed_defaults().unwrap();
        assert_eq!(store.list().len(), 5);

        // A second boot must not re-install over user edits.
        store.delete("glaze-6").unwrap();
        store.seed_defaults().unwrap();
        assert_eq!(store.list().len(), 4);
    }
}
