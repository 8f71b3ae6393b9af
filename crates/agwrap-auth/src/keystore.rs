use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::fsutil::write_private;

const API_KEYS_FILENAME: &str = "api_keys.json";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse key store: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("key not found")]
    NotFound,
}

/// One issued API key with its operator metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
    /// Requests per minute. Zero means the global limit applies.
    #[serde(default)]
    pub rate_limit: u32,
    /// Model ids this key may use. Empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_models: Vec<String>,
}

/// Fields accepted by [`KeyStore::update`]; `None` leaves the stored value
/// untouched.
#[derive(Debug, Default)]
pub struct KeyUpdate {
    pub note: Option<String>,
    pub rate_limit: Option<u32>,
    pub allowed_models: Option<Vec<String>>,
}

/// Persistent map of issued API keys. Every mutation rewrites the backing
/// file; on persistence failure the in-memory map is rolled back so memory
/// and disk never diverge.
pub struct KeyStore {
    path: PathBuf,
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl KeyStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let path = data_dir.as_ref().join(API_KEYS_FILENAME);
        let keys = match std::fs::read(&path) {
            Ok(data) => {
                let list: Vec<ApiKey> = serde_json::from_slice(&data)?;
                list.into_iter().map(|k| (k.key.clone(), k)).collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            keys: RwLock::new(keys),
        })
    }

    pub fn generate(
        &self,
        note: String,
        rate_limit: u32,
        allowed_models: Vec<String>,
    ) -> Result<ApiKey, KeyStoreError> {
        let record = ApiKey {
            key: Uuid::new_v4().to_string(),
            created_at: OffsetDateTime::now_utc(),
            note,
            rate_limit,
            allowed_models,
        };

        let mut keys = self.keys.write().expect("key store lock");
        keys.insert(record.key.clone(), record.clone());
        if let Err(err) = self.save(&keys) {
            keys.remove(&record.key);
            return Err(err);
        }
        Ok(record)
    }

    pub fn validate(&self, key: &str) -> bool {
        self.keys.read().expect("key store lock").contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<ApiKey> {
        self.keys.read().expect("key store lock").get(key).cloned()
    }

    pub fn update(&self, key: &str, update: KeyUpdate) -> Result<ApiKey, KeyStoreError> {
        let mut keys = self.keys.write().expect("key store lock");
        let Some(existing) = keys.get(key).cloned() else {
            return Err(KeyStoreError::NotFound);
        };

        let mut updated = existing.clone();
        if let Some(note) = update.note {
            updated.note = note;
        }
        if let Some(rate_limit) = update.rate_limit {
            updated.rate_limit = rate_limit;
        }
        if let Some(allowed_models) = update.allowed_models {
            updated.allowed_models = allowed_models;
        }

        keys.insert(key.to_string(), updated.clone());
        if let Err(err) = self.save(&keys) {
            keys.insert(key.to_string(), existing);
            return Err(err);
        }
        Ok(updated)
    }

    pub fn revoke(&self, key: &str) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.write().expect("key store lock");
        let Some(removed) = keys.remove(key) else {
            return Err(KeyStoreError::NotFound);
        };
        if let Err(err) = self.save(&keys) {
            keys.insert(removed.key.clone(), removed);
            return Err(err);
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<ApiKey> {
        let mut list: Vec<ApiKey> = self
            .keys
            .read()
            .expect("key store lock")
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        list
    }

    fn save(&self, keys: &HashMap<String, ApiKey>) -> Result<(), KeyStoreError> {
        let mut list: Vec<&ApiKey> = keys.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        let data = serde_json::to_vec_pretty(&list)?;
        write_private(&self.path, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_validate_revoke() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path()).unwrap();

        let record = store
            .generate("ci".to_string(), 0, Vec::new())
            .unwrap();
        // Canonical 36-character UUID form.
        assert_eq!(record.key.len(), 36);
        assert!(store.validate(&record.key));

        store.revoke(&record.key).unwrap();
        assert!(!store.validate(&record.key));
        assert!(matches!(
            store.revoke(&record.key),
            Err(KeyStoreError::NotFound)
        ));
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let store = KeyStore::new(dir.path()).unwrap();
            store
                .generate("note".to_string(), 30, vec!["gemini-3-flash".to_string()])
                .unwrap()
                .key
        };

        let store = KeyStore::new(dir.path()).unwrap();
        let loaded = store.get(&key).unwrap();
        assert_eq!(loaded.note, "note");
        assert_eq!(loaded.rate_limit, 30);
        assert_eq!(loaded.allowed_models, vec!["gemini-3-flash"]);
    }

    #[test]
    fn update_merges_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path()).unwrap();
        let key = store.generate("old".to_string(), 10, Vec::new()).unwrap().key;

        let updated = store
            .update(
                &key,
                KeyUpdate {
                    rate_limit: Some(20),
                    ..KeyUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.note, "old");
        assert_eq!(updated.rate_limit, 20);

        assert!(matches!(
            store.update("missing", KeyUpdate::default()),
            Err(KeyStoreError::NotFound)
        ));
    }

    #[test]
    fn list_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path()).unwrap();
        for i in 0..3 {
            store.generate(format!("k{i}"), 0, Vec::new()).unwrap();
        }
        let listed = store.list();
        assert_eq!(listed.len(), 3);
        assert!(listed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
