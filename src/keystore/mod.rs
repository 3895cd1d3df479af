//! Key store - issued API keys with metadata
//!
//! An in-memory map behind a reader/writer lock, persisted as a pretty-printed
//! JSON array (mode 0600) on every mutation. Persistence failures roll the
//! in-memory change back, so the map and the file never disagree for long.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// One issued API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Canonical 36-character UUIDv4, the record's identity.
    pub key: String,
    pub created_at: DateTime<Utc>,
    /// Operator note, free-form.
    #[serde(default)]
    pub note: Option<String>,
    /// Requests per minute; 0 or absent means unlimited.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Model allow-list; empty or absent means unrestricted.
    #[serde(default)]
    pub allowed_models: Option<Vec<String>>,
}

impl ApiKey {
    /// Effective per-minute ceiling, when the record carries a positive one.
    pub fn effective_rate_limit(&self) -> Option<u32> {
        self.rate_limit.filter(|&limit| limit > 0)
    }

    /// Allow-list when it actually restricts anything.
    pub fn model_allow_list(&self) -> Option<Vec<String>> {
        self.allowed_models
            .clone()
            .filter(|models| !models.is_empty())
    }
}

pub struct KeyStore {
    path: PathBuf,
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl KeyStore {
    /// Load the store from `<data_dir>/api_keys.json`; a missing file is an
    /// empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let keys = match std::fs::read_to_string(path) {
            Ok(raw) => {
                let records: Vec<ApiKey> = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid key store file {}", path.display()))?;
                records
                    .into_iter()
                    .map(|record| (record.key.clone(), record))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("cannot read key store file {}", path.display()))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            keys: RwLock::new(keys),
        })
    }

    pub async fn generate(
        &self,
        note: Option<String>,
        rate_limit: Option<u32>,
        allowed_models: Option<Vec<String>>,
    ) -> Result<ApiKey> {
        let record = ApiKey {
            key: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            note,
            rate_limit,
            allowed_models,
        };

        let mut keys = self.keys.write().await;
        keys.insert(record.key.clone(), record.clone());
        if let Err(e) = self.persist(&keys) {
            keys.remove(&record.key);
            return Err(e);
        }
        Ok(record)
    }

    pub async fn validate(&self, key: &str) -> bool {
        self.keys.read().await.contains_key(key)
    }

    pub async fn get(&self, key: &str) -> Option<ApiKey> {
        self.keys.read().await.get(key).cloned()
    }

    /// Update mutable fields of a record. `None` leaves a field untouched.
    /// Returns `Ok(None)` when the key does not exist.
    pub async fn update(
        &self,
        key: &str,
        note: Option<Option<String>>,
        rate_limit: Option<Option<u32>>,
        allowed_models: Option<Option<Vec<String>>>,
    ) -> Result<Option<ApiKey>> {
        let mut keys = self.keys.write().await;
        let Some(existing) = keys.get(key).cloned() else {
            return Ok(None);
        };

        let mut updated = existing.clone();
        if let Some(note) = note {
            updated.note = note;
        }
        if let Some(rate_limit) = rate_limit {
            updated.rate_limit = rate_limit;
        }
        if let Some(allowed_models) = allowed_models {
            updated.allowed_models = allowed_models;
        }

        keys.insert(key.to_string(), updated.clone());
        if let Err(e) = self.persist(&keys) {
            keys.insert(key.to_string(), existing);
            return Err(e);
        }
        Ok(Some(updated))
    }

    /// Remove a key. Returns `Ok(false)` when it did not exist.
    pub async fn revoke(&self, key: &str) -> Result<bool> {
        let mut keys = self.keys.write().await;
        let Some(removed) = keys.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&keys) {
            keys.insert(removed.key.clone(), removed);
            return Err(e);
        }
        Ok(true)
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Vec<ApiKey> {
        let mut records: Vec<ApiKey> = self.keys.read().await.values().cloned().collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }

    /// Full-file rewrite, mode 0600.
    fn persist(&self, keys: &HashMap<String, ApiKey>) -> Result<()> {
        let mut records: Vec<&ApiKey> = keys.values().collect();
        records.sort_by_key(|record| record.created_at);
        let json = serde_json::to_string_pretty(&records).context("cannot serialize key store")?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create data dir {}", parent.display()))?;
        }
        std::fs::write(&self.path, json)
            .with_context(|| format!("cannot write key store file {}", self.path.display()))?;
        restrict_permissions(&self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!("cannot set permissions on {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (KeyStore, PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "agproxy-keys-{}/api_keys.json",
            uuid::Uuid::new_v4()
        ));
        (KeyStore::load(&path).unwrap(), path)
    }

    #[tokio::test]
    async fn test_generate_then_validate_then_revoke() {
        let (store, path) = store();

        let record = store
            .generate(Some("ci".to_string()), Some(10), None)
            .await
            .unwrap();
        assert_eq!(record.key.len(), 36);
        assert!(store.validate(&record.key).await);

        assert!(store.revoke(&record.key).await.unwrap());
        assert!(!store.validate(&record.key).await);
        assert!(!store.revoke(&record.key).await.unwrap());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let (store, path) = store();
        let record = store.generate(None, None, None).await.unwrap();

        let updated = store
            .update(
                &record.key,
                Some(Some("renamed".to_string())),
                None,
                Some(Some(vec!["gemini-3-flash".to_string()])),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.note.as_deref(), Some("renamed"));
        assert_eq!(updated.rate_limit, None);
        assert_eq!(
            updated.model_allow_list(),
            Some(vec!["gemini-3-flash".to_string()])
        );

        assert!(store.update("missing", None, None, None).await.unwrap().is_none());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let (store, path) = store();
        store.generate(Some("a".to_string()), None, None).await.unwrap();
        store.generate(Some("b".to_string()), Some(5), None).await.unwrap();

        let reloaded = KeyStore::load(&path).unwrap();
        let records = reloaded.list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].note.as_deref(), Some("a"));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_zero_rate_limit_means_unlimited() {
        let (store, path) = store();
        let record = store.generate(None, Some(0), None).await.unwrap();
        assert_eq!(record.effective_rate_limit(), None);

        let record = store.generate(None, Some(5), None).await.unwrap();
        assert_eq!(record.effective_rate_limit(), Some(5));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_empty_allow_list_is_unrestricted() {
        let (store, path) = store();
        let record = store.generate(None, None, Some(Vec::new())).await.unwrap();
        assert_eq!(record.model_allow_list(), None);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
