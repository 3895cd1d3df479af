//! Account pool - round-robin rotation over an accounts.json document
//!
//! The pool file holds `{ "accounts": [...], "current_index": n }`. Selection
//! returns a copy of the account under the cursor and advances the cursor
//! modulo the pool size, all under one mutex so concurrent requests each get
//! exactly one advancement. The cursor is persisted best-effort: losing it to
//! a crash only restarts rotation from the last written position.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::credentials::Credential;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountsFile {
    pub accounts: Vec<Credential>,
    #[serde(default)]
    pub current_index: usize,
}

pub struct AccountPool {
    path: PathBuf,
    inner: Mutex<AccountsFile>,
}

impl AccountPool {
    /// Load the pool file. `Ok(None)` when the file does not exist (the
    /// manager falls back to single-credential mode).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read pool file {}", path.display()))
            }
        };

        let mut file: AccountsFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid pool file {}", path.display()))?;
        if file.accounts.is_empty() {
            anyhow::bail!("pool file {} has no accounts", path.display());
        }
        file.current_index %= file.accounts.len();

        Ok(Some(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(file),
        }))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.accounts.len()
    }

    /// Return a copy of the account under the cursor and advance once.
    pub async fn select(&self) -> Credential {
        let mut file = self.inner.lock().await;
        let index = file.current_index % file.accounts.len();
        let credential = file.accounts[index].clone();
        file.current_index = (index + 1) % file.accounts.len();
        self.persist(&file);
        credential
    }

    /// Fold a refreshed credential back into the pool by email.
    pub async fn store_refreshed(&self, credential: &Credential) {
        let mut file = self.inner.lock().await;
        if let Some(slot) = file
            .accounts
            .iter_mut()
            .find(|account| account.email == credential.email)
        {
            *slot = credential.clone();
            self.persist(&file);
        }
    }

    /// Best-effort write; the cursor does not need crash safety.
    fn persist(&self, file: &AccountsFile) {
        match serde_json::to_string_pretty(file) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!("cannot persist pool file {}: {e}", self.path.display());
                }
            }
            Err(e) => tracing::warn!("cannot serialize pool file: {e}"),
        }
    }
}
