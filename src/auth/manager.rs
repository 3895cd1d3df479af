//! Credential manager - mode selection and the per-request acquire path
//!
//! Two mutually exclusive modes, decided once at startup:
//!
//! - **Account pool**: `accounts.json` exists; every acquire rotates the
//!   cursor and refreshed tokens are folded back into the pool document.
//! - **Single credential**: no pool file; the first account file found in the
//!   credentials directory is served on every request, refreshed in place.
//!
//! Either way, `acquire` runs the token refresher before handing the
//! credential out, so the executor always sees the freshest token available.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::credentials::{self, Credential};
use super::pool::AccountPool;
use super::refresh::TokenRefresher;

enum Source {
    Pool(AccountPool),
    Single {
        path: PathBuf,
        credential: Mutex<Credential>,
    },
    /// No credentials found anywhere; every acquire fails with a clear error.
    Empty,
}

pub struct CredentialManager {
    source: Source,
    refresher: TokenRefresher,
}

impl CredentialManager {
    /// Pick the mode: pool file if present, else the first credential file in
    /// the credentials directory, else empty.
    pub fn init(
        credentials_dir: &Path,
        pool_path: &Path,
        proxy_url: Option<&str>,
    ) -> Result<Self> {
        let refresher = TokenRefresher::new(proxy_url)?;

        if let Some(pool) = AccountPool::load(pool_path)? {
            return Ok(Self {
                source: Source::Pool(pool),
                refresher,
            });
        }

        let mut accounts = credentials::load_all(credentials_dir)?;
        if let Some((path, credential)) = accounts.drain(..).next() {
            return Ok(Self {
                source: Source::Single {
                    path,
                    credential: Mutex::new(credential),
                },
                refresher,
            });
        }

        tracing::warn!(
            "no credentials found in {} and no pool file at {}",
            credentials_dir.display(),
            pool_path.display()
        );
        Ok(Self {
            source: Source::Empty,
            refresher,
        })
    }

    /// Hand out a credential for one upstream request, refreshing first when
    /// the token is inside the expiry window.
    pub async fn acquire(&self) -> Result<Credential> {
        match &self.source {
            Source::Pool(pool) => {
                let mut credential = pool.select().await;
                if self.refresher.refresh_if_needed(&mut credential).await {
                    pool.store_refreshed(&credential).await;
                }
                Ok(credential)
            }
            Source::Single { path, credential } => {
                let mut guard = credential.lock().await;
                if self.refresher.refresh_if_needed(&mut guard).await {
                    if let Err(e) = guard.save(path) {
                        tracing::warn!("cannot persist refreshed credential: {e:#}");
                    }
                }
                Ok(guard.clone())
            }
            Source::Empty => anyhow::bail!("no credentials configured"),
        }
    }

    pub fn mode(&self) -> &'static str {
        match &self.source {
            Source::Pool(_) => "account-pool",
            Source::Single { .. } => "single-credential",
            Source::Empty => "none",
        }
    }

    pub async fn account_count(&self) -> usize {
        match &self.source {
            Source::Pool(pool) => pool.len().await,
            Source::Single { .. } => 1,
            Source::Empty => 0,
        }
    }
}
