//! Credential records and their on-disk representation
//!
//! One JSON file per authenticated account, named
//! `antigravity-<sanitized-email>.json` inside the credentials directory,
//! written with mode 0600. The record is refreshed in place: every successful
//! token refresh rewrites the file.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A credential counts as expired this long before its actual expiry, so a
/// token is never handed to the executor with only minutes left on it.
pub const EXPIRY_SKEW_MINUTES: i64 = 50;

/// One authenticated user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Account identifier.
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Token lifetime in seconds, as reported by the token endpoint.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Issuance timestamp, milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Absolute expiry, ISO-8601.
    pub expiry: String,
    /// Upstream project to bill against; a synthetic id is generated when
    /// absent.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Per-account user-agent override.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Pins the upstream base URL, disabling host fallback.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Credential {
    /// Whether the access token is within the refresh window.
    ///
    /// An unparseable expiry counts as expired - refreshing a healthy token
    /// is cheap, serving a dead one costs the request.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.expiry) {
            Ok(expiry) => now + Duration::minutes(EXPIRY_SKEW_MINUTES) >= expiry,
            Err(_) => true,
        }
    }

    /// File name for this account inside the credentials directory.
    pub fn file_name(email: &str) -> String {
        format!("antigravity-{}.json", sanitize_email(email))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read credential file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid credential JSON in {}", path.display()))
    }

    /// Write the record back to disk, mode 0600.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("cannot serialize credential")?;
        std::fs::write(path, json)
            .with_context(|| format!("cannot write credential file {}", path.display()))?;
        restrict_permissions(path);
        Ok(())
    }
}

/// Replace everything outside `[a-zA-Z0-9]` so an email becomes a safe file
/// name component.
pub fn sanitize_email(email: &str) -> String {
    email
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Scan the credentials directory for account files.
pub fn load_all(dir: &Path) -> Result<Vec<(PathBuf, Credential)>> {
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => {
            return Err(e).with_context(|| format!("cannot read credentials dir {}", dir.display()))
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("antigravity-") || !name.ends_with(".json") {
            continue;
        }
        match Credential::load(&path) {
            Ok(credential) => found.push((path, credential)),
            Err(e) => tracing::warn!("skipping unreadable credential {}: {e:#}", name),
        }
    }

    found.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(found)
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
