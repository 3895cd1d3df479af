//! OAuth refresh-token exchange
//!
//! Posts the stored refresh token to the Google OAuth token endpoint with the
//! static client credentials and folds the response back into the credential
//! record. A failed refresh is logged and swallowed: the stale token goes out
//! once and the upstream's 401 tells the caller what happened.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Deserialize;

use super::credentials::Credential;

pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

// Installed-app OAuth client the upstream IDE registered; not a secret in the
// OAuth sense, it only identifies the application.
const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";

/// Hard ceiling on any OAuth round-trip.
const REFRESH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refreshes access tokens through a dedicated short-timeout HTTP client.
pub struct TokenRefresher {
    client: reqwest::Client,
}

impl TokenRefresher {
    pub fn new(proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REFRESH_TIMEOUT_SECS));
        if let Some(url) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(url).context("invalid proxy URL")?);
        }
        let client = builder.build().context("cannot build OAuth HTTP client")?;
        Ok(Self { client })
    }

    /// Refresh the credential in place when it is inside the expiry window.
    ///
    /// Returns `true` when a refresh happened (callers persist afterwards).
    /// Failure leaves the credential untouched.
    pub async fn refresh_if_needed(&self, credential: &mut Credential) -> bool {
        if !credential.is_expired(Utc::now()) {
            return false;
        }

        tracing::info!(email = %credential.email, "refreshing access token");
        match self.exchange(&credential.refresh_token).await {
            Ok(token) => {
                let now = Utc::now();
                credential.access_token = token.access_token;
                if let Some(refresh_token) = token.refresh_token {
                    credential.refresh_token = refresh_token;
                }
                credential.expires_in = Some(token.expires_in);
                credential.timestamp = Some(now.timestamp_millis());
                credential.expiry =
                    (now + Duration::seconds(token.expires_in as i64)).to_rfc3339();
                true
            }
            Err(e) => {
                // Serve the stale token once; the upstream 401 surfaces the
                // real problem to the caller.
                tracing::warn!(email = %credential.email, "token refresh failed: {e:#}");
                false
            }
        }
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ];

        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&params)
            .send()
            .await
            .context("token endpoint unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token endpoint returned {status}: {body}");
        }

        response
            .json::<TokenResponse>()
            .await
            .context("invalid token endpoint response")
    }
}
