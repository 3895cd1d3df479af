//! Upstream HTTP dispatch
//!
//! Finishes the translated envelope with per-request identities, then posts it
//! to the cloudcode hosts. The sandbox host is tried first; a transport error
//! or 429 there moves the request to the production host. Any other upstream
//! status is returned as-is for the handler to surface.

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::Credential;
use crate::registry::ModelRegistry;
use crate::translate;

pub const SANDBOX_BASE_URL: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
pub const PROD_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";

const GENERATE_PATH: &str = "/v1internal:generateContent";
const STREAM_PATH: &str = "/v1internal:streamGenerateContent?alt=sse";

/// Client identification the upstream expects on every call.
pub const USER_AGENT: &str = "antigravity/1.11.5 (linux; x64) google-api-nodejs-client/9.15.1";

const ADJECTIVES: [&str; 12] = [
    "useful", "daring", "brisk", "calm", "eager", "fond", "glad", "keen", "lively", "merry",
    "proud", "swift",
];
const NOUNS: [&str; 12] = [
    "meadow", "harbor", "comet", "cedar", "ridge", "brook", "lantern", "orchard", "summit",
    "valley", "willow", "zephyr",
];

pub struct Executor {
    client: reqwest::Client,
    registry: Arc<ModelRegistry>,
    /// Fallback host order; a credential-pinned base URL overrides it.
    base_urls: Vec<String>,
}

impl Executor {
    pub fn new(proxy_url: Option<&str>, registry: Arc<ModelRegistry>) -> Result<Self> {
        // No global timeout: streamed generations routinely run for minutes.
        // Force HTTP/1.1 to avoid HTTP/2 connection reset issues upstream.
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .http1_only();
        if let Some(url) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(url).context("invalid proxy URL")?);
        }
        let client = builder.build().context("cannot build upstream HTTP client")?;
        Ok(Self {
            client,
            registry,
            base_urls: vec![SANDBOX_BASE_URL.to_string(), PROD_BASE_URL.to_string()],
        })
    }

    #[cfg(test)]
    fn with_base_urls(mut self, base_urls: Vec<String>) -> Self {
        self.base_urls = base_urls;
        self
    }

    /// Inject the per-request fields the translators leave out: resolved
    /// model, project, request/session identities, user agent, and the fixed
    /// tool-calling mode.
    pub fn finish_envelope(&self, envelope: &mut Value, credential: &Credential) {
        let model = envelope
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(crate::registry::DEFAULT_MODEL);
        let resolved = self.registry.resolve(model).to_string();
        translate::set(envelope, "/model", json!(resolved));

        let project = credential
            .project_id
            .clone()
            .unwrap_or_else(synthetic_project_id);
        translate::set(envelope, "/project", json!(project));

        translate::set(
            envelope,
            "/requestId",
            json!(format!("agent-{}", uuid::Uuid::new_v4())),
        );
        translate::set(envelope, "/request/sessionId", json!(synthetic_session_id()));

        let user_agent = credential.user_agent.as_deref().unwrap_or(USER_AGENT);
        translate::set(envelope, "/userAgent", json!(user_agent));

        translate::set(
            envelope,
            "/request/toolConfig/functionCallingConfig/mode",
            json!("VALIDATED"),
        );
    }

    /// Dispatch the envelope, falling back across base URLs.
    ///
    /// A credential-pinned base URL disables fallback entirely. The returned
    /// response may be non-2xx; the handler surfaces those verbatim.
    pub async fn execute(
        &self,
        envelope: &Value,
        credential: &Credential,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let path = if stream { STREAM_PATH } else { GENERATE_PATH };
        let accept = if stream { "text/event-stream" } else { "application/json" };
        let bases = self.hosts_for(credential);

        for (attempt, base) in bases.iter().enumerate() {
            let is_last = attempt == bases.len() - 1;
            let url = format!("{base}{path}");

            let result = self
                .client
                .post(&url)
                .bearer_auth(&credential.access_token)
                .header("Accept", accept)
                .json(envelope)
                .send()
                .await;

            match result {
                Ok(response) if response.status().as_u16() == 429 && !is_last => {
                    tracing::warn!(%base, "upstream returned 429, falling back to next host");
                }
                Ok(response) => return Ok(response),
                Err(e) if !is_last => {
                    tracing::warn!(%base, "upstream transport error, falling back: {e}");
                }
                Err(e) => return Err(e).context("upstream request failed on final host"),
            }
        }

        Err(anyhow::anyhow!("no upstream hosts configured"))
    }

    /// Host order for one request: the pinned base when the credential
    /// carries one (fallback disabled), otherwise sandbox first, production
    /// second.
    fn hosts_for(&self, credential: &Credential) -> Vec<String> {
        match &credential.base_url {
            Some(base) => vec![base.trim_end_matches('/').to_string()],
            None => self.base_urls.clone(),
        }
    }
}

/// `<adjective>-<noun>-<5 hex chars>` stand-in when the account has no
/// project of its own.
fn synthetic_project_id() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let suffix: u32 = rng.gen_range(0..0x100000);
    format!("{adjective}-{noun}-{suffix:05x}")
}

/// Negative 19-digit decimal, rendered as a string so no JSON reader rounds
/// it.
fn synthetic_session_id() -> String {
    let mut rng = rand::thread_rng();
    let id: i64 = rng.gen_range(1_000_000_000_000_000_000..=i64::MAX);
    format!("-{id}")
}
