// agproxy - API-translation proxy over the cloudcode upstream
//
// Exposes OpenAI-style (/v1/chat/completions, /v1/responses) and
// Anthropic-style (/v1/messages) surfaces over a single Gemini-style
// upstream, with OAuth account rotation, keyed rate limiting, and per-key
// model access control.
//
// Architecture:
// - Proxy server (axum): admission middleware + client/admin endpoints
// - Translators: three JSON dialects, two streaming state machines
// - Executor (reqwest): envelope finishing, base-URL fallback, SSE reading
// - Credential manager: account pool rotation and token refresh

mod auth;
mod cli;
mod config;
mod keystore;
mod proxy;
mod registry;
mod translate;
mod upstream;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::CredentialManager;
use config::Config;
use keystore::KeyStore;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config = Config::load(args.config.as_deref())?;

    if cli::handle_cli(&args, &config) {
        return Ok(());
    }

    // Precedence: RUST_LOG env var > config log_level
    let default_filter = format!("agproxy={},tower_http=info", config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Both directories must exist before any component touches them; failing
    // here is a non-zero exit per the process contract.
    std::fs::create_dir_all(&config.credentials_dir).with_context(|| {
        format!(
            "cannot create credentials dir {}",
            config.credentials_dir.display()
        )
    })?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data dir {}", config.data_dir.display()))?;

    let credentials = CredentialManager::init(
        &config.credentials_dir,
        &config.pool_path(),
        config.proxy_url.as_deref(),
    )?;
    let keystore = KeyStore::load(&config.keystore_path())?;

    tracing::info!(
        version = config::VERSION,
        mode = credentials.mode(),
        accounts = credentials.account_count().await,
        issued_keys = keystore.list().await.len(),
        static_keys = config.api_keys.len(),
        "starting agproxy on {}",
        config.bind_addr()
    );
    if config.master_secret.is_none() {
        tracing::warn!("master_secret is not configured; admin endpoints will answer 503");
    }

    let state = proxy::server::build_state(config, credentials, keystore)?;
    proxy::server::serve(state).await
}
