//! Proxy module - the HTTP surface over the translation pipeline
//!
//! Owns the axum router, the shared application state, admission middleware,
//! and the request handlers. The translation and upstream modules stay free
//! of HTTP types; everything axum-shaped lives here.

pub mod admin;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod server;

use std::sync::Arc;

use crate::auth::CredentialManager;
use crate::config::Config;
use crate::keystore::KeyStore;
use crate::registry::ModelRegistry;
use crate::upstream::Executor;

use rate_limit::RateLimiter;

/// Shared state behind every handler and middleware layer.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ModelRegistry>,
    pub credentials: Arc<CredentialManager>,
    pub keystore: Arc<KeyStore>,
    pub limiter: Arc<RateLimiter>,
    pub executor: Arc<Executor>,
}
