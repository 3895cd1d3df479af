//! Configuration for the proxy server
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (`AGPROXY_*`, highest priority)
//! 2. YAML config file (`--config` path, or `config.yaml` in the working dir)
//! 3. Built-in defaults (lowest priority)
//!
//! A config file that exists but does not parse fails startup immediately - a
//! broken config should fail fast with a clear error, not silently fall back
//! to defaults while the user debugs the wrong thing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Statically configured API keys (in addition to the key store).
    pub api_keys: Vec<String>,
    /// Global requests-per-minute ceiling; 0 means unlimited.
    pub rate_limit: u32,
    /// Bearer secret guarding the admin surface.
    pub master_secret: Option<String>,
    /// Directory for the key store and the accounts pool file.
    pub data_dir: PathBuf,
    /// Optional upstream proxy (http, https, or socks5, inline credentials
    /// supported).
    pub proxy_url: Option<String>,
    /// Directory holding per-account credential files.
    pub credentials_dir: PathBuf,
    /// Fold reasoning text into plain content on the OpenAI surface.
    pub thinking_as_content: bool,
    /// Default tracing level when RUST_LOG is unset.
    pub log_level: String,
    /// Shorthand for log_level=debug.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            host: "127.0.0.1".to_string(),
            port: 8317,
            api_keys: Vec::new(),
            rate_limit: 0,
            master_secret: None,
            data_dir: home.join(".antigravity-wrapper"),
            proxy_url: None,
            credentials_dir: home.join(".antigravity"),
            thinking_as_content: false,
            log_level: "info".to_string(),
            debug: false,
        }
    }
}

/// Config file structure (everything optional; defaults fill the gaps)
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    api_keys: Option<Vec<String>>,
    rate_limit: Option<u32>,
    master_secret: Option<String>,
    data_dir: Option<PathBuf>,
    proxy_url: Option<String>,
    credentials_dir: Option<PathBuf>,
    thinking_as_content: Option<bool>,
    log_level: Option<String>,
    debug: Option<bool>,
}

impl Config {
    /// Load configuration: defaults, then file, then environment.
    ///
    /// An explicitly passed path must exist; the default `config.yaml` is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = Self::load_file(path)?;
        let defaults = Self::default();

        let mut config = Self {
            host: file.host.unwrap_or(defaults.host),
            port: file.port.unwrap_or(defaults.port),
            api_keys: file.api_keys.unwrap_or_default(),
            rate_limit: file.rate_limit.unwrap_or(defaults.rate_limit),
            master_secret: file.master_secret,
            data_dir: file.data_dir.unwrap_or(defaults.data_dir),
            proxy_url: file.proxy_url,
            credentials_dir: file.credentials_dir.unwrap_or(defaults.credentials_dir),
            thinking_as_content: file
                .thinking_as_content
                .unwrap_or(defaults.thinking_as_content),
            log_level: file.log_level.unwrap_or(defaults.log_level),
            debug: file.debug.unwrap_or(defaults.debug),
        };
        config.apply_env();

        config
            .host
            .parse::<IpAddr>()
            .with_context(|| format!("invalid host '{}'", config.host))?;
        if config.debug {
            config.log_level = "debug".to_string();
        }

        Ok(config)
    }

    fn load_file(path: Option<&Path>) -> Result<FileConfig> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from("config.yaml"), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .with_context(|| format!("cannot parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(FileConfig::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("cannot read config file {}", path.display()))
            }
        }
    }

    fn apply_env(&mut self) {
        if let Some(host) = env_var("AGPROXY_HOST") {
            self.host = host;
        }
        if let Some(port) = env_var("AGPROXY_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(keys) = env_var("AGPROXY_API_KEYS") {
            self.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(limit) = env_var("AGPROXY_RATE_LIMIT").and_then(|v| v.parse().ok()) {
            self.rate_limit = limit;
        }
        if let Some(secret) = env_var("AGPROXY_MASTER_SECRET") {
            self.master_secret = Some(secret);
        }
        if let Some(dir) = env_var("AGPROXY_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_var("AGPROXY_PROXY_URL") {
            self.proxy_url = Some(url);
        }
        if let Some(dir) = env_var("AGPROXY_CREDENTIALS_DIR") {
            self.credentials_dir = PathBuf::from(dir);
        }
        if let Some(flag) = env_var("AGPROXY_THINKING_AS_CONTENT") {
            self.thinking_as_content = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Some(level) = env_var("AGPROXY_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(flag) = env_var("AGPROXY_DEBUG") {
            self.debug = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        let ip: IpAddr = self
            .host
            .parse()
            .unwrap_or_else(|_| IpAddr::from([127, 0, 0, 1]));
        SocketAddr::new(ip, self.port)
    }

    /// `<data_dir>/accounts.json` - the optional account pool document.
    pub fn pool_path(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }

    /// `<data_dir>/api_keys.json` - the key store file.
    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join("api_keys.json")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
