//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.fsgw/config.json`) and
//! environment. Only the gateway section exists today; reconnect and timeout
//! tuning defaults match the gateway service's expectations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway endpoint and tuning.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Gateway endpoint, credential, and timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Gateway base URL, e.g. "http://127.0.0.1:8080". Required for any call.
    #[serde(default)]
    pub base_url: String,

    /// Access token sent as X-Access-Token. Overridden by FSGW_ACCESS_TOKEN env.
    pub access_token: Option<String>,

    /// First reconnect delay in seconds (default 1).
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// Reconnect delay ceiling in seconds (default 60).
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// WebSocket connect timeout in seconds (default 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// WebSocket ping interval in seconds (default 30).
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// send_message request timeout in seconds (default 15).
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_initial_backoff_secs() -> u64 {
    1
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_send_timeout_secs() -> u64 {
    15
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: None,
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

/// Resolve the gateway access token: env FSGW_ACCESS_TOKEN overrides config.
pub fn resolve_access_token(config: &Config) -> Option<String> {
    std::env::var("FSGW_ACCESS_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .gateway
                .access_token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FSGW_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".fsgw").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or FSGW_CONFIG_PATH). Missing file => default config.
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(default_config_path);
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
