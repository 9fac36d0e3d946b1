//! Broker configuration loaded from a JSON settings file.
//!
//! ```json
//! {
//!   "server_url": "https://play.example.com/",
//!   "local_server_url": "http://127.0.0.1:3000/",
//!   "use_local_server": false,
//!   "timeout_secs": 30,
//!   "max_connections": 8,
//!   "error_log_dir": "/var/tmp/game/error"
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONNECTIONS: usize = 8;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    pub server_url: String,
    pub local_server_url: Option<String>,
    /// Talk to `local_server_url` instead of `server_url`.
    pub use_local_server: bool,
    /// Whole-call timeout enforced by the transport.
    pub timeout_secs: u64,
    /// Idle connections kept per host.
    pub max_connections: usize,
    pub user_agent: String,
    /// Failed response bodies are written here when set.
    pub error_log_dir: Option<PathBuf>,
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            local_server_url: None,
            use_local_server: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            user_agent: concat!("broker-core/", env!("CARGO_PKG_VERSION")).to_string(),
            error_log_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.active_server_url()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// The server URL requests are sent to.
    pub fn active_server_url(&self) -> Result<&str, ConfigError> {
        if self.use_local_server {
            return self
                .local_server_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or(ConfigError::Missing("local_server_url"));
        }
        if self.server_url.is_empty() {
            return Err(ConfigError::Missing("server_url"));
        }
        Ok(&self.server_url)
    }

    /// Absolute URL for `path` on the active server.
    pub fn endpoint(&self, path: &str) -> Result<String, ConfigError> {
        let base = self.active_server_url()?.trim_end_matches('/');
        Ok(format!("{base}/{}", path.trim_start_matches('/')))
    }

    /// First label of the server host, e.g. `play` for `https://play.example.com/`.
    pub fn server_prefix(&self) -> &str {
        self.server_url
            .trim()
            .split("://")
            .flat_map(|part| part.split('.'))
            .nth(1)
            .unwrap_or("")
    }
}
