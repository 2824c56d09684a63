//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compositor::CaptionStyle;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub caption: CaptionConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Largest accepted request body (signature uploads)
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Directory holding `signflow.db`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// TrueType/OpenType font used for the caption
    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,

    #[serde(flatten)]
    pub style: CaptionStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// How long redeemed tokens are remembered, in seconds
    #[serde(default = "default_used_retention")]
    pub used_retention_secs: u64,

    /// Interval between purges of redeemed tokens, in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer key required on administrative routes. Unset disables the check.
    #[serde(default)]
    pub api_key: Option<String>,
}

// Defaults
fn default_http_port() -> u16 { 8080 }
fn default_bind() -> String { "0.0.0.0".to_string() }
fn default_max_body() -> usize { 10 * 1024 * 1024 } // 10MB
fn default_backend() -> StorageBackend { StorageBackend::Sqlite }
fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_pool_size() -> u32 { 8 }
fn default_font_path() -> PathBuf { PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf") }
fn default_used_retention() -> u64 { 7 * 24 * 3600 }
fn default_purge_interval() -> u64 { 300 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind: default_bind(),
            max_body_bytes: default_max_body(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            font_path: default_font_path(),
            style: CaptionStyle::default(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            used_retention_secs: default_used_retention(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl TokenConfig {
    pub fn used_retention(&self) -> Duration {
        Duration::from_secs(self.used_retention_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl AuthConfig {
    /// Configured key, ignoring blank values
    pub fn key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read `path`, or fall back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.caption.style.line_height, 30);
        assert!(config.auth.key().is_none());
    }

    #[test]
    fn test_blank_api_key_is_disabled() {
        let config = Config::from_toml("[auth]\napi_key = \"  \"\n").unwrap();
        assert!(config.auth.key().is_none());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(matches!(
            Config::from_toml("[storage]\nbackend = \"postgres\"\n"),
            Err(EngineError::Config(_))
        ));
    }
}
