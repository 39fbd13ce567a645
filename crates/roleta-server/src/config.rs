//! Server configuration.
//!
//! Supports loading from a TOML file with environment variable
//! overrides. Environment wins over the file so containerized deploys
//! can stay file-less.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for roleta-server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind the WebSocket listener on.
    pub host: String,

    /// Listener port.
    pub port: u16,

    /// Logging level.
    pub log_level: String,

    /// TLS settings for the listener.
    pub tls: TlsConfig,

    /// Handshake authentication settings.
    pub auth: AuthConfig,

    /// Paths for the snapshot file and the decision log database.
    pub storage: StorageConfig,

    /// Grace period before a disconnected master loses its role, in
    /// seconds.
    pub master_grace_secs: u64,

    /// Interval between state_sync heartbeat broadcasts, in seconds.
    pub heartbeat_secs: u64,

    /// Budget for snapshot and decision-log writes before the spin is
    /// answered without them, in milliseconds.
    pub persist_timeout_ms: u64,
}

/// Optional WSS termination.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Bearer-token handshake auth.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token: Option<String>,
}

/// Durable storage locations.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// JSON snapshot of the game state, rewritten after every spin.
    pub state_path: String,

    /// SQLite decision log database.
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: "data/roleta_state.json".to_string(),
            database_path: "data/roleta_decisions.db".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            log_level: "info".to_string(),
            tls: TlsConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            master_grace_secs: 10,
            heartbeat_secs: 1,
            persist_timeout_ms: 2000,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("WS_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("WS_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(enabled) = std::env::var("SSL_ENABLED") {
            self.tls.enabled = parse_bool(&enabled);
        }
        if let Ok(cert) = std::env::var("SSL_CERT") {
            self.tls.cert_path = Some(cert);
        }
        if let Ok(key) = std::env::var("SSL_KEY") {
            self.tls.key_path = Some(key);
        }
        if let Ok(enabled) = std::env::var("AUTH_ENABLED") {
            self.auth.enabled = parse_bool(&enabled);
        }
        if let Ok(token) = std::env::var("AUTH_TOKEN") {
            self.auth.token = Some(token);
        }
        if let Ok(path) = std::env::var("STATE_PATH") {
            self.storage.state_path = path;
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.storage.database_path = path;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(&mut self, host: Option<String>, port: Option<u16>) {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
    }

    /// Validate configuration and return errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.auth.enabled && self.auth.token.as_deref().unwrap_or("").is_empty() {
            bail!("AUTH_ENABLED requires AUTH_TOKEN to be set");
        }
        if self.heartbeat_secs == 0 {
            bail!("heartbeat_secs must be at least 1");
        }
        if self.persist_timeout_ms == 0 {
            bail!("persist_timeout_ms must be positive");
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

// TOML file shape; flattened into ServerConfig on load.

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    general: TomlGeneral,
    #[serde(default)]
    tls: TomlTls,
    #[serde(default)]
    auth: TomlAuth,
    #[serde(default)]
    storage: TomlStorage,
}

#[derive(Debug, Deserialize)]
struct TomlGeneral {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_grace")]
    master_grace_secs: u64,
    #[serde(default = "default_heartbeat")]
    heartbeat_secs: u64,
    #[serde(default = "default_persist_timeout")]
    persist_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Default)]
struct TomlTls {
    #[serde(default)]
    enabled: bool,
    cert_path: Option<String>,
    key_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlAuth {
    #[serde(default)]
    enabled: bool,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlStorage {
    #[serde(default = "default_state_path")]
    state_path: String,
    #[serde(default = "default_database_path")]
    database_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_grace() -> u64 {
    10
}
fn default_heartbeat() -> u64 {
    1
}
fn default_persist_timeout() -> u64 {
    2000
}
fn default_state_path() -> String {
    StorageConfig::default().state_path
}
fn default_database_path() -> String {
    StorageConfig::default().database_path
}

impl Default for TomlGeneral {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            master_grace_secs: default_grace(),
            heartbeat_secs: default_heartbeat(),
            persist_timeout_ms: default_persist_timeout(),
        }
    }
}

impl Default for TomlStorage {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            database_path: default_database_path(),
        }
    }
}

impl From<TomlConfig> for ServerConfig {
    fn from(toml: TomlConfig) -> Self {
        Self {
            host: toml.general.host,
            port: toml.general.port,
            log_level: toml.general.log_level,
            tls: TlsConfig {
                enabled: toml.tls.enabled,
                cert_path: toml.tls.cert_path,
                key_path: toml.tls.key_path,
            },
            auth: AuthConfig {
                enabled: toml.auth.enabled,
                token: toml.auth.token,
            },
            storage: StorageConfig {
                state_path: toml.storage.state_path,
                database_path: toml.storage.database_path,
            },
            master_grace_secs: toml.general.master_grace_secs,
            heartbeat_secs: toml.general.heartbeat_secs,
            persist_timeout_ms: toml.general.persist_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8765);
        assert!(!config.tls.enabled);
        assert!(!config.auth.enabled);
        assert_eq!(config.master_grace_secs, 10);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [general]
            host = "127.0.0.1"
            port = 9000
            log_level = "debug"

            [tls]
            enabled = true
            cert_path = "certs/server.pem"
            key_path = "certs/server.key"

            [storage]
            state_path = "/var/lib/roleta/state.json"
        "#;
        let config = ServerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert!(config.tls.enabled);
        assert_eq!(config.tls.cert_path.as_deref(), Some("certs/server.pem"));
        assert_eq!(config.storage.state_path, "/var/lib/roleta/state.json");
        // Unspecified sections fall back to defaults.
        assert_eq!(config.storage.database_path, "data/roleta_decisions.db");
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.port, 8765);
    }

    #[test]
    fn test_auth_requires_token() {
        let mut config = ServerConfig::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());
        config.auth.token = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = ServerConfig::default();
        config.apply_cli_overrides(Some("10.0.0.1".to_string()), Some(1234));
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn test_parse_bool_variants() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }
}
