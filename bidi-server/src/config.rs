//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML file named by BIDI_CONFIG
//! 3. Environment variables

use bidi_protocol::types::LogLevel;
use bidi_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Administration and logging.
    pub server: ServerSection,
    /// Notification delivery.
    pub notifications: NotificationsConfig,
    /// Session cipher cache limits.
    pub sessions: SessionsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("BIDI_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Yaml(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.storage.apply_env_overrides();
        self.server.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "network.url must not be empty".to_string(),
            ));
        }
        if self.network.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        if self.notifications.pulse_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "notifications.pulse_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.sessions.inactivity_limit_secs > self.sessions.validity_limit_secs {
            return Err(ConfigError::Invalid(
                "sessions.inactivity_limit_secs exceeds sessions.validity_limit_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Yaml(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Host name clients use to reach the server. Written into credential
    /// bundles.
    pub url: String,
    /// Read timeout during the handshake and request phases, in seconds.
    pub socket_timeout_secs: u64,
    /// Maximum concurrent connections. Connections beyond the cap are refused.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            url: "localhost".to_string(),
            socket_timeout_secs: 30,
            max_connections: 200,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("BIDI_HOST") {
            if let Ok(ip) = host.parse() {
                self.bind_addr.set_ip(ip);
            }
        }

        if let Ok(port) = std::env::var("BIDI_PORT") {
            if let Ok(port) = port.parse() {
                self.bind_addr.set_port(port);
            }
        }

        if let Ok(url) = std::env::var("BIDI_URL") {
            self.url = url;
        }

        if let Ok(max) = std::env::var("BIDI_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Home directory. Server data lives in `<home_dir>/ServerData`.
    pub home_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from("."),
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("BIDI_HOME") {
            self.home_dir = PathBuf::from(dir);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Contact address handed to users in their credential bundles.
    pub admin_email: String,
    /// Minimum level written to the event log.
    pub log_level: LogLevel,
}

impl ServerSection {
    fn apply_env_overrides(&mut self) {
        if let Ok(email) = std::env::var("BIDI_ADMIN_EMAIL") {
            self.admin_email = email;
        }

        if let Ok(level) = std::env::var("BIDI_LOG_LEVEL") {
            if let Ok(level) = level.parse() {
                self.log_level = level;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Interval between pings to live notification channels, in seconds.
    pub pulse_interval_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            pulse_interval_secs: 30,
        }
    }
}

impl NotificationsConfig {
    pub fn pulse_interval(&self) -> Duration {
        Duration::from_secs(self.pulse_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// A cached session expires after this long without use, in seconds.
    pub inactivity_limit_secs: u64,
    /// A cached session expires this long after creation, in seconds.
    pub validity_limit_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            inactivity_limit_secs: 120,
            validity_limit_secs: 1800,
        }
    }
}

impl SessionsConfig {
    pub fn inactivity_limit(&self) -> Duration {
        Duration::from_secs(self.inactivity_limit_secs)
    }

    pub fn validity_limit(&self) -> Duration {
        Duration::from_secs(self.validity_limit_secs)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid YAML in {}: {1}", .0.display())]
    Yaml(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 56084);
        assert_eq!(config.network.url, "localhost");
        assert_eq!(config.network.socket_timeout(), Duration::from_secs(30));
        assert_eq!(config.network.max_connections, 200);
        assert_eq!(config.notifications.pulse_interval(), Duration::from_secs(30));
        assert_eq!(config.sessions.inactivity_limit(), Duration::from_secs(120));
        assert_eq!(config.sessions.validity_limit(), Duration::from_secs(1800));
        assert_eq!(config.server.log_level, LogLevel::Information);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.server.admin_email = "admin@example.org".to_string();
        config.server.log_level = LogLevel::Verbose;
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.server.admin_email, "admin@example.org");
        assert_eq!(parsed.server.log_level, LogLevel::Verbose);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bidi.yaml");
        std::fs::write(
            &path,
            "network:\n  bind_addr: \"127.0.0.1:9000\"\nserver:\n  log_level: Warning\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.network.bind_addr.port(), 9000);
        assert_eq!(config.network.url, "localhost");
        assert_eq!(config.server.log_level, LogLevel::Warning);
        assert_eq!(config.sessions.validity_limit_secs, 1800);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bidi.yaml");
        let mut config = Config::default();
        config.network.url = "bidi.example.org".to_string();
        config.save(&path).unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.network.url, "bidi.example.org");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = Config::default();
        config.sessions.inactivity_limit_secs = 4000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/bidi.yaml"),
            Err(ConfigError::Io(_, _))
        ));
    }
}
