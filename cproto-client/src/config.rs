//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CPROTO_CONFIG or --config)
//! 3. Environment variables

use crate::connection::{ConnectionConfig, DEFAULT_MAX_PENDING_CALLS, DEFAULT_READ_BUFFER_SIZE};
use cproto_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address.
    #[serde(with = "socket_addr_serde")]
    pub addr: SocketAddr,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database opened by the login call.
    pub database: String,
    /// Dial + login timeout in seconds.
    pub login_timeout_secs: u64,
    /// Default per-call timeout in seconds (0 = none).
    pub request_timeout_secs: u64,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive_secs: u64,
    /// Deadline sweep interval in milliseconds.
    pub deadline_check_ms: u64,
    /// Completion table capacity.
    pub max_pending_calls: usize,
    /// Socket read buffer size in bytes.
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            login_timeout_secs: 10,
            request_timeout_secs: 30,
            keep_alive_secs: 30,
            deadline_check_ms: 1000,
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CPROTO_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Some(addr) = env_parse("CPROTO_ADDR") {
            self.addr = addr;
        }
        if let Ok(user) = std::env::var("CPROTO_USER") {
            self.user = user;
        }
        if let Ok(password) = std::env::var("CPROTO_PASSWORD") {
            self.password = password;
        }
        if let Ok(database) = std::env::var("CPROTO_DATABASE") {
            self.database = database;
        }
        if let Some(secs) = env_parse("CPROTO_LOGIN_TIMEOUT") {
            self.login_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("CPROTO_REQUEST_TIMEOUT") {
            self.request_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("CPROTO_KEEP_ALIVE") {
            self.keep_alive_secs = secs;
        }
        if let Some(n) = env_parse("CPROTO_MAX_PENDING") {
            self.max_pending_calls = n;
        }
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }

    /// Builds the connection configuration.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr)
            .with_credentials(&self.user, &self.password)
            .with_database(&self.database)
            .with_login_timeout(Duration::from_secs(self.login_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_keep_alive_interval(Duration::from_secs(self.keep_alive_secs))
            .with_deadline_check_interval(Duration::from_millis(self.deadline_check_ms))
            .with_max_pending_calls(self.max_pending_calls)
            .with_read_buffer_size(self.read_buffer_size)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", key, value);
            None
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, std::io::Error),
    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, String),
}

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
    use crate::connection::{MAX_READ_BUFFER_SIZE, MIN_READ_BUFFER_SIZE};
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.addr.port(), 6534);
        assert_eq!(config.max_pending_calls, 40);
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(config.read_buffer_size, 8 * 1024);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");

        let config = ClientConfig {
            user: "admin".into(),
            database: "books".into(),
            max_pending_calls: 8,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = ClientConfig::from_file(&path).unwrap();
        assert_eq!(loaded.addr, config.addr);
        assert_eq!(loaded.user, "admin");
        assert_eq!(loaded.database, "books");
        assert_eq!(loaded.max_pending_calls, 8);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "addr: \"10.0.0.5:7000\"").unwrap();
        writeln!(file, "keep_alive_secs: 0").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.addr, "10.0.0.5:7000".parse().unwrap());
        assert_eq!(config.keep_alive_secs, 0);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_file_errors() {
        let missing = ClientConfig::from_file("/nonexistent/cproto.yaml");
        assert!(matches!(missing, Err(ConfigError::IoError(..))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "addr: not-an-address").unwrap();
        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().starts_with("failed to parse config file"));
    }

    #[test]
    fn test_to_connection_config() {
        let config = ClientConfig {
            user: "u".into(),
            password: "p".into(),
            database: "db".into(),
            keep_alive_secs: 0,
            deadline_check_ms: 50,
            max_pending_calls: 0,
            read_buffer_size: 1,
            ..Default::default()
        };
        let conn = config.to_connection_config();
        assert_eq!(conn.user, "u");
        assert_eq!(conn.password, "p");
        assert_eq!(conn.database, "db");
        assert_eq!(conn.keep_alive_interval, Duration::ZERO);
        assert_eq!(conn.deadline_check_interval, Duration::from_millis(50));
        assert_eq!(conn.max_pending_calls, 1);
        assert_eq!(conn.read_buffer_size, MIN_READ_BUFFER_SIZE);
        assert!(conn.read_buffer_size <= MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("CPROTO_USER", "env-user");
        std::env::set_var("CPROTO_MAX_PENDING", "12");
        std::env::set_var("CPROTO_KEEP_ALIVE", "not-a-number");

        let config = ClientConfig::from_env();
        assert_eq!(config.user, "env-user");
        assert_eq!(config.max_pending_calls, 12);
        assert_eq!(config.keep_alive_secs, 30);

        std::env::remove_var("CPROTO_USER");
        std::env::remove_var("CPROTO_MAX_PENDING");
        std::env::remove_var("CPROTO_KEEP_ALIVE");
    }
}
