//! Configuration for the portcullis server.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port (default: 2222 for non-privileged, 22 for SSH standard)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory served to authenticated sessions
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// SSH host key path; a fresh key is generated when the file is absent
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,

    /// Deadline for one authentication attempt, in seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Connection inactivity timeout in seconds
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// Maximum packet size (RFC 4254 recommends 32768 bytes minimum)
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,

    /// Window size for flow control
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    /// Users seeded into the directory at startup
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A user seeded from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Login name
    pub username: String,
    /// Password presented at login
    pub secret: String,
    /// Origin specs: `"*"`, CIDR prefixes, or bare addresses
    #[serde(default)]
    pub origins: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            host_key_path: default_host_key_path(),
            auth_timeout_secs: default_auth_timeout(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            max_packet_size: default_max_packet_size(),
            window_size: default_window_size(),
            users: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not parse as TOML.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Fails when the root directory is unusable or a limit is out of
    /// range.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.root_dir.exists() {
            return Err(crate::Error::Config(format!(
                "Root directory does not exist: {:?}",
                self.root_dir
            )));
        }

        if !self.root_dir.is_dir() {
            return Err(crate::Error::Config(format!(
                "Root path is not a directory: {:?}",
                self.root_dir
            )));
        }

        if self.max_packet_size < 32768 {
            return Err(crate::Error::Config(
                "max_packet_size must be at least 32768 bytes (RFC 4254)".to_string(),
            ));
        }

        if self.auth_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "auth_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The authentication deadline as a [`Duration`].
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2222 // Non-privileged port for testing
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/tmp/portcullis")
}

fn default_host_key_path() -> PathBuf {
    PathBuf::from("/etc/portcullis/host_key")
}

fn default_auth_timeout() -> u64 {
    5
}

fn default_inactivity_timeout() -> u64 {
    300 // 5 minutes
}

fn default_max_packet_size() -> u32 {
    32768 // RFC 4254 minimum
}

fn default_window_size() -> u32 {
    2097152 // 2MB
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_validate_against_an_existing_root() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            root_dir: root.path().to_path_buf(),
            ..Config::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn undersized_packet_limit_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            root_dir: root.path().to_path_buf(),
            max_packet_size: 1024,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn user_seeding_table_parses() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
port = 2400

[[users]]
username = "alice"
secret = "s3cret"
origins = ["10.0.0.0/24", "::1"]

[[users]]
username = "bob"
secret = "pw"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.port, 2400);
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[0].origins.len(), 2);
        assert!(config.users[1].origins.is_empty());
    }

    #[test]
    fn missing_config_file_reports_config_error() {
        let result = Config::from_file("/nonexistent/portcullis.toml");
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
