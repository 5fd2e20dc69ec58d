//! Configuration management for Tally
//!
//! Both binaries build one of these values once at startup (defaults, then an
//! optional TOML file, then flags/environment) and hand it to the components
//! that need it. Nothing here is global.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, TallyError};

/// Server-side configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_address")]
    pub address: String,

    /// Seconds between snapshot flushes; 0 means write-through
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,

    /// Snapshot file for the file backend
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: Option<PathBuf>,

    /// Database location for the relational backend; wins over the file path
    #[serde(default)]
    pub database_dsn: Option<String>,

    /// Load the last snapshot before accepting traffic
    #[serde(default = "default_true")]
    pub restore: bool,

    /// Shared secret for sample integrity codes
    #[serde(default)]
    pub key: Option<String>,

    /// PEM private key used to decrypt inbound payloads
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,

    /// Reject samples that carry no integrity code when a key is set
    #[serde(default)]
    pub require_signatures: bool,
}

/// Agent-side configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Server address to report to
    #[serde(default = "default_address")]
    pub address: String,

    /// Seconds between reports
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Seconds between runtime polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Shared secret for sample integrity codes
    #[serde(default)]
    pub key: Option<String>,

    /// PEM public key used to encrypt outbound payloads
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,

    /// Number of concurrent delivery workers
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
}

/// Where snapshots go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// In-memory only
    None,
    File(PathBuf),
    Database(String),
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> Option<PathBuf> {
    Some(PathBuf::from("/tmp/metrics-db.json"))
}

fn default_true() -> bool {
    true
}

fn default_report_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_rate_limit() -> usize {
    1
}

fn load_toml<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        TallyError::Config(format!("failed to parse {}: {}", path.display(), e))
    })
}

impl ServerConfig {
    /// Load configuration from a TOML file, or use defaults when none is given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(TallyError::Config("address must not be empty".to_string()));
        }
        if self.require_signatures && self.key.is_none() {
            return Err(TallyError::Config(
                "require_signatures needs a signing key".to_string(),
            ));
        }
        Ok(())
    }

    /// Zero interval means every mutation is persisted before returning
    pub fn is_synchronous(&self) -> bool {
        self.store_interval_secs == 0
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn storage_target(&self) -> StorageTarget {
        match (&self.database_dsn, &self.file_storage_path) {
            (Some(dsn), _) if !dsn.is_empty() => StorageTarget::Database(dsn.clone()),
            (_, Some(path)) if !path.as_os_str().is_empty() => StorageTarget::File(path.clone()),
            _ => StorageTarget::None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file, or use defaults when none is given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit == 0 {
            return Err(TallyError::Config("rate_limit must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 || self.report_interval_secs == 0 {
            return Err(TallyError::Config("intervals must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Base URL of the server, tolerating an address given with a scheme
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.address.trim_end_matches('/'))
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval_secs: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            database_dsn: None,
            restore: true,
            key: None,
            crypto_key: None,
            require_signatures: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            report_interval_secs: default_report_interval(),
            poll_interval_secs: default_poll_interval(),
            key: None,
            crypto_key: None,
            rate_limit: default_rate_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::load_or_default(None).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.store_interval(), Duration::from_secs(300));
        assert!(config.restore);
        assert_eq!(
            config.storage_target(),
            StorageTarget::File(PathBuf::from("/tmp/metrics-db.json"))
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "store_interval_secs = 0\ndatabase_dsn = \"metrics.db\"").unwrap();

        let config = ServerConfig::load_or_default(Some(file.path())).unwrap();
        assert!(config.is_synchronous());
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(
            config.storage_target(),
            StorageTarget::Database("metrics.db".to_string())
        );
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rate_limit = \"many\"").unwrap();

        let err = AgentConfig::load_or_default(Some(file.path())).unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));
    }

    #[test]
    fn test_agent_validation() {
        let config = AgentConfig {
            rate_limit: 0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AgentConfig {
            address: "http://metrics.local:9000/".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(config.base_url(), "http://metrics.local:9000");
    }

    #[test]
    fn test_require_signatures_needs_key() {
        let config = ServerConfig {
            require_signatures: true,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
