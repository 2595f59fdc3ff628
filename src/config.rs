//! WolfBlock Configuration
//!
//! This module provides configuration structures for the WolfBlock
//! volume controller.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfBlock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfBlockConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Volume served by this controller
    pub volume: VolumeConfig,

    /// Rebuild handshake configuration
    #[serde(default)]
    pub rebuild: RebuildConfig,

    /// Volume catalog configuration
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Operation journal configuration
    #[serde(default)]
    pub journal: JournalConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique controller identifier
    pub id: String,

    /// Data directory for the catalog
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Volume configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Volume name
    pub name: String,

    /// Volume size in bytes (informational)
    #[serde(default)]
    pub size_bytes: u64,

    /// Replicas to start the volume with once all of them have registered
    #[serde(default)]
    pub replicas: Vec<String>,
}

/// Rebuild handshake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// How long a rebuild ticket stays valid without a verify
    #[serde(default = "default_ticket_ttl_secs")]
    pub ticket_ttl_secs: u64,

    /// How often expired tickets are swept
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,
}

/// Volume catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Backend: "memory" or "sqlite"
    #[serde(default = "default_catalog_backend")]
    pub backend: String,

    /// Database path (defaults to <data_dir>/catalog.db)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Operation journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Number of operations kept in memory
    #[serde(default = "default_journal_capacity")]
    pub capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Longest rebuild ticket lifetime accepted (one week)
pub const MAX_TICKET_TTL_SECS: u64 = 7 * 24 * 60 * 60;

// Default value functions
fn default_ticket_ttl_secs() -> u64 {
    300
}

fn default_reaper_interval_ms() -> u64 {
    1000
}

fn default_catalog_backend() -> String {
    "sqlite".to_string()
}

fn default_journal_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:9501".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfblock")
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            ticket_ttl_secs: default_ticket_ttl_secs(),
            reaper_interval_ms: default_reaper_interval_ms(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: default_catalog_backend(),
            path: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            capacity: default_journal_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfBlockConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string
    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: WolfBlockConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.volume.name.is_empty() {
            return Err(crate::Error::Config("volume.name cannot be empty".into()));
        }

        if self.rebuild.ticket_ttl_secs == 0 {
            return Err(crate::Error::Config("rebuild.ticket_ttl_secs must be positive".into()));
        }

        if self.rebuild.ticket_ttl_secs > MAX_TICKET_TTL_SECS {
            return Err(crate::Error::Config(format!(
                "rebuild.ticket_ttl_secs must be at most {}",
                MAX_TICKET_TTL_SECS
            )));
        }

        if self.rebuild.reaper_interval_ms == 0 {
            return Err(crate::Error::Config("rebuild.reaper_interval_ms must be positive".into()));
        }

        if self.journal.capacity == 0 {
            return Err(crate::Error::Config("journal.capacity must be positive".into()));
        }

        if !matches!(self.catalog.backend.as_str(), "memory" | "sqlite") {
            return Err(crate::Error::Config(format!(
                "catalog.backend must be \"memory\" or \"sqlite\", got \"{}\"",
                self.catalog.backend
            )));
        }

        if self.api.bind_address.parse::<SocketAddr>().is_err() {
            return Err(crate::Error::Config(format!(
                "api.bind_address is not a socket address: {}",
                self.api.bind_address
            )));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get the catalog database path
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("catalog.db"))
    }

    /// Get rebuild ticket lifetime as Duration
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.rebuild.ticket_ttl_secs)
    }

    /// Get reaper sweep interval as Duration
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.rebuild.reaper_interval_ms)
    }
}
