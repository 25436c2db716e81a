//! Configuration types for mmhost

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HostError, HostResult};

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Model cache configuration
    pub cache: CacheConfig,
    /// Artifact store configuration
    pub store: StoreConfig,
    /// Dispatcher configuration
    pub dispatch: DispatchConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> HostResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("Failed to read config file: {}", e)))?;
        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| HostError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache cannot operate with
    pub fn validate(&self) -> HostResult<()> {
        if self.cache.capacity == 0 {
            return Err(HostError::Config("cache.capacity must be at least 1".to_string()));
        }
        if self.cache.memory_budget_bytes == Some(0) {
            return Err(HostError::Config(
                "cache.memory_budget_bytes must be positive when set".to_string(),
            ));
        }
        if self.store.store_fetch_timeout_ms == 0 {
            return Err(HostError::Config(
                "store.store_fetch_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub rest_address: String,
    /// Port for the REST API server
    pub rest_port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_address: "0.0.0.0".to_string(),
            rest_port: 8080,
            cors_enabled: false,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Model cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident models
    pub capacity: usize,
    /// Optional cap on the aggregate footprint of resident models
    pub memory_budget_bytes: Option<u64>,
    /// How long an insertion waits for a pinned entry to free up
    pub eviction_wait_timeout_ms: u64,
    /// Evict-and-retry cycles allowed when the loader reports ResourceExhausted
    pub load_retry_count: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            memory_budget_bytes: None,
            eviction_wait_timeout_ms: 5_000,
            load_retry_count: 1,
        }
    }
}

impl CacheConfig {
    pub fn eviction_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.eviction_wait_timeout_ms)
    }
}

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for transient staging of fetched artifacts
    pub staging_path: PathBuf,
    /// Per-attempt fetch timeout
    pub store_fetch_timeout_ms: u64,
    /// Extra attempts after a transient store failure
    pub fetch_retry_count: u32,
    /// Initial backoff between fetch attempts, doubled each retry
    pub fetch_backoff_ms: u64,
    /// File the inventory is persisted to (in-memory only when unset)
    pub inventory_path: Option<PathBuf>,
    /// Directory scanned at startup to register artifacts in bulk
    pub scan_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            staging_path: std::env::temp_dir().join("mmhost-staging"),
            store_fetch_timeout_ms: 30_000,
            fetch_retry_count: 2,
            fetch_backoff_ms: 100,
            inventory_path: None,
            scan_path: None,
        }
    }
}

impl StoreConfig {
    pub fn store_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.store_fetch_timeout_ms)
    }

    pub fn fetch_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_backoff_ms)
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on one caller's wait for a model (unbounded when unset)
    pub request_timeout_ms: Option<u64>,
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}
