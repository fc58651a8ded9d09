//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the http server listens.
//!     - DeviceConfig: identity an enviro post must carry to be accepted.
//!     - StoreConfig: which backend holds the tables, and where.
//!     - ChartConfig: axis framing and manual timestamp offset.
//!     - LoggingConfig: log level and per-reading echo.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub nickname: String,
    /// when set, posts must also carry this uid
    pub uid: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { nickname: "embsgarden".to_string(), uid: None }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Gist,
    #[default]
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub api_url: String,
    /// name of the environment variable holding the api token
    pub token_env: String,
    pub manual: BlobConfig,
    pub automated: BlobConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            api_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            manual: BlobConfig {
                gist_id: String::new(),
                file_name: "manual_readings.csv".to_string(),
            },
            automated: BlobConfig {
                gist_id: String::new(),
                file_name: "enviro_readings.csv".to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BlobConfig {
    pub gist_id: String,
    pub file_name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChartConfig {
    pub padding_days: i64,
    pub default_ceiling: f64,
    /// offset of the wall clock manual readings were typed in
    pub manual_utc_offset_minutes: i32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            padding_days: 1,
            default_ceiling: 10.0,
            manual_utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_readings: false }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("host.toml"),
            std::path::PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("No config file found - using defaults");
        Self::default()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            bind_addr = %self.server.bind_addr,
            device = %self.device.nickname,
            backend = ?self.store.backend,
            padding_days = self.chart.padding_days,
            log_level = %self.logging.level,
            "host configuration"
        );
    }
}
