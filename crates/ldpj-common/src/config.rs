//! Configuration structures for the leak-detection backend.
//!
//! Supports TOML deserialization with sensible defaults for every field, so
//! a missing or partially-specified document still yields a runnable
//! configuration rather than a hard failure.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration document assembled from one or more TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdpjConfig {
    /// PLC polling cadence and ring buffer sizing.
    pub polling: PollingConfig,
    /// PLC link parameters.
    pub connection: ConnectionConfig,
    /// Cabin frame layout within the PLC data block.
    pub cabin_array: CabinArrayConfig,
    /// Result write-back address.
    pub write_back: WriteBackConfig,
    /// Fault-code write-back address.
    pub fault_write: FaultWriteConfig,
    /// Per-cabin cycle detection thresholds.
    pub cycle_detection: CycleDetectionConfig,
    /// Processing loop and inference runtime parameters.
    pub runtime: RuntimeConfig,
    /// Health checker probe configuration.
    pub health: HealthConfig,
    /// Inter-process/external integration configuration.
    pub ipc: IpcConfig,
    /// Structured logging configuration.
    pub logging: LoggingConfig,
    /// Inference model artifact locations.
    pub model: ModelConfig,
}

impl Default for LdpjConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            connection: ConnectionConfig::default(),
            cabin_array: CabinArrayConfig::default(),
            write_back: WriteBackConfig::default(),
            fault_write: FaultWriteConfig::default(),
            cycle_detection: CycleDetectionConfig::default(),
            runtime: RuntimeConfig::default(),
            health: HealthConfig::default(),
            ipc: IpcConfig::default(),
            logging: LoggingConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

/// Inference model artifact locations, resolved relative to the working
/// directory the daemon is started from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the classifier weights/bias artifact.
    pub classifier_path: PathBuf,
    /// Path to the feature scaler artifact.
    pub scaler_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classifier_path: PathBuf::from("models/artifacts/current/classifier.json"),
            scaler_path: PathBuf::from("models/artifacts/current/scaler.json"),
        }
    }
}

/// Structured logging configuration: level, rolling file destination, and
/// retention. Expressed the way `tracing` + `tracing-appender` consume it,
/// not as a `RotatingFileHandler` equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"ldpj_pipeline=debug,warn"`.
    pub level: String,
    /// Directory the rolling file appender writes into.
    pub directory: PathBuf,
    /// Rolling log file base name.
    pub file_name_prefix: String,
    /// Number of rotated files kept before the oldest is deleted.
    pub max_files: usize,
    /// Whether logs are additionally mirrored to stdout.
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            directory: PathBuf::from("logs"),
            file_name_prefix: String::from("ldpj-backend"),
            max_files: 7,
            stdout: true,
        }
    }
}

/// PLC polling cadence and buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Fixed period between poll ticks.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Ring buffer capacity, in poll frames.
    pub buffer_size: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            buffer_size: 10_000,
        }
    }
}

/// PLC link parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// PLC IP address or hostname.
    pub ip: String,
    /// S7 rack number.
    pub rack: u8,
    /// S7 slot number.
    pub slot: u8,
    /// Delay between reconnect attempts.
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ip: String::from("127.0.0.1"),
            rack: 0,
            slot: 1,
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// Layout of the per-cabin frame array within the PLC data block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CabinArrayConfig {
    /// PLC data block number holding the cabin array.
    pub db_number: u16,
    /// Byte offset of the first cabin within the block.
    pub start_offset: u32,
    /// Number of cabins sharing this layout.
    pub cabin_count: usize,
    /// Size in bytes of one cabin's frame.
    pub cabin_size_bytes: usize,
}

impl Default for CabinArrayConfig {
    fn default() -> Self {
        Self {
            db_number: 9,
            start_offset: 0,
            cabin_count: 25,
            cabin_size_bytes: 12,
        }
    }
}

/// Result write-back address and scaling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBackConfig {
    /// PLC data block number for the result word.
    pub db_number: u16,
    /// Byte offset of the result word.
    pub byte_offset: u32,
    /// Probability scaling factor (probability * scale is added to base on a pass).
    pub scale: i16,
    /// Base value written on a leak.
    pub base: i16,
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            db_number: 9,
            byte_offset: 200,
            scale: 10,
            base: 0,
        }
    }
}

/// Fault-code write-back address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultWriteConfig {
    /// PLC data block number for the fault code word.
    pub db_number: u16,
    /// Byte offset of the fault code word.
    pub byte_offset: u32,
}

impl Default for FaultWriteConfig {
    fn default() -> Self {
        Self {
            db_number: 9,
            byte_offset: 202,
        }
    }
}

/// Per-cabin cycle detection thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleDetectionConfig {
    /// Pressure drop (from the last observed sample) that starts a cycle.
    pub start_pressure_drop: f64,
    /// Pressure rise that ends a cycle once `min_collection_points` is met.
    pub end_pressure_rise: f64,
    /// Minimum points collected before an end-by-rise is honored.
    pub min_collection_points: usize,
    /// Hard cap on points collected before force-ending a cycle.
    pub max_collection_points: usize,
    /// Hard cap on wall-clock duration before force-ending a cycle.
    pub max_collection_duration_s: f64,
    /// Wall-clock duration after which a stuck collection faults.
    pub collection_timeout_s: f64,
    /// Reserved: minimum idle pressure. Not consulted by any transition.
    pub idle_pressure_min: f64,
}

impl Default for CycleDetectionConfig {
    fn default() -> Self {
        Self {
            start_pressure_drop: 50.0,
            end_pressure_rise: 50.0,
            min_collection_points: 100,
            max_collection_points: 3000,
            max_collection_duration_s: 45.0,
            collection_timeout_s: 60.0,
            idle_pressure_min: 0.0,
        }
    }
}

/// Processing loop and inference runtime parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Classification threshold on the model's probability output.
    pub threshold: f64,
    /// Feature vector ordering mode.
    pub feature_mode: FeatureMode,
    /// Sleep between processing loop iterations.
    #[serde(with = "humantime_serde")]
    pub loop_interval: Duration,
    /// Record store configuration.
    pub database: DatabaseConfig,
    /// Inference latency histogram configuration.
    pub metrics: MetricsConfig,
    /// How often the main loop logs a combined status snapshot.
    #[serde(with = "humantime_serde")]
    pub status_log_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            feature_mode: FeatureMode::SevenDim,
            loop_interval: Duration::from_millis(50),
            database: DatabaseConfig::default(),
            metrics: MetricsConfig::default(),
            status_log_interval: Duration::from_secs(60),
        }
    }
}

/// Inference latency histogram sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of samples retained in the latency ring buffer.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 1000,
        }
    }
}

/// Feature vector ordering mode; see the feature extractor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeatureMode {
    /// Includes cavity_id as the 7th component.
    #[default]
    #[serde(rename = "7d")]
    SevenDim,
    /// Omits cavity_id.
    #[serde(rename = "6d")]
    SixDim,
}

/// Record store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ldpj_data.db"),
        }
    }
}

/// Health checker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Master enable for the health checker worker.
    pub enabled: bool,
    /// Interval between probe sweeps.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Per-probe configuration.
    pub checks: HealthChecksConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(60),
            checks: HealthChecksConfig::default(),
        }
    }
}

/// Individual probe enablement and thresholds used by the health checker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthChecksConfig {
    /// Whether the PLC link probe (F001) runs.
    pub plc_connection_enabled: bool,
    /// Whether the model-loaded probe (F002) runs.
    pub model_loaded_enabled: bool,
    /// Whether the disk-space probe (F005) runs.
    pub disk_space_enabled: bool,
    /// Whether the inference-latency probe (F004) runs.
    pub inference_latency_enabled: bool,
    /// Whether the polling-thread probe (F008) runs.
    pub polling_thread_enabled: bool,
    /// Whether the FSM-stuck probe (F009) runs.
    pub fsm_stuck_enabled: bool,
    /// Whether the database-size probe (F007) runs.
    pub database_enabled: bool,
    /// Minimum free disk space, in megabytes, before F005 fires.
    pub min_free_disk_mb: f64,
    /// Maximum acceptable inference latency, in milliseconds, before F004 fires.
    pub max_inference_latency_ms: f64,
    /// Maximum time a cabin may remain COLLECTING before F009 fires.
    pub max_stuck_duration_s: f64,
}

impl Default for HealthChecksConfig {
    fn default() -> Self {
        Self {
            plc_connection_enabled: true,
            model_loaded_enabled: true,
            disk_space_enabled: true,
            inference_latency_enabled: true,
            polling_thread_enabled: true,
            fsm_stuck_enabled: true,
            database_enabled: true,
            min_free_disk_mb: 500.0,
            max_inference_latency_ms: 200.0,
            max_stuck_duration_s: 120.0,
        }
    }
}

/// External integration configuration (alarm push, read API key material).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Read-only HTTP API parameters; carried for configuration completeness
    /// only, the server is an external collaborator not built by this crate.
    pub api_server: ApiServerConfig,
    /// Outbound alarm push configuration.
    pub alarm_pusher: AlarmPusherConfig,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            api_server: ApiServerConfig::default(),
            alarm_pusher: AlarmPusherConfig::default(),
        }
    }
}

/// Read-only HTTP API parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    /// Whether the external reader is expected to be running.
    pub enabled: bool,
    /// Bind host, documented for the external reader.
    pub host: String,
    /// Bind port, documented for the external reader.
    pub port: u16,
    /// Shared API key the external reader must present.
    pub api_key: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::from("0.0.0.0"),
            port: 8080,
            api_key: String::new(),
        }
    }
}

/// Outbound alarm push configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmPusherConfig {
    /// Master enable.
    pub enabled: bool,
    /// Push targets.
    pub targets: Vec<AlarmTarget>,
    /// Whether a detected leak triggers a dedicated push.
    pub push_on_leak: bool,
    /// Minimum fault severity that triggers a push.
    pub min_fault_level_to_push: FaultLevel,
}

impl Default for AlarmPusherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            targets: Vec::new(),
            push_on_leak: true,
            min_fault_level_to_push: FaultLevel::Error,
        }
    }
}

/// One outbound alarm push destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmTarget {
    /// Destination URL.
    pub url: String,
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry attempts before giving up on a single push.
    pub retries: u32,
}

/// Fault severity levels, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FaultLevel {
    /// Informational; no operator action implied.
    Info,
    /// Degraded but non-blocking.
    Warning,
    /// Requires operator attention.
    Error,
    /// Immediate operator attention; affects `has_critical`.
    Critical,
}

impl std::fmt::Display for FaultLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl LdpjConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Load configuration from a file, falling back to defaults on any error.
    ///
    /// Mirrors the "a missing or malformed document never blocks startup"
    /// behavior documented for this system's configuration loading.
    #[must_use]
    pub fn from_file_or_default(path: &std::path::Path) -> Self {
        Self::from_file(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, path = %path.display(), "using default configuration");
            Self::default()
        })
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
