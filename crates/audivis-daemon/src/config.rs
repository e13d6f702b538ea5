//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use audivis_core::endpoint::{validate_endpoint_types, validate_endpoints};
use audivis_core::{DeviceId, EndpointAddress, EndpointType};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "AUDIVIS_CONFIG";

/// Source value that selects standard input.
pub const STDIN_SOURCE: &str = "-";

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Virtual device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// PCM source settings
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), log_json: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Virtual device settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Device to attach to when it already exists
    #[serde(default = "default_device_id")]
    pub device_id: DeviceId,
    /// Endpoint addresses to configure
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointAddress>,
    /// Endpoint types, one per endpoint
    #[serde(default = "default_endpoint_types")]
    pub endpoint_types: Vec<EndpointType>,
    /// Raw create request to use instead of the built-in microphone
    #[serde(default)]
    pub descriptor_path: Option<PathBuf>,
    /// Unplug the device on shutdown
    #[serde(default = "default_true")]
    pub unplug_on_exit: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            endpoints: default_endpoints(),
            endpoint_types: default_endpoint_types(),
            descriptor_path: None,
            unplug_on_exit: true,
        }
    }
}

fn default_device_id() -> DeviceId {
    DeviceId(1)
}

fn default_endpoints() -> Vec<EndpointAddress> {
    vec![EndpointAddress::AUDIO_IN]
}

fn default_endpoint_types() -> Vec<EndpointType> {
    vec![EndpointType::AUDIO_STREAM]
}

fn default_true() -> bool {
    true
}

/// PCM source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// `-` for stdin, otherwise a raw s16le 48 kHz mono file
    #[serde(default = "default_source")]
    pub source: String,
    /// Rewind a file source when it ends
    #[serde(default)]
    pub loop_source: bool,
    /// Pause after plug-in before the first submission
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Pause after a backpressure result
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Bytes read from the source per iteration
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            loop_source: false,
            startup_delay_ms: default_startup_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            read_chunk: default_read_chunk(),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Whether the source is standard input.
    #[must_use]
    pub fn is_stdin(&self) -> bool {
        self.source == STDIN_SOURCE
    }
}

fn default_source() -> String {
    STDIN_SOURCE.to_string()
}

fn default_startup_delay_ms() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    5
}

fn default_read_chunk() -> usize {
    // Four frames
    3840
}

impl Config {
    /// Reject settings the device would refuse anyway.
    ///
    /// # Errors
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let device = &self.device;
        validate_endpoints(&device.endpoints).context("Invalid [device] endpoints")?;
        validate_endpoint_types(&device.endpoint_types).context("Invalid [device] endpoint_types")?;
        if device.endpoints.len() != device.endpoint_types.len() {
            bail!(
                "[device] has {} endpoints but {} endpoint types",
                device.endpoints.len(),
                device.endpoint_types.len()
            );
        }

        if self.stream.read_chunk == 0 {
            bail!("[stream] read_chunk must be greater than zero");
        }
        if self.stream.loop_source && self.stream.is_stdin() {
            bail!("[stream] loop_source requires a file source");
        }
        Ok(())
    }
}

/// Load configuration from `AUDIVIS_CONFIG`, the user config file, or defaults.
///
/// # Errors
/// Fails when the file exists but cannot be read, parsed or validated.
pub fn load_config() -> Result<Config> {
    let config_path = match std::env::var_os(CONFIG_ENV) {
        Some(path) => PathBuf::from(path),
        None => config_path()?,
    };
    load_config_from(&config_path)
}

/// Load configuration from `path`, falling back to defaults when it does not exist.
///
/// # Errors
/// Fails when the file exists but cannot be read, parsed or validated.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {path:?}"))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {path:?}"))?
    } else {
        info!(config_path = ?path, "Config file not found, using defaults");
        Config::default()
    };

    config.validate().with_context(|| format!("Invalid configuration in {path:?}"))?;
    Ok(config)
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("cc", "audivis", "Audivis").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
