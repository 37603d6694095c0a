//! Host configuration for the gateway binary
//!
//! The device configuration (Wi-Fi, cloud identity) lives on the radio
//! filesystem and is handled by [`crate::device::loader`]. This module covers
//! how the host runs the device: where the radio store lives, which identity
//! the host radio reports, timing of the control loop, DPS and reconnect
//! policy.

use crate::cloud::telemetry::{MAX_INTERVAL_MS, MIN_INTERVAL_MS};
use crate::transport::mqtt::{HealthMonitor, ReconnectConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Files searched, in order, when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["gateway.toml", "config/gateway.toml"];

/// Main host configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub radio: RadioSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub provisioning: ProvisioningSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Radio section - identity and timeouts of the host radio
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RadioSection {
    /// Directory that stands in for the radio filesystem
    pub store_dir: PathBuf,
    /// Firmware version the host radio reports
    pub firmware_version: String,
    pub mac_address: String,
    /// Fixed UDID; generated and persisted to `user/udid` when absent
    pub udid: Option<String>,
    pub response_timeout_ms: u64,
    pub poll_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("radio-store"),
            firmware_version: "2.2.0".to_string(),
            mac_address: "00:00:00:00:00:00".to_string(),
            udid: None,
            response_timeout_ms: 5000,
            poll_timeout_ms: 50,
            connect_timeout_ms: 10000,
        }
    }
}

/// Timing section - pacing of the control loop and user feedback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSection {
    /// Pause between two ticks of the control loop
    pub tick_interval_ms: u64,
    /// How long a status message or indicator flash stays up
    pub indication_ms: u64,
    /// Time each instruction page is shown in configuration mode
    pub config_step_ms: u64,
    /// Time the error screen is shown per error tick
    pub error_display_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            indication_ms: 1000,
            config_step_ms: 3000,
            error_display_ms: 5000,
        }
    }
}

impl TimingSection {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn indication(&self) -> Duration {
        Duration::from_millis(self.indication_ms)
    }

    pub fn config_step(&self) -> Duration {
        Duration::from_millis(self.config_step_ms)
    }

    pub fn error_display(&self) -> Duration {
        Duration::from_millis(self.error_display_ms)
    }
}

/// Provisioning section - DPS handshake bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningSection {
    /// Maximum operation status requests before giving up
    pub max_status_polls: u32,
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            max_status_polls: 20,
        }
    }
}

/// Telemetry section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetrySection {
    /// Publish interval used until the cloud sets another one
    pub default_interval_ms: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            default_interval_ms: 30000,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl GatewayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, else the first default path that exists, else defaults
    pub fn discover(path: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|candidate| candidate.exists())
        {
            Some(found) => Self::load_from_file(found),
            None => Ok(Self::default()),
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.radio.firmware_version.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "radio.firmware_version must not be empty".to_string(),
            ));
        }
        if self.radio.response_timeout_ms == 0
            || self.radio.poll_timeout_ms == 0
            || self.radio.connect_timeout_ms == 0
        {
            return Err(SettingsError::Invalid(
                "radio timeouts must be greater than 0".to_string(),
            ));
        }
        if self.timing.tick_interval_ms == 0 {
            return Err(SettingsError::Invalid(
                "timing.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.provisioning.max_status_polls == 0 {
            return Err(SettingsError::Invalid(
                "provisioning.max_status_polls must be greater than 0".to_string(),
            ));
        }

        let interval = self.telemetry.default_interval_ms;
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval) {
            return Err(SettingsError::Invalid(format!(
                "telemetry.default_interval_ms {interval} outside [{MIN_INTERVAL_MS}, {MAX_INTERVAL_MS}]"
            )));
        }

        HealthMonitor::validate_reconnect_config(&self.reconnect).map_err(SettingsError::Invalid)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[radio]
store_dir = "test-store"
firmware_version = "2.2.1"
mac_address = "00:11:22:33:44:55"
udid = "udid-test"
response_timeout_ms = 100

[timing]
tick_interval_ms = 10
indication_ms = 10
config_step_ms = 10
error_display_ms = 10

[reconnect]
max_attempts = 2
backoff_pattern = [10, 20]
sustained_delay = 50
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
