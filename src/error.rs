//! Error taxonomy for the gateway core
//!
//! Each layer owns a focused `thiserror` enum (`TransportError`, `ConfigError`,
//! `SettingsError`). `GatewayError` is the taxonomy the device state machine
//! reasons about when it picks between retry, `WaitingForConfig` and
//! `ErrorState`.

use crate::config::SettingsError;
use crate::device::loader::ConfigError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Longest message rendered on the display sink
const DISPLAY_MESSAGE_LIMIT: usize = 96;

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Radio did not answer in time: {message}")]
    TransportTimeout { message: String },

    #[error("Device not configured")]
    ConfigMissing,

    #[error("Invalid device configuration: {message}")]
    ConfigParseError { message: String },

    #[error("Unsupported configuration version: {version}")]
    UnsupportedConfigVersion { version: i64 },

    #[error("Certificate file missing: {path}")]
    CertificateMissing { path: String },

    #[error("MQTT authentication failed: {message}")]
    MqttAuthFailure { message: String },

    #[error("Publish to {topic} failed")]
    PublishFailure { topic: String },

    #[error("Provisioning failed: {message}")]
    ProvisioningFailure { message: String },

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl GatewayError {
    /// Create transport timeout error
    pub fn transport_timeout<S: Into<String>>(message: S) -> Self {
        Self::TransportTimeout {
            message: message.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse<S: Into<String>>(message: S) -> Self {
        Self::ConfigParseError {
            message: message.into(),
        }
    }

    /// Create missing certificate error
    pub fn certificate_missing<S: Into<String>>(path: S) -> Self {
        Self::CertificateMissing { path: path.into() }
    }

    /// Create MQTT authentication error
    pub fn mqtt_auth_failure<S: Into<String>>(message: S) -> Self {
        Self::MqttAuthFailure {
            message: message.into(),
        }
    }

    /// Create publish failure error
    pub fn publish_failure<S: Into<String>>(topic: S) -> Self {
        Self::PublishFailure {
            topic: topic.into(),
        }
    }

    /// Create provisioning failure error
    pub fn provisioning_failure<S: Into<String>>(message: S) -> Self {
        Self::ProvisioningFailure {
            message: message.into(),
        }
    }

    /// True for errors that park the device in `WaitingForConfig` rather than `ErrorState`
    pub fn needs_configuration(&self) -> bool {
        matches!(
            self,
            GatewayError::ConfigMissing
                | GatewayError::ConfigParseError { .. }
                | GatewayError::UnsupportedConfigVersion { .. }
        )
    }

    /// Message suitable for the display sink: secrets redacted, length bounded
    pub fn display_message(&self) -> String {
        sanitize_for_display(&self.to_string())
    }
}

impl From<TransportError> for GatewayError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout(operation) => GatewayError::TransportTimeout {
                message: operation,
            },
            TransportError::WrongRootCa => {
                GatewayError::mqtt_auth_failure("server certificate rejected by root CA")
            }
            other => GatewayError::Transport(other),
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::NotFound => GatewayError::ConfigMissing,
            ConfigError::UnsupportedVersion(version) => {
                GatewayError::UnsupportedConfigVersion { version }
            }
            other => GatewayError::config_parse(other.to_string()),
        }
    }
}

/// Redact credentials and bound the length of a user-visible message
pub fn sanitize_for_display(message: &str) -> String {
    let mut sanitized = match SECRET_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(message, "${1}=***").to_string(),
        None => message.to_string(),
    };

    if sanitized.chars().count() > DISPLAY_MESSAGE_LIMIT {
        let suffix = "...";
        let keep = DISPLAY_MESSAGE_LIMIT - suffix.len();
        sanitized = format!("{}{}", sanitized.chars().take(keep).collect::<String>(), suffix);
    }

    sanitized
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
