//! Pure connection configuration for the host MQTT session
//!
//! This module contains pure functions that turn radio [`MqttSettings`] into
//! rumqttc options and classify rumqttc connection failures into
//! [`TransportError`] values the device understands.

use crate::transport::{MqttSettings, TransportError};
use rumqttc::Transport as RumqttcTransport;
use rumqttc::{ConnectReturnCode, ConnectionError, MqttOptions, TlsConfiguration};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest MQTT packet accepted or produced by the host radio
pub const MAX_PACKET_SIZE: usize = 16 * 1024;

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of connection attempts (None = unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
    /// Custom backoff pattern in milliseconds (if empty, uses the sustained delay)
    #[serde(default = "default_backoff_pattern")]
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay: u64,
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}

fn default_backoff_pattern() -> Vec<u64> {
    vec![1000, 2000, 5000, 10000]
}

fn default_sustained_delay() -> u64 {
    10000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_pattern: default_backoff_pattern(),
            sustained_delay: default_sustained_delay(),
        }
    }
}

impl ReconnectConfig {
    /// Calculate the maximum total time for all reconnection attempts
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Calculate backoff delay for given attempt using the custom pattern
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Certificate material read from the radio filesystem
#[derive(Debug, Clone, PartialEq)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

/// Pure function to build rumqttc options from radio settings
pub fn configure_mqtt_options(
    settings: &MqttSettings,
    tls: Option<TlsMaterial>,
) -> Result<MqttOptions, TransportError> {
    if settings.address.is_empty() {
        return Err(TransportError::ConnectionRefused(
            "no server address configured".to_string(),
        ));
    }
    if settings.client_id.is_empty() {
        return Err(TransportError::ConnectionRefused(
            "no client id configured".to_string(),
        ));
    }

    let mut mqtt_options =
        MqttOptions::new(&settings.client_id, &settings.address, settings.port);

    // rumqttc rejects keep alive intervals under one second
    let keep_alive = u64::from(settings.keep_alive_secs.max(5));
    mqtt_options.set_keep_alive(Duration::from_secs(keep_alive));
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(username) = &settings.username {
        let password = settings.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    match (&settings.tls, tls) {
        (Some(_), Some(material)) => {
            mqtt_options.set_transport(RumqttcTransport::Tls(TlsConfiguration::Simple {
                ca: material.ca,
                alpn: None,
                client_auth: material.client_auth,
            }));
        }
        (Some(_), None) => {
            return Err(TransportError::Io(
                "TLS requested without certificate material".to_string(),
            ));
        }
        (None, _) => {}
    }

    Ok(mqtt_options)
}

/// Whether a TLS failure text means the server chain was not trusted
pub fn is_certificate_rejection(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    [
        "unknownissuer",
        "unknown issuer",
        "invalid peer certificate",
        "badcertificate",
        "certificate verify failed",
    ]
    .iter()
    .any(|marker| lower.contains(marker))
}

/// Classify a rumqttc connection failure (pure function)
pub fn classify_connection_error(error: &ConnectionError) -> TransportError {
    if let ConnectionError::ConnectionRefused(code) = error {
        return classify_return_code(*code);
    }

    let text = error.to_string();
    if is_certificate_rejection(&text) {
        return TransportError::WrongRootCa;
    }
    let lower = text.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        return TransportError::Timeout("mqtt connect".to_string());
    }
    TransportError::ConnectionRefused(text)
}

/// Classify a refused ConnAck return code (pure function)
pub fn classify_return_code(code: ConnectReturnCode) -> TransportError {
    TransportError::ConnectionRefused(format!("{code:?}"))
}
