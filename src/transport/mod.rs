//! Transport layer for the radio module
//!
//! The radio module owns Wi-Fi, the MQTT session and a small filesystem. This
//! module provides the [`Transport`] abstraction over it, the [`RadioStatus`]
//! it reports, and the caller-driven dual root CA retry used by every TLS
//! platform.
//!
//! # Architecture
//!
//! - [`settings`] - Wi-Fi, SNTP, MQTT and TLS parameters primed by cloud adapters
//! - [`store`] - well-known file paths and the host file store
//! - [`mqtt`] - rumqttc-backed host implementation of the radio

pub mod mqtt;
pub mod settings;
pub mod store;

pub use settings::{
    CipherSuite, MqttSettings, ProtocolVersion, SecurityMethod, SntpSettings, TlsSettings,
    WifiSecurity, WifiSettings,
};

pub use rumqttc::QoS;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Connection status reported by the radio module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioStatus {
    #[default]
    Disconnected,
    WlanConnected,
    MqttConnecting,
    MqttConnected,
    MqttWrongRootCa,
    Provisioning,
    Error,
}

impl RadioStatus {
    /// Whether the device can keep running its Idle loop on this status
    pub fn is_ok(&self) -> bool {
        !matches!(self, RadioStatus::Disconnected | RadioStatus::Error)
    }

    /// Whether an MQTT session is established
    pub fn is_mqtt_connected(&self) -> bool {
        matches!(self, RadioStatus::MqttConnected)
    }
}

/// Transport errors surfaced by radio operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Radio timed out during {0}")]
    Timeout(String),
    #[error("Server certificate not trusted by the configured root CA")]
    WrongRootCa,
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Not connected")]
    NotConnected,
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("I/O error: {0}")]
    Io(String),
}

/// A topic filter with its subscription QoS
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new<S: Into<String>>(topic: S, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// A message received from the cloud
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new<T: Into<String>, P: Into<Vec<u8>>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Transport trait for the radio module
///
/// Every operation is bounded by the radio's own timeout. Failures come back
/// as `bool`/`Result`/`Option` values and callers check every one of them.
/// The trait is object safe so cloud adapters can work on `&mut dyn Transport`.
///
/// ```rust
/// use sensor_gateway::testing::MockRadio;
/// use sensor_gateway::transport::{RadioStatus, Transport, WifiSettings};
///
/// # tokio_test::block_on(async {
/// let mut radio = MockRadio::new();
/// radio.connect_wifi(&WifiSettings::default()).await.unwrap();
/// assert_eq!(radio.status().await, RadioStatus::WlanConnected);
/// # });
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current radio status
    async fn status(&self) -> RadioStatus;

    /// Force the status to `Error` (used by the packet loss policy)
    async fn mark_error(&mut self);

    /// Radio firmware version as `major.minor.patch`
    async fn firmware_version(&self) -> String;

    /// Radio MAC address
    async fn mac_address(&self) -> String;

    /// Radio unique device identifier
    async fn udid(&self) -> String;

    /// Join the configured Wi-Fi network
    async fn connect_wifi(&mut self, wifi: &WifiSettings) -> Result<(), TransportError>;

    /// Leave the Wi-Fi network
    async fn disconnect_wifi(&mut self);

    /// Configure time synchronisation
    async fn configure_sntp(&mut self, sntp: &SntpSettings) -> bool;

    /// Start the local provisioning access point
    async fn start_provisioning_ap(&mut self) -> bool;

    /// Open an MQTT session with the given settings
    async fn connect_mqtt(&mut self, settings: &MqttSettings) -> Result<(), TransportError>;

    /// Close the MQTT session
    async fn disconnect_mqtt(&mut self);

    /// Subscribe to the given topic filters
    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> bool;

    /// Publish a payload
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool;

    /// Fetch one received message, waiting up to the response timeout when `blocking`
    async fn get_message(&mut self, blocking: bool) -> Option<InboundMessage>;

    /// Check whether a file exists on the radio filesystem
    async fn file_exists(&mut self, path: &str) -> bool;

    /// Read a file from the radio filesystem
    async fn read_file(&mut self, path: &str) -> Result<String, TransportError>;

    /// Write (create or replace) a file on the radio filesystem
    async fn write_file(&mut self, path: &str, contents: &str) -> bool;

    /// Delete a file from the radio filesystem
    async fn delete_file(&mut self, path: &str) -> bool;
}

/// Connect with the active root CA, retrying exactly once with the alternate CA
///
/// The retry only happens when the first attempt leaves the radio in
/// `MqttWrongRootCa` and the settings name a second CA file. On success the
/// two CA paths stay swapped, so the CA that worked is tried first next time
/// and the other one remains available as the alternate.
pub async fn connect_with_ca_fallback(
    transport: &mut dyn Transport,
    settings: &mut MqttSettings,
) -> Result<(), TransportError> {
    let first = transport.connect_mqtt(settings).await;
    if first.is_ok() {
        return first;
    }

    if transport.status().await != RadioStatus::MqttWrongRootCa {
        return first;
    }

    let Some(tls) = settings.tls.as_mut() else {
        return first;
    };
    if !tls.swap_ca_files() {
        return first;
    }

    warn!(
        rejected = tls.fallback_ca_file.as_deref().unwrap_or_default(),
        fallback = %tls.ca_file,
        "Root CA rejected, retrying with fallback CA"
    );
    transport.disconnect_mqtt().await;

    let retry = transport.connect_mqtt(settings).await;
    match &retry {
        Ok(()) => info!("Connected with fallback root CA"),
        Err(_) => {
            // Start from the original order on the next attempt
            if let Some(tls) = settings.tls.as_mut() {
                tls.swap_ca_files();
            }
        }
    }
    retry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ConnectOutcome, MockRadio};

    fn tls_settings() -> MqttSettings {
        let mut settings = MqttSettings::new("device-1", "hub.example.net", 8883);
        settings.tls = Some(TlsSettings::mutual_tls());
        settings
    }

    #[test]
    fn test_status_is_ok() {
        assert!(!RadioStatus::Disconnected.is_ok());
        assert!(!RadioStatus::Error.is_ok());
        assert!(RadioStatus::WlanConnected.is_ok());
        assert!(RadioStatus::MqttConnected.is_ok());
        assert!(RadioStatus::Provisioning.is_ok());
    }

    #[tokio::test]
    async fn test_fallback_not_used_on_success() {
        let mut radio = MockRadio::new().with_wifi_connected();
        let mut settings = tls_settings();

        connect_with_ca_fallback(&mut radio, &mut settings)
            .await
            .unwrap();

        let attempts = radio.get_connect_attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].tls.as_ref().unwrap().ca_file, "user/rootca1");
    }

    #[tokio::test]
    async fn test_fallback_retries_exactly_once() {
        let radio = MockRadio::new().with_wifi_connected();
        radio
            .script_connects(vec![ConnectOutcome::WrongRootCa, ConnectOutcome::WrongRootCa])
            .await;
        let mut radio = radio;
        let mut settings = tls_settings();

        let result = connect_with_ca_fallback(&mut radio, &mut settings).await;
        assert_eq!(result, Err(TransportError::WrongRootCa));

        let attempts = radio.get_connect_attempts().await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].tls.as_ref().unwrap().ca_file, "user/rootca1");
        assert_eq!(attempts[1].tls.as_ref().unwrap().ca_file, "user/rootca");
    }

    #[tokio::test]
    async fn test_fallback_success_keeps_fallback_ca() {
        let radio = MockRadio::new().with_wifi_connected();
        radio.script_connects(vec![ConnectOutcome::WrongRootCa]).await;
        let mut radio = radio;
        let mut settings = tls_settings();

        connect_with_ca_fallback(&mut radio, &mut settings)
            .await
            .unwrap();

        assert_eq!(radio.status().await, RadioStatus::MqttConnected);
        let tls = settings.tls.as_ref().unwrap();
        assert_eq!(tls.ca_file, "user/rootca");
        assert_eq!(tls.fallback_ca_file.as_deref(), Some("user/rootca1"));
    }

    #[tokio::test]
    async fn test_reconnect_can_return_to_primary_ca() {
        let radio = MockRadio::new().with_wifi_connected();
        radio
            .script_connects(vec![ConnectOutcome::WrongRootCa, ConnectOutcome::Accept])
            .await;
        let mut radio = radio;
        let mut settings = tls_settings();
        connect_with_ca_fallback(&mut radio, &mut settings)
            .await
            .unwrap();
        radio.disconnect_mqtt().await;

        // The server rotated back to a certificate signed by the primary CA
        radio.script_connects(vec![ConnectOutcome::WrongRootCa]).await;
        connect_with_ca_fallback(&mut radio, &mut settings)
            .await
            .unwrap();

        let attempts = radio.get_connect_attempts().await;
        let cas: Vec<_> = attempts
            .iter()
            .map(|a| a.tls.as_ref().unwrap().ca_file.clone())
            .collect();
        assert_eq!(cas, ["user/rootca1", "user/rootca", "user/rootca", "user/rootca1"]);
        assert_eq!(settings.tls.as_ref().unwrap().ca_file, "user/rootca1");
    }

    #[tokio::test]
    async fn test_failed_fallback_restores_order() {
        let radio = MockRadio::new().with_wifi_connected();
        radio
            .script_connects(vec![ConnectOutcome::WrongRootCa, ConnectOutcome::WrongRootCa])
            .await;
        let mut radio = radio;
        let mut settings = tls_settings();

        assert!(connect_with_ca_fallback(&mut radio, &mut settings).await.is_err());
        let tls = settings.tls.as_ref().unwrap();
        assert_eq!(tls.ca_file, "user/rootca1");
        assert_eq!(tls.fallback_ca_file.as_deref(), Some("user/rootca"));
    }

    #[tokio::test]
    async fn test_no_fallback_on_other_failures() {
        let radio = MockRadio::new().with_wifi_connected();
        radio.script_connects(vec![ConnectOutcome::Refused]).await;
        let mut radio = radio;
        let mut settings = tls_settings();

        let result = connect_with_ca_fallback(&mut radio, &mut settings).await;
        assert!(matches!(result, Err(TransportError::ConnectionRefused(_))));
        assert_eq!(radio.get_connect_attempts().await.len(), 1);
    }
}
