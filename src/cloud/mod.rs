//! Cloud adapters
//!
//! One adapter per supported platform. All of them implement
//! [`CloudPlatform`]; the device holds the selected one as a [`CloudAdapter`]
//! variant for its whole lifetime.
//!
//! # Architecture
//!
//! - [`broker`] - plain MQTT broker, JSON commands
//! - [`azure`] - Azure IoT Central: twin properties and direct methods
//! - [`dps`] - Azure Device Provisioning Service handshake
//! - [`aws`] - AWS IoT Core
//! - [`kaa`] - KaaIoT command/result exchange
//! - [`topics`] - inbound topic templates
//! - [`telemetry`] - interval bounds and the sensor payload

pub mod aws;
pub mod azure;
pub mod broker;
pub mod dps;
pub mod kaa;
pub mod telemetry;
pub mod topics;

pub use aws::AwsAdapter;
pub use azure::AzureAdapter;
pub use broker::BrokerAdapter;
pub use kaa::KaaAdapter;
pub use telemetry::TelemetryInterval;

use crate::device::loader::DeviceConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::peripherals::{DisplaySink, Indicator, SensorReadings, SensorSource};
use crate::transport::store::paths;
use crate::transport::{InboundMessage, MqttSettings, QoS, Subscription, TlsSettings, Transport};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Supported cloud platforms, numbered as in the configuration `version` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Broker,
    Azure,
    Aws,
    Kaa,
}

impl Platform {
    pub fn from_version(version: i64) -> Option<Self> {
        match version {
            0 => Some(Platform::Broker),
            1 => Some(Platform::Azure),
            2 => Some(Platform::Aws),
            3 => Some(Platform::Kaa),
            _ => None,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            Platform::Broker => 0,
            Platform::Azure => 1,
            Platform::Aws => 2,
            Platform::Kaa => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Broker => "MQTT broker",
            Platform::Azure => "Azure IoT Central",
            Platform::Aws => "AWS IoT Core",
            Platform::Kaa => "KaaIoT",
        }
    }
}

/// Everything a message handler may touch while processing one message
pub struct DispatchContext<'a> {
    pub transport: &'a mut dyn Transport,
    pub interval: &'a mut TelemetryInterval,
    pub display: &'a mut dyn DisplaySink,
    pub indicator: &'a mut dyn Indicator,
    pub sensors: &'a mut dyn SensorSource,
}

impl DispatchContext<'_> {
    /// Serialize and publish a JSON document
    pub async fn publish_json(&mut self, topic: &str, body: &Value, qos: QoS) -> bool {
        let payload = body.to_string();
        let published = self
            .transport
            .publish(topic, payload.as_bytes(), qos, false)
            .await;
        if !published {
            warn!(topic = %topic, "Response publish failed");
        }
        published
    }

    /// Show a one-line status message
    pub fn notify(&mut self, text: &str) {
        self.display.clear();
        self.display.show(1, 0, 0, text);
    }
}

/// Capability set shared by every cloud adapter
#[async_trait]
pub trait CloudPlatform: Send + Sync {
    /// Build the adapter and prime the MQTT settings for this platform
    fn load(config: &DeviceConfig, settings: &mut MqttSettings) -> GatewayResult<Self>
    where
        Self: Sized;

    fn platform(&self) -> Platform;

    /// Topic filters this platform needs
    fn subscriptions(&self) -> Vec<Subscription>;

    fn telemetry_topic(&self) -> String;

    fn serialize_telemetry(&self, readings: &SensorReadings) -> Value {
        telemetry::readings_to_json(readings)
    }

    /// Subscribe to every topic; false unless the MQTT session is up
    async fn subscribe(&self, transport: &mut dyn Transport) -> bool {
        if !transport.status().await.is_mqtt_connected() {
            return false;
        }
        transport.subscribe(&self.subscriptions()).await
    }

    /// Handle one inbound message whose payload parsed as JSON
    async fn process_message(
        &mut self,
        message: &InboundMessage,
        body: &Value,
        ctx: &mut DispatchContext<'_>,
    );

    /// Point the settings at a resolved endpoint
    fn apply_endpoint(&self, settings: &mut MqttSettings, endpoint: &str) {
        settings.address = endpoint.to_string();
    }

    /// Work done once after each successful connect and subscribe
    async fn on_connected(&mut self, _ctx: &mut DispatchContext<'_>) -> GatewayResult<()> {
        Ok(())
    }
}

/// The adapter selected by the configuration version
#[derive(Debug)]
pub enum CloudAdapter {
    Broker(BrokerAdapter),
    Azure(AzureAdapter),
    Aws(AwsAdapter),
    Kaa(KaaAdapter),
}

impl CloudAdapter {
    /// Select and load the adapter for the configured platform
    pub fn from_config(config: &DeviceConfig, settings: &mut MqttSettings) -> GatewayResult<Self> {
        let adapter = match config.platform {
            Platform::Broker => CloudAdapter::Broker(BrokerAdapter::load(config, settings)?),
            Platform::Azure => CloudAdapter::Azure(AzureAdapter::load(config, settings)?),
            Platform::Aws => CloudAdapter::Aws(AwsAdapter::load(config, settings)?),
            Platform::Kaa => CloudAdapter::Kaa(KaaAdapter::load(config, settings)?),
        };
        info!(platform = adapter.platform().name(), "Cloud adapter selected");
        Ok(adapter)
    }

    fn inner(&self) -> &dyn CloudPlatform {
        match self {
            CloudAdapter::Broker(adapter) => adapter,
            CloudAdapter::Azure(adapter) => adapter,
            CloudAdapter::Aws(adapter) => adapter,
            CloudAdapter::Kaa(adapter) => adapter,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn CloudPlatform {
        match self {
            CloudAdapter::Broker(adapter) => adapter,
            CloudAdapter::Azure(adapter) => adapter,
            CloudAdapter::Aws(adapter) => adapter,
            CloudAdapter::Kaa(adapter) => adapter,
        }
    }

    pub fn platform(&self) -> Platform {
        self.inner().platform()
    }

    pub fn as_azure_mut(&mut self) -> Option<&mut AzureAdapter> {
        match self {
            CloudAdapter::Azure(adapter) => Some(adapter),
            _ => None,
        }
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner().subscriptions()
    }

    pub fn telemetry_topic(&self) -> String {
        self.inner().telemetry_topic()
    }

    pub fn serialize_telemetry(&self, readings: &SensorReadings) -> Value {
        self.inner().serialize_telemetry(readings)
    }

    pub async fn subscribe(&self, transport: &mut dyn Transport) -> bool {
        self.inner().subscribe(transport).await
    }

    pub async fn process_message(
        &mut self,
        message: &InboundMessage,
        body: &Value,
        ctx: &mut DispatchContext<'_>,
    ) {
        self.inner_mut().process_message(message, body, ctx).await
    }

    pub fn apply_endpoint(&self, settings: &mut MqttSettings, endpoint: &str) {
        self.inner().apply_endpoint(settings, endpoint)
    }

    pub async fn on_connected(&mut self, ctx: &mut DispatchContext<'_>) -> GatewayResult<()> {
        self.inner_mut().on_connected(ctx).await
    }
}

/// Check that the client credentials and the primary root CA are on the radio
///
/// The fallback CA is optional; without it a rejected server certificate
/// simply fails the connect.
pub async fn ensure_certificates(
    transport: &mut dyn Transport,
    tls: &TlsSettings,
) -> GatewayResult<()> {
    for path in tls.client_files() {
        if !transport.file_exists(path).await {
            return Err(GatewayError::certificate_missing(path));
        }
    }

    let mut candidates = tls.ca_candidates().into_iter();
    if let Some(primary) = candidates.next() {
        if !transport.file_exists(primary).await {
            return Err(GatewayError::certificate_missing(primary));
        }
    }
    for fallback in candidates {
        if !transport.file_exists(fallback).await {
            debug!(path = %fallback, "Fallback root CA not present");
        }
    }
    Ok(())
}

/// Persist the configured endpoint unless one is already stored
pub async fn persist_endpoint(
    transport: &mut dyn Transport,
    config: &DeviceConfig,
) -> GatewayResult<()> {
    let Some(endpoint) = &config.endpoint_address else {
        return Ok(());
    };
    if transport.file_exists(paths::ENDPOINT).await {
        return Ok(());
    }
    if !transport.write_file(paths::ENDPOINT, endpoint).await {
        return Err(GatewayError::Transport(crate::transport::TransportError::Io(
            format!("could not write {}", paths::ENDPOINT),
        )));
    }
    info!(endpoint = %endpoint, "Endpoint persisted");
    Ok(())
}
