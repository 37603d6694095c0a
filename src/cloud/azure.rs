//! Azure IoT Central adapter
//!
//! Talks to the IoT hub assigned by DPS. The telemetry interval is a writable
//! twin property (`telemetrySendFrequency`, in seconds) and every write is
//! acknowledged as a reported property. `setLEDColor` is a direct method.

use super::broker::color_from;
use super::topics::{AZURE_DESIRED_PATCH, AZURE_METHOD, AZURE_TWIN_RESPONSE};
use super::{CloudPlatform, DispatchContext, Platform, TelemetryInterval};
use crate::device::loader::{CloudIdentity, DeviceConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::transport::settings::MQTT_PORT_SECURE;
use crate::transport::{InboundMessage, MqttSettings, QoS, Subscription, TlsSettings};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// IoT hub MQTT API version
pub const HUB_API_VERSION: &str = "2021-04-12";

/// Writable property holding the telemetry interval in seconds
pub const INTERVAL_PROPERTY: &str = "telemetrySendFrequency";

/// Reported property acknowledgement codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Success,
    Accepted,
    /// Value set by the device itself
    SetByDevice,
    CloudSuccess,
    BadRequest,
    Throttled,
    InternalError,
}

impl AckStatus {
    pub fn code(&self) -> u16 {
        match self {
            AckStatus::Success => 200,
            AckStatus::Accepted => 202,
            AckStatus::SetByDevice => 203,
            AckStatus::CloudSuccess => 204,
            AckStatus::BadRequest => 400,
            AckStatus::Throttled => 429,
            AckStatus::InternalError => 500,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(AckStatus::Success),
            202 => Some(AckStatus::Accepted),
            203 => Some(AckStatus::SetByDevice),
            204 => Some(AckStatus::CloudSuccess),
            400 => Some(AckStatus::BadRequest),
            429 => Some(AckStatus::Throttled),
            500 => Some(AckStatus::InternalError),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AckStatus::Success => "success",
            AckStatus::Accepted => "accepted",
            AckStatus::SetByDevice => "initialize",
            AckStatus::CloudSuccess => "cloud success",
            AckStatus::BadRequest => "invalid parameter",
            AckStatus::Throttled => "throttled",
            AckStatus::InternalError => "internal error",
        }
    }
}

/// Apply a requested interval in seconds; out of range values are rejected
pub fn apply_interval(interval: &mut TelemetryInterval, requested: &Value) -> AckStatus {
    match requested.as_u64() {
        Some(secs) => match interval.try_set_secs(secs) {
            Ok(()) => AckStatus::Success,
            Err(e) => {
                warn!("{}", e);
                AckStatus::BadRequest
            }
        },
        None => AckStatus::BadRequest,
    }
}

#[derive(Debug, Clone)]
pub struct AzureAdapter {
    device_id: String,
    scope_id: String,
    dps_server: String,
    model_id: String,
    request_id: u32,
}

impl AzureAdapter {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn dps_server(&self) -> &str {
        &self.dps_server
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Next `$rid` value
    pub fn next_request_id(&mut self) -> u32 {
        self.request_id = self.request_id.wrapping_add(1);
        self.request_id
    }

    fn reported_topic(&mut self) -> String {
        format!(
            "$iothub/twin/PATCH/properties/reported/?$rid={}",
            self.next_request_id()
        )
    }

    /// Acknowledge the interval property as a reported property
    async fn publish_ack(
        &mut self,
        ctx: &mut DispatchContext<'_>,
        value: Value,
        status: AckStatus,
        version: i64,
    ) -> bool {
        let body = json!({
            INTERVAL_PROPERTY: {
                "value": value,
                "ac": status.code(),
                "av": version,
                "ad": status.description(),
            }
        });
        let topic = self.reported_topic();
        ctx.publish_json(&topic, &body, QoS::AtLeastOnce).await
    }

    async fn handle_twin_document(&mut self, body: &Value, ctx: &mut DispatchContext<'_>) {
        let desired = body.get("desired").unwrap_or(&Value::Null);
        let version = desired.get("$version").and_then(Value::as_i64).unwrap_or(1);

        match desired.get(INTERVAL_PROPERTY) {
            Some(requested) => {
                let status = apply_interval(ctx.interval, requested);
                info!(status = status.code(), version, "Twin interval applied");
                self.publish_ack(ctx, requested.clone(), status, version)
                    .await;
            }
            None => {
                // Nothing desired yet: the device's own value goes up with version 0
                let current = json!(ctx.interval.as_secs());
                self.publish_ack(ctx, current, AckStatus::SetByDevice, 0)
                    .await;
            }
        }
    }

    async fn handle_desired_patch(
        &mut self,
        body: &Value,
        query_version: Option<i64>,
        ctx: &mut DispatchContext<'_>,
    ) {
        let Some(requested) = body.get(INTERVAL_PROPERTY) else {
            debug!("Desired patch without interval property");
            return;
        };
        let version = body
            .get("$version")
            .and_then(Value::as_i64)
            .or(query_version)
            .unwrap_or(1);

        let status = apply_interval(ctx.interval, requested);
        if status == AckStatus::Success {
            ctx.notify("Interval updated");
        }
        info!(status = status.code(), version, "Desired interval applied");
        self.publish_ack(ctx, requested.clone(), status, version)
            .await;
    }

    async fn handle_method(
        &mut self,
        method: &str,
        rid: &str,
        body: &Value,
        ctx: &mut DispatchContext<'_>,
    ) {
        let status = match method {
            "setLEDColor" => match color_from(body) {
                Some(color) => {
                    ctx.indicator.set_color(color);
                    ctx.notify("LED color set");
                    200
                }
                None => {
                    warn!(body = %body, "Invalid LED color");
                    400
                }
            },
            other => {
                warn!(method = %other, "Unknown direct method");
                404
            }
        };

        let topic = format!("$iothub/methods/res/{status}/?$rid={rid}");
        ctx.publish_json(&topic, &json!({}), QoS::AtLeastOnce).await;
    }
}

#[async_trait]
impl CloudPlatform for AzureAdapter {
    fn load(config: &DeviceConfig, settings: &mut MqttSettings) -> GatewayResult<Self> {
        let CloudIdentity::Azure {
            scope_id,
            dps_server,
            model_id,
        } = &config.identity
        else {
            return Err(GatewayError::config_parse("Azure identity missing"));
        };

        // The hub address is filled in once DPS has assigned one
        *settings = MqttSettings::new(config.client_id.clone(), "", MQTT_PORT_SECURE);
        settings.tls = Some(TlsSettings::mutual_tls());

        Ok(Self {
            device_id: config.client_id.clone(),
            scope_id: scope_id.clone(),
            dps_server: dps_server.clone(),
            model_id: model_id.clone(),
            request_id: 0,
        })
    }

    fn platform(&self) -> Platform {
        Platform::Azure
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        vec![
            Subscription::new("$iothub/twin/res/#", QoS::AtLeastOnce),
            Subscription::new("$iothub/twin/PATCH/properties/desired/#", QoS::AtLeastOnce),
            Subscription::new("$iothub/methods/POST/#", QoS::AtLeastOnce),
        ]
    }

    fn telemetry_topic(&self) -> String {
        format!("devices/{}/messages/events/", self.device_id)
    }

    fn apply_endpoint(&self, settings: &mut MqttSettings, endpoint: &str) {
        settings.address = endpoint.to_string();
        settings.username = Some(format!(
            "{}/{}/?api-version={}&model-id={}",
            endpoint, self.device_id, HUB_API_VERSION, self.model_id
        ));
    }

    async fn process_message(
        &mut self,
        message: &InboundMessage,
        body: &Value,
        ctx: &mut DispatchContext<'_>,
    ) {
        if let Some(matched) = AZURE_TWIN_RESPONSE.matches(&message.topic) {
            let status = matched
                .field("status")
                .and_then(|s| s.parse::<u16>().ok())
                .and_then(AckStatus::from_code);
            match status {
                Some(AckStatus::Success) => self.handle_twin_document(body, ctx).await,
                Some(AckStatus::CloudSuccess) => debug!("Reported properties accepted"),
                _ => warn!(topic = %message.topic, "Unexpected twin response"),
            }
        } else if let Some(matched) = AZURE_DESIRED_PATCH.matches(&message.topic) {
            let version = matched.query("$version").and_then(|v| v.parse().ok());
            self.handle_desired_patch(body, version, ctx).await;
        } else if let Some(matched) = AZURE_METHOD.matches(&message.topic) {
            let method = matched.field("method").unwrap_or_default();
            let rid = matched.query("$rid").unwrap_or("0");
            self.handle_method(method, rid, body, ctx).await;
        } else {
            debug!(topic = %message.topic, "Unhandled Azure topic");
        }
    }

    async fn on_connected(&mut self, ctx: &mut DispatchContext<'_>) -> GatewayResult<()> {
        let topic = format!("$iothub/twin/GET/?$rid={}", self.next_request_id());
        if !ctx
            .transport
            .publish(&topic, b"", QoS::AtLeastOnce, false)
            .await
        {
            return Err(GatewayError::publish_failure(topic));
        }

        match ctx.transport.get_message(true).await {
            Some(response) => match serde_json::from_slice::<Value>(&response.payload) {
                Ok(body) => self.process_message(&response, &body, ctx).await,
                Err(e) => warn!(topic = %response.topic, "Twin response is not JSON: {}", e),
            },
            None => warn!("No twin response received"),
        }

        if let Some(voltage) = ctx.sensors.battery_voltage() {
            let topic = self.reported_topic();
            ctx.publish_json(&topic, &json!({ "batteryVoltage": voltage }), QoS::AtLeastOnce)
                .await;
        }

        let component = json!({
            "calypso": {
                "__t": "c",
                "macAddress": ctx.transport.mac_address().await,
                "udid": ctx.transport.udid().await,
                "swVersion": ctx.transport.firmware_version().await,
            }
        });
        let topic = self.reported_topic();
        ctx.publish_json(&topic, &component, QoS::AtLeastOnce).await;
        Ok(())
    }
}
