//! Generic MQTT broker adapter
//!
//! Commands arrive on `gateway/{clientId}/commands/{name}` and are answered on
//! `gateway/{clientId}/commands/{name}/result` with `{"status", "message"}`.

use super::topics::BROKER_COMMAND;
use super::{CloudPlatform, DispatchContext, Platform};
use crate::device::loader::DeviceConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::peripherals::colors;
use crate::transport::settings::MQTT_PORT_UNSECURE;
use crate::transport::{InboundMessage, MqttSettings, QoS, Subscription};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Read a 0..=255 color channel from a JSON object
pub(crate) fn color_channel(body: &Value, name: &str) -> Option<u8> {
    body.get(name)
        .and_then(Value::as_u64)
        .and_then(|value| u8::try_from(value).ok())
}

/// Read `{red, green, blue}` as a packed color
pub(crate) fn color_from(body: &Value) -> Option<u32> {
    Some(colors::rgb(
        color_channel(body, "red")?,
        color_channel(body, "green")?,
        color_channel(body, "blue")?,
    ))
}

#[derive(Debug, Clone)]
pub struct BrokerAdapter {
    client_id: String,
}

impl BrokerAdapter {
    fn result_topic(&self, name: &str) -> String {
        format!("gateway/{}/commands/{}/result", self.client_id, name)
    }

    async fn respond(&self, ctx: &mut DispatchContext<'_>, name: &str, status: u16, message: &str) {
        let body = json!({ "status": status, "message": message });
        ctx.publish_json(&self.result_topic(name), &body, QoS::AtLeastOnce)
            .await;
    }
}

#[async_trait]
impl CloudPlatform for BrokerAdapter {
    fn load(config: &DeviceConfig, settings: &mut MqttSettings) -> GatewayResult<Self> {
        let address = config
            .endpoint_address
            .clone()
            .ok_or_else(|| GatewayError::config_parse("broker address missing"))?;

        *settings = MqttSettings::new(config.client_id.clone(), address, MQTT_PORT_UNSECURE);
        Ok(Self {
            client_id: config.client_id.clone(),
        })
    }

    fn platform(&self) -> Platform {
        Platform::Broker
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription::new(
            format!("gateway/{}/commands/#", self.client_id),
            QoS::AtLeastOnce,
        )]
    }

    fn telemetry_topic(&self) -> String {
        format!("gateway/{}/telemetry", self.client_id)
    }

    async fn process_message(
        &mut self,
        message: &InboundMessage,
        body: &Value,
        ctx: &mut DispatchContext<'_>,
    ) {
        let Some(matched) = BROKER_COMMAND.matches(&message.topic) else {
            debug!(topic = %message.topic, "Not a broker command topic");
            return;
        };
        if matched.field("client") != Some(self.client_id.as_str()) {
            debug!(topic = %message.topic, "Command for another client ignored");
            return;
        }
        let Some(name) = matched.field("name") else {
            return;
        };

        match name {
            "setLEDColor" => match color_from(body) {
                Some(color) => {
                    ctx.indicator.set_color(color);
                    ctx.notify("LED color set");
                    self.respond(ctx, name, 200, "OK").await;
                }
                None => {
                    warn!(body = %body, "Invalid LED color");
                    self.respond(ctx, name, 400, "Payload invalid").await;
                }
            },
            "setTelemetryInterval" => {
                let requested = body.get("interval").and_then(Value::as_u64);
                match requested.map(|ms| ctx.interval.try_set_millis(ms)) {
                    Some(Ok(())) => {
                        info!(interval_ms = ctx.interval.as_millis(), "Telemetry interval updated");
                        self.respond(ctx, name, 200, "OK").await;
                    }
                    Some(Err(e)) => {
                        warn!("{}", e);
                        self.respond(ctx, name, 400, "Interval out of range").await;
                    }
                    None => {
                        self.respond(ctx, name, 400, "Payload invalid").await;
                    }
                }
            }
            other => {
                warn!(command = %other, "Unknown broker command");
                self.respond(ctx, other, 404, "Unknown command").await;
            }
        }
    }
}
