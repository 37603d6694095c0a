//! AWS IoT Core adapter
//!
//! TLS 1.2 with a device certificate. Only `setLEDColor` is handled and no
//! response is published; the result is shown on the display.

use super::broker::color_from;
use super::topics::AWS_COMMAND;
use super::{CloudPlatform, DispatchContext, Platform};
use crate::device::loader::DeviceConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::settings::MQTT_PORT_SECURE;
use crate::transport::{InboundMessage, MqttSettings, QoS, Subscription, TlsSettings};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AwsAdapter {
    client_id: String,
}

#[async_trait]
impl CloudPlatform for AwsAdapter {
    fn load(config: &DeviceConfig, settings: &mut MqttSettings) -> GatewayResult<Self> {
        let address = config
            .endpoint_address
            .clone()
            .ok_or_else(|| GatewayError::config_parse("AWS endpoint missing"))?;

        *settings = MqttSettings::new(config.client_id.clone(), address, MQTT_PORT_SECURE);
        settings.tls = Some(TlsSettings::mutual_tls());
        Ok(Self {
            client_id: config.client_id.clone(),
        })
    }

    fn platform(&self) -> Platform {
        Platform::Aws
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription::new(
            format!("iot/{}/command", self.client_id),
            QoS::AtLeastOnce,
        )]
    }

    fn telemetry_topic(&self) -> String {
        format!("iot/{}/telemetry", self.client_id)
    }

    async fn process_message(
        &mut self,
        message: &InboundMessage,
        body: &Value,
        ctx: &mut DispatchContext<'_>,
    ) {
        match AWS_COMMAND.matches(&message.topic) {
            Some(matched) if matched.field("client") == Some(self.client_id.as_str()) => {}
            _ => {
                debug!(topic = %message.topic, "Not an AWS command topic");
                return;
            }
        }

        match body.get("command").and_then(Value::as_str) {
            Some("setLEDColor") => match color_from(body) {
                Some(color) => {
                    ctx.indicator.set_color(color);
                    ctx.notify("LED color set");
                }
                None => {
                    warn!(body = %body, "Invalid LED color");
                    ctx.notify("Invalid LED color");
                }
            },
            Some(other) => {
                warn!(command = %other, "Unknown AWS command");
                ctx.notify("Unknown command");
            }
            None => debug!("AWS message without command field"),
        }
    }
}
