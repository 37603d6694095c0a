//! KaaIoT adapter
//!
//! Plain MQTT on port 1883. Commands arrive as arrays of `{id, payload}` on
//! `kp1/{app}/cex/{token}/command/{type}/status`; each entry is answered on
//! `kp1/{app}/cex/{token}/result/{type}`.

use super::broker::color_from;
use super::topics::{KAA_COMMAND, KAA_RESULT};
use super::{CloudPlatform, DispatchContext, Platform};
use crate::device::loader::{CloudIdentity, DeviceConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::peripherals::colors;
use crate::transport::settings::MQTT_PORT_UNSECURE;
use crate::transport::{InboundMessage, MqttSettings, QoS, Subscription};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const SWITCH_ON_OFF: &str = "switch_on_off";
const SET_LED: &str = "setled";

#[derive(Debug, Clone)]
pub struct KaaAdapter {
    token: String,
    app_version: String,
}

/// Outcome of one command entry
#[derive(Debug, Clone, PartialEq)]
struct CommandResult {
    status: u16,
    reason: &'static str,
}

impl CommandResult {
    fn ok() -> Self {
        Self {
            status: 200,
            reason: "OK",
        }
    }

    fn bad_request(reason: &'static str) -> Self {
        Self {
            status: 400,
            reason,
        }
    }
}

impl KaaAdapter {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    fn switch_on_off(payload: &Value, ctx: &mut DispatchContext<'_>) -> CommandResult {
        match payload.get("value").and_then(Value::as_str) {
            Some("on") => {
                ctx.indicator.set_color(colors::WHITE);
                ctx.notify("Switched on");
                CommandResult::ok()
            }
            Some("off") => {
                ctx.indicator.set_color(colors::OFF);
                ctx.notify("Switched off");
                CommandResult::ok()
            }
            _ => CommandResult::bad_request("Unknown state"),
        }
    }

    fn set_led(payload: &Value, ctx: &mut DispatchContext<'_>) -> CommandResult {
        match color_from(payload) {
            Some(color) => {
                ctx.indicator.set_color(color);
                ctx.notify("LED color set");
                CommandResult::ok()
            }
            None => CommandResult::bad_request("Payload invalid"),
        }
    }
}

#[async_trait]
impl CloudPlatform for KaaAdapter {
    fn load(config: &DeviceConfig, settings: &mut MqttSettings) -> GatewayResult<Self> {
        let CloudIdentity::Kaa { token, app_version } = &config.identity else {
            return Err(GatewayError::config_parse("Kaa identity missing"));
        };
        let address = config
            .endpoint_address
            .clone()
            .ok_or_else(|| GatewayError::config_parse("Kaa server missing"))?;

        // No TLS, so no certificate validation either
        *settings = MqttSettings::new(token.clone(), address, MQTT_PORT_UNSECURE);
        Ok(Self {
            token: token.clone(),
            app_version: app_version.clone(),
        })
    }

    fn platform(&self) -> Platform {
        Platform::Kaa
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription::new(
            format!("kp1/{}/cex/{}/command/#", self.app_version, self.token),
            QoS::AtMostOnce,
        )]
    }

    fn telemetry_topic(&self) -> String {
        format!("kp1/{}/dcx/{}/json", self.app_version, self.token)
    }

    async fn process_message(
        &mut self,
        message: &InboundMessage,
        body: &Value,
        ctx: &mut DispatchContext<'_>,
    ) {
        let Some(matched) = KAA_COMMAND.matches(&message.topic) else {
            debug!(topic = %message.topic, "Not a Kaa command topic");
            return;
        };
        if matched.field("app") != Some(self.app_version.as_str())
            || matched.field("token") != Some(self.token.as_str())
        {
            warn!(topic = %message.topic, "Command for another endpoint ignored");
            return;
        }
        let Some(kind) = matched.field("kind") else {
            return;
        };
        let Some(entries) = body.as_array() else {
            warn!(kind = %kind, "Kaa command body is not an array");
            return;
        };

        let result_topic = KAA_RESULT.render(&[
            ("app", self.app_version.as_str()),
            ("token", self.token.as_str()),
            ("kind", kind),
        ]);

        for entry in entries {
            let Some(id) = entry.get("id").and_then(Value::as_i64) else {
                warn!(kind = %kind, "Kaa command entry without id");
                continue;
            };
            let payload = entry.get("payload").unwrap_or(&Value::Null);

            let result = match kind {
                SWITCH_ON_OFF => Self::switch_on_off(payload, ctx),
                SET_LED => Self::set_led(payload, ctx),
                other => {
                    info!(kind = %other, "Unsupported Kaa command ignored");
                    return;
                }
            };

            let response = json!([{
                "id": id,
                "statusCode": result.status,
                "reasonPhrase": result.reason,
                "payload": {},
            }]);
            ctx.publish_json(&result_topic, &response, QoS::AtLeastOnce)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::TelemetryInterval;
    use crate::device::loader::parse_configuration;
    use crate::testing::{FixedSensors, MockRadio, RecordingDisplay, RecordingIndicator};
    use crate::transport::Transport;

    const CONFIG: &str = r#"{"version":3,"token":"tok1","appVersion":"app-v1","mqttServer":"mqtt.cloud.kaaiot.com","sntpServer":"pool.ntp.org","timezone":0,"wifiSsid":"office","wifiKey":"k"}"#;

    struct Harness {
        adapter: KaaAdapter,
        radio: MockRadio,
        indicator: RecordingIndicator,
    }

    async fn harness() -> Harness {
        let config = parse_configuration(CONFIG).unwrap();
        let mut settings = MqttSettings::default();
        let adapter = KaaAdapter::load(&config, &mut settings).unwrap();
        let mut radio = MockRadio::new().with_wifi_connected();
        radio.connect_mqtt(&settings).await.unwrap();
        Harness {
            adapter,
            radio,
            indicator: RecordingIndicator::new(),
        }
    }

    async fn dispatch(h: &mut Harness, topic: &str, body: Value) {
        let mut radio = h.radio.clone();
        let mut interval = TelemetryInterval::default();
        let mut display = RecordingDisplay::new();
        let mut led = h.indicator.clone();
        let mut sensors = FixedSensors::absent();
        let mut ctx = DispatchContext {
            transport: &mut radio,
            interval: &mut interval,
            display: &mut display,
            indicator: &mut led,
            sensors: &mut sensors,
        };
        let message = InboundMessage::new(topic, body.to_string());
        h.adapter.process_message(&message, &body, &mut ctx).await;
    }

    #[test]
    fn test_load_primes_plain_mqtt() {
        let config = parse_configuration(CONFIG).unwrap();
        let mut settings = MqttSettings::default();
        let adapter = KaaAdapter::load(&config, &mut settings).unwrap();
        assert_eq!(settings.port, 1883);
        assert!(settings.tls.is_none());
        assert_eq!(settings.client_id, "tok1");
        assert_eq!(
            adapter.subscriptions(),
            vec![Subscription::new(
                "kp1/app-v1/cex/tok1/command/#",
                QoS::AtMostOnce
            )]
        );
        assert_eq!(adapter.telemetry_topic(), "kp1/app-v1/dcx/tok1/json");
    }

    #[tokio::test]
    async fn test_setled_valid_and_invalid() {
        let mut h = harness().await;
        dispatch(
            &mut h,
            "kp1/app-v1/cex/tok1/command/setled/status",
            json!([
                {"id": 1, "payload": {"red": 255, "green": 0, "blue": 0}},
                {"id": 2, "payload": {"red": 300, "green": 0, "blue": 0}}
            ]),
        )
        .await;

        let results = h.radio.published_to("kp1/app-v1/cex/tok1/result/setled").await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].json(),
            json!([{"id": 1, "statusCode": 200, "reasonPhrase": "OK", "payload": {}}])
        );
        assert_eq!(results[1].json()[0]["statusCode"], 400);
        assert_eq!(results[1].json()[0]["reasonPhrase"], "Payload invalid");
        assert_eq!(h.indicator.colors(), vec![0xFF0000]);
    }

    #[tokio::test]
    async fn test_switch_on_off() {
        let mut h = harness().await;
        dispatch(
            &mut h,
            "kp1/app-v1/cex/tok1/command/switch_on_off/status",
            json!([{"id": 5, "payload": {"value": "off"}}, {"id": 6, "payload": {"value": "dim"}}]),
        )
        .await;

        let results = h
            .radio
            .published_to("kp1/app-v1/cex/tok1/result/switch_on_off")
            .await;
        assert_eq!(results[0].json()[0]["statusCode"], 200);
        assert_eq!(results[1].json()[0]["reasonPhrase"], "Unknown state");
        assert_eq!(h.indicator.last(), Some(colors::OFF));
    }

    #[tokio::test]
    async fn test_identity_filter() {
        let mut h = harness().await;
        dispatch(
            &mut h,
            "kp1/app-v1/cex/other-token/command/setled/status",
            json!([{"id": 1, "payload": {"red": 1, "green": 2, "blue": 3}}]),
        )
        .await;
        dispatch(
            &mut h,
            "kp1/app-v2/cex/tok1/command/setled/status",
            json!([{"id": 1, "payload": {"red": 1, "green": 2, "blue": 3}}]),
        )
        .await;

        assert!(h.radio.get_published().await.is_empty());
        assert!(h.indicator.colors().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_ignored() {
        let mut h = harness().await;
        dispatch(
            &mut h,
            "kp1/app-v1/cex/tok1/command/reboot/status",
            json!([{"id": 1, "payload": {}}]),
        )
        .await;
        assert!(h.radio.get_published().await.is_empty());
    }
}
