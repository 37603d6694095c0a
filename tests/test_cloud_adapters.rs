//! Cloud command handling through the running device
//!
//! Each test brings a device to `Idle` on one platform, queues inbound
//! messages on the mock radio and checks what the device did about them.


use sensor_gateway::cloud::{CloudAdapter, Platform};
use sensor_gateway::device::{parse_configuration, DeviceState};
use sensor_gateway::peripherals::colors;
use sensor_gateway::testing::MockRadio;
use sensor_gateway::transport::store::paths;
use sensor_gateway::transport::{MqttSettings, QoS, Subscription, Transport};
use serde_json::json;
use test_helpers::*;

async fn idle_device(radio: MockRadio) -> Harness {
    let mut h = Harness::new(radio);
    h.device.boot().await;
    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::Idle);
    h.radio.clear_history().await;
    h
}

fn azure_radio() -> MockRadio {
    MockRadio::new()
        .with_file(paths::CONFIG_FILE, AZURE_CONFIG)
        .with_file(paths::ENDPOINT, "hub-1.azure-devices.net")
        .with_file(paths::ROOT_CA, "ca")
        .with_file(paths::DEVICE_CERT, "cert")
        .with_file(paths::DEVICE_KEY, "key")
}

#[test]
fn test_adapter_selection_by_version() {
    let cases = [
        (BROKER_CONFIG, Platform::Broker, 1883, false),
        (AZURE_CONFIG, Platform::Azure, 8883, true),
        (AWS_CONFIG, Platform::Aws, 8883, true),
        (KAA_CONFIG, Platform::Kaa, 1883, false),
    ];
    for (text, platform, port, secure) in cases {
        let config = parse_configuration(text).unwrap();
        let mut settings = MqttSettings::default();
        let adapter = CloudAdapter::from_config(&config, &mut settings).unwrap();
        assert_eq!(adapter.platform(), platform);
        assert_eq!(settings.port, port, "{platform:?}");
        assert_eq!(settings.is_secure(), secure, "{platform:?}");
    }
}

fn platform_configs() -> [(Platform, &'static str); 4] {
    [
        (Platform::Broker, BROKER_CONFIG),
        (Platform::Azure, AZURE_CONFIG),
        (Platform::Aws, AWS_CONFIG),
        (Platform::Kaa, KAA_CONFIG),
    ]
}

#[test]
fn test_telemetry_document_survives_reparse() {
    let readings = readings();
    let accel = readings.acceleration.unwrap();

    for (platform, text) in platform_configs() {
        let config = parse_configuration(text).unwrap();
        let mut settings = MqttSettings::default();
        let adapter = CloudAdapter::from_config(&config, &mut settings).unwrap();

        let wire = adapter.serialize_telemetry(&readings).to_string();
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();

        let close = |field: &serde_json::Value, expected: f32| {
            let value = field.as_f64().unwrap_or(f64::NAN);
            (value - f64::from(expected)).abs() < 1e-3
        };
        assert!(close(&parsed["pressure"], readings.pressure.unwrap()), "{platform:?}");
        assert!(close(&parsed["temperature"], readings.temperature.unwrap()), "{platform:?}");
        assert!(close(&parsed["humidity"], readings.humidity.unwrap()), "{platform:?}");
        assert!(close(&parsed["acceleration"]["x"], accel.x), "{platform:?}");
        assert!(close(&parsed["acceleration"]["y"], accel.y), "{platform:?}");
        assert!(close(&parsed["acceleration"]["z"], accel.z), "{platform:?}");
    }
}

#[tokio::test]
async fn test_subscriptions_per_platform() {
    for (platform, text) in platform_configs() {
        let config = parse_configuration(text).unwrap();
        let mut settings = MqttSettings::default();
        let adapter = CloudAdapter::from_config(&config, &mut settings).unwrap();

        let mut radio = MockRadio::new().with_wifi_connected();
        assert!(!adapter.subscribe(&mut radio).await, "{platform:?} before connect");
        radio.connect_mqtt(&settings).await.unwrap();
        assert!(adapter.subscribe(&mut radio).await, "{platform:?}");

        let expected = match platform {
            Platform::Broker => vec![Subscription::new("gateway/gw-1/commands/#", QoS::AtLeastOnce)],
            Platform::Azure => vec![
                Subscription::new("$iothub/twin/res/#", QoS::AtLeastOnce),
                Subscription::new("$iothub/twin/PATCH/properties/desired/#", QoS::AtLeastOnce),
                Subscription::new("$iothub/methods/POST/#", QoS::AtLeastOnce),
            ],
            Platform::Aws => vec![Subscription::new("iot/thing-7/command", QoS::AtLeastOnce)],
            Platform::Kaa => vec![Subscription::new(
                "kp1/app-v1/cex/tok1/command/#",
                QoS::AtMostOnce,
            )],
        };
        assert_eq!(radio.get_subscriptions().await, expected, "{platform:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_broker_interval_command() {
    let radio = MockRadio::new().with_file(paths::CONFIG_FILE, BROKER_CONFIG);
    let mut h = idle_device(radio).await;

    h.radio
        .queue_message(
            "gateway/gw-1/commands/setTelemetryInterval",
            r#"{"interval":5000}"#,
        )
        .await;
    h.radio
        .queue_message(
            "gateway/gw-1/commands/setTelemetryInterval",
            r#"{"interval":1000}"#,
        )
        .await;
    h.device.tick().await.unwrap();
    h.device.tick().await.unwrap();

    assert_eq!(h.device.interval().as_millis(), 5000);
    let results = h
        .radio
        .published_to("gateway/gw-1/commands/setTelemetryInterval/result")
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].json(), json!({"status": 200, "message": "OK"}));
    assert_eq!(results[1].json()["status"], 400);
}

#[tokio::test(start_paused = true)]
async fn test_broker_unknown_command_and_garbage() {
    let radio = MockRadio::new().with_file(paths::CONFIG_FILE, BROKER_CONFIG);
    let mut h = idle_device(radio).await;

    h.radio
        .queue_raw("gateway/gw-1/commands/setLEDColor", vec![0xc3, 0x28])
        .await;
    h.radio
        .queue_message("gateway/gw-1/commands/reboot", "{}")
        .await;
    h.device.tick().await.unwrap();
    h.device.tick().await.unwrap();

    assert_eq!(h.device.state(), DeviceState::Idle);
    let published = h.radio.get_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "gateway/gw-1/commands/reboot/result");
    assert_eq!(
        published[0].json(),
        json!({"status": 404, "message": "Unknown command"})
    );
}

#[tokio::test(start_paused = true)]
async fn test_azure_desired_patch_and_method() {
    let mut h = idle_device(azure_radio()).await;

    h.radio
        .queue_message(
            "$iothub/twin/PATCH/properties/desired/?$version=7",
            r#"{"telemetrySendFrequency":60,"$version":7}"#,
        )
        .await;
    h.radio
        .queue_message(
            "$iothub/twin/PATCH/properties/desired/?$version=8",
            r#"{"telemetrySendFrequency":1,"$version":8}"#,
        )
        .await;
    h.radio
        .queue_message(
            "$iothub/methods/POST/setLEDColor/?$rid=42",
            r#"{"red":0,"green":128,"blue":255}"#,
        )
        .await;
    h.radio
        .queue_message(
            "$iothub/methods/POST/setLEDColor/?$rid=43",
            r#"{"red":300,"green":0,"blue":0}"#,
        )
        .await;
    for _ in 0..4 {
        h.device.tick().await.unwrap();
    }

    assert_eq!(h.device.interval().as_secs(), 60);
    let acks = h
        .radio
        .published_to("$iothub/twin/PATCH/properties/reported/")
        .await;
    assert_eq!(acks.len(), 2);
    assert_eq!(
        acks[0].json(),
        json!({"telemetrySendFrequency": {"value": 60, "ac": 200, "av": 7, "ad": "success"}})
    );
    assert_eq!(acks[1].json()["telemetrySendFrequency"]["ac"], 400);
    assert_eq!(acks[1].json()["telemetrySendFrequency"]["av"], 8);

    let methods = h.radio.published_to("$iothub/methods/res/").await;
    assert_eq!(methods.len(), 2);
    assert_eq!(methods[0].topic, "$iothub/methods/res/200/?$rid=42");
    assert_eq!(methods[1].topic, "$iothub/methods/res/400/?$rid=43");
    assert_eq!(h.indicator.last(), Some(colors::rgb(0, 128, 255)));
}

#[tokio::test(start_paused = true)]
async fn test_kaa_commands_and_identity_filter() {
    let radio = MockRadio::new().with_file(paths::CONFIG_FILE, KAA_CONFIG);
    let mut h = idle_device(radio).await;

    h.radio
        .queue_message(
            "kp1/app-v1/cex/tok1/command/switch_on_off/status",
            r#"[{"id":1,"payload":{"value":"on"}},{"id":2,"payload":{"value":"dim"}}]"#,
        )
        .await;
    h.radio
        .queue_message(
            "kp1/app-v1/cex/other-token/command/setled/status",
            r#"[{"id":3,"payload":{"red":1,"green":2,"blue":3}}]"#,
        )
        .await;
    h.radio
        .queue_message(
            "kp1/app-v1/cex/tok1/command/firmware/status",
            r#"[{"id":4,"payload":{}}]"#,
        )
        .await;
    for _ in 0..3 {
        h.device.tick().await.unwrap();
    }

    let results = h
        .radio
        .published_to("kp1/app-v1/cex/tok1/result/switch_on_off")
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].json(),
        json!([{"id": 1, "statusCode": 200, "reasonPhrase": "OK", "payload": {}}])
    );
    assert_eq!(results[1].json()[0]["statusCode"], 400);
    assert_eq!(results[1].json()[0]["reasonPhrase"], "Unknown state");

    assert_eq!(h.radio.get_published().await.len(), 2);
    assert_eq!(h.indicator.last(), Some(colors::WHITE));
}

#[tokio::test(start_paused = true)]
async fn test_aws_led_command_publishes_nothing() {
    let radio = MockRadio::new()
        .with_file(paths::CONFIG_FILE, AWS_CONFIG)
        .with_file(paths::ROOT_CA, "ca")
        .with_file(paths::DEVICE_CERT, "cert")
        .with_file(paths::DEVICE_KEY, "key");
    let mut h = idle_device(radio).await;

    h.radio
        .queue_message(
            "iot/thing-7/command",
            r#"{"command":"setLEDColor","red":255,"green":0,"blue":0}"#,
        )
        .await;
    h.device.tick().await.unwrap();

    assert!(h.radio.get_published().await.is_empty());
    assert_eq!(h.indicator.last(), Some(colors::rgb(255, 0, 0)));
    assert!(h.display.contains("LED color set"));
}
