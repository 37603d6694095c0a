//! Device lifecycle tests
//!
//! Drive the state machine end to end against the mock radio: boot paths,
//! cloud connection, telemetry pacing and the recovery rules.


use sensor_gateway::device::{Button, ButtonEvent, DeviceState, TickOutcome};
use sensor_gateway::peripherals::colors;
use sensor_gateway::testing::{ConnectOutcome, FixedSensors, MockRadio};
use sensor_gateway::transport::store::paths;
use sensor_gateway::transport::{QoS, RadioStatus, Transport};
use std::time::Duration;
use test_helpers::*;
use tokio::time::Instant;

async fn tick_for(harness: &mut Harness, span: Duration) {
    let start = Instant::now();
    while start.elapsed() < span {
        harness.device.tick().await.unwrap();
    }
}

fn with_credentials(radio: MockRadio) -> MockRadio {
    radio
        .with_file(paths::ROOT_CA, "primary-ca")
        .with_file(paths::FALLBACK_ROOT_CA, "fallback-ca")
        .with_file(paths::DEVICE_CERT, "cert")
        .with_file(paths::DEVICE_KEY, "key")
}

#[tokio::test(start_paused = true)]
async fn test_first_boot_to_first_telemetry() {
    let mut h = Harness::new(MockRadio::new());

    h.device.boot().await;
    assert_eq!(h.device.state(), DeviceState::WaitingForConfig);

    // Configuration arrives through the access point, then the user restarts
    h.device.buttons().set(ButtonEvent::Short(Button::C));
    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::ConfiguringDevice);
    assert_eq!(h.radio.status().await, RadioStatus::Provisioning);
    h.radio.put_file(paths::CONFIG_FILE, KAA_CONFIG).await;

    h.device.reboot().await;
    assert_eq!(h.device.state(), DeviceState::ConnectingToCloud);

    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::Idle);
    let subscriptions = h.radio.get_subscriptions().await;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].topic, "kp1/app-v1/cex/tok1/command/#");
    assert_eq!(subscriptions[0].qos, QoS::AtMostOnce);

    let telemetry_topic = "kp1/app-v1/dcx/tok1/json";
    tick_for(&mut h, Duration::from_millis(29_500)).await;
    assert!(h.radio.published_to(telemetry_topic).await.is_empty());

    tick_for(&mut h, Duration::from_millis(1_000)).await;
    let published = h.radio.published_to(telemetry_topic).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    assert!(!published[0].retain);

    let body = published[0].json();
    assert_eq!(body["temperature"], serde_json::json!(22.5f32));
    assert_eq!(body["acceleration"]["z"], serde_json::json!(1.0));
    assert_eq!(h.device.state(), DeviceState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_packet_loss_forces_restart() {
    let radio = MockRadio::new().with_file(paths::CONFIG_FILE, BROKER_CONFIG);
    let mut h = Harness::new(radio);
    h.device.boot().await;
    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::Idle);

    h.radio.fail_next_publishes(3).await;

    let mut restarted = false;
    for _ in 0..2_000 {
        if h.device.tick().await.unwrap() == TickOutcome::Restart {
            restarted = true;
            break;
        }
    }
    assert!(restarted);
    assert_eq!(h.radio.status().await, RadioStatus::Error);
    assert!(h.radio.published_to("gateway/gw-1/telemetry").await.is_empty());

    h.device.reboot().await;
    assert_eq!(h.device.state(), DeviceState::ConnectingToCloud);
    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::Idle);
    assert_eq!(h.device.packet_loss(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success_keeps_running() {
    let radio = MockRadio::new().with_file(paths::CONFIG_FILE, BROKER_CONFIG);
    let mut h = Harness::new(radio);
    h.device.boot().await;
    h.device.tick().await.unwrap();

    h.radio.fail_next_publishes(2).await;
    tick_for(&mut h, Duration::from_millis(60_500)).await;
    assert_eq!(h.device.packet_loss(), 2);

    tick_for(&mut h, Duration::from_millis(30_000)).await;
    assert_eq!(h.device.packet_loss(), 0);
    assert_eq!(h.radio.published_to("gateway/gw-1/telemetry").await.len(), 1);
    assert_eq!(h.radio.status().await, RadioStatus::MqttConnected);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_root_ca_uses_fallback() {
    let radio = with_credentials(MockRadio::new().with_file(paths::CONFIG_FILE, AWS_CONFIG));
    radio.script_connects(vec![ConnectOutcome::WrongRootCa]).await;
    let mut h = Harness::new(radio);

    h.device.boot().await;
    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::Idle);

    let attempts = h.radio.get_connect_attempts().await;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].tls.as_ref().unwrap().ca_file, paths::ROOT_CA);
    assert_eq!(attempts[1].tls.as_ref().unwrap().ca_file, paths::FALLBACK_ROOT_CA);
    assert_eq!(attempts[1].port, 8883);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_by_both_cas_ends_in_error_state() {
    let radio = with_credentials(MockRadio::new().with_file(paths::CONFIG_FILE, AWS_CONFIG));
    radio
        .script_connects(vec![ConnectOutcome::WrongRootCa; 6])
        .await;
    let mut h = Harness::new(radio);
    h.device.boot().await;

    let ticks = h
        .tick_until(10, |device| device.state() == DeviceState::ErrorState)
        .await;
    assert_eq!(ticks, 4);
    assert_eq!(h.radio.get_connect_attempts().await.len(), 6);

    h.device.tick().await.unwrap();
    assert_eq!(h.indicator.last(), Some(colors::RED));
    assert!(h.display.contains("Failed to connect"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_certificate_is_fatal() {
    let radio = MockRadio::new()
        .with_file(paths::CONFIG_FILE, AWS_CONFIG)
        .with_file(paths::ROOT_CA, "primary-ca");
    let mut h = Harness::new(radio);
    h.device.boot().await;

    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::ErrorState);
    assert!(h.radio.get_connect_attempts().await.is_empty());
    assert!(h.display.contains("Certificate file missing: user/devcert"));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_ca_alone_is_not_enough() {
    let radio = MockRadio::new()
        .with_file(paths::CONFIG_FILE, AWS_CONFIG)
        .with_file(paths::FALLBACK_ROOT_CA, "fallback-ca")
        .with_file(paths::DEVICE_CERT, "cert")
        .with_file(paths::DEVICE_KEY, "key");
    let mut h = Harness::new(radio);
    h.device.boot().await;

    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::ErrorState);
    assert!(h.radio.get_connect_attempts().await.is_empty());
    assert!(h.display.contains("Certificate file missing: user/rootca1"));
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_restarts() {
    let radio = MockRadio::new().with_file(paths::CONFIG_FILE, BROKER_CONFIG);
    let mut h = Harness::new(radio);
    h.device.boot().await;
    h.device.tick().await.unwrap();

    h.radio.set_status(RadioStatus::Error).await;
    assert_eq!(h.device.tick().await.unwrap(), TickOutcome::Restart);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_firmware_is_terminal() {
    let radio = MockRadio::new()
        .with_firmware("2.1.3")
        .with_file(paths::CONFIG_FILE, BROKER_CONFIG);
    let mut h = Harness::new(radio);
    h.device.boot().await;

    for _ in 0..5 {
        h.device.tick().await.unwrap();
        assert_eq!(h.device.state(), DeviceState::InvalidFirmware);
    }
    assert!(h.radio.get_wifi_joins().await.is_empty());
    assert!(h.display.contains("Radio firmware not supported"));
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_version_waits_for_config() {
    let radio = MockRadio::new().with_file(
        paths::CONFIG_FILE,
        r#"{"version":7,"clientId":"gw-1","mqttServer":"broker.local"}"#,
    );
    let mut h = Harness::new(radio);
    h.device.boot().await;

    assert_eq!(h.device.state(), DeviceState::WaitingForConfig);
    assert!(h.display.contains("Unsupported configuration version: 7"));

    // Only button C leaves this state
    h.device.buttons().set(ButtonEvent::Short(Button::A));
    h.device.tick().await.unwrap();
    assert_eq!(h.device.state(), DeviceState::WaitingForConfig);
}

#[tokio::test(start_paused = true)]
async fn test_factory_reset_from_error_state() {
    let radio = with_credentials(MockRadio::new().with_file(paths::CONFIG_FILE, AWS_CONFIG))
        .with_file(paths::ENDPOINT, "abc-ats.iot.eu-central-1.amazonaws.com");
    radio
        .script_connects(vec![ConnectOutcome::Refused; 3])
        .await;
    let mut h = Harness::new(radio);
    h.device.boot().await;
    h.tick_until(10, |device| device.state() == DeviceState::ErrorState)
        .await;
    assert_eq!(h.device.state(), DeviceState::ErrorState);

    h.device.buttons().set(ButtonEvent::Long(Button::C));
    assert_eq!(h.device.tick().await.unwrap(), TickOutcome::Restart);

    for path in [
        paths::CONFIG_FILE,
        paths::ENDPOINT,
        paths::DEVICE_CERT,
        paths::DEVICE_KEY,
    ] {
        assert!(!h.radio.has_file(path).await, "{path} survived the reset");
    }
    assert!(h.radio.has_file(paths::ROOT_CA).await);
    assert_eq!(h.radio.status().await, RadioStatus::Disconnected);

    h.device.reboot().await;
    assert_eq!(h.device.state(), DeviceState::WaitingForConfig);
}

#[tokio::test(start_paused = true)]
async fn test_no_sensors_no_telemetry() {
    let radio = MockRadio::new().with_file(paths::CONFIG_FILE, BROKER_CONFIG);
    let mut h = Harness::with_sensors(radio, FixedSensors::absent());
    h.device.boot().await;
    h.device.tick().await.unwrap();

    tick_for(&mut h, Duration::from_secs(65)).await;
    assert!(h.radio.get_published().await.is_empty());
    assert_eq!(h.device.state(), DeviceState::Idle);
}
