//! Configuration loading and validation tests
//!
//! Covers both configuration layers: the host TOML file and the device
//! configuration document stored on the radio.

use sensor_gateway::config::{GatewayConfig, SettingsError};
use sensor_gateway::device::{load_configuration, CloudIdentity, ConfigError};
use sensor_gateway::error::GatewayError;
use sensor_gateway::testing::MockRadio;
use sensor_gateway::transport::store::paths;
use sensor_gateway::transport::WifiSecurity;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[test]
fn test_host_config_loads_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[radio]
store_dir = "/var/lib/gateway"
firmware_version = "2.4.0"
mac_address = "aa:bb:cc:dd:ee:ff"

[timing]
tick_interval_ms = 250

[provisioning]
max_status_polls = 5

[reconnect]
max_attempts = 8
backoff_pattern = [500, 1000]
sustained_delay = 2000

[telemetry]
default_interval_ms = 10000
"#
    )
    .unwrap();

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.radio.store_dir, Path::new("/var/lib/gateway"));
    assert_eq!(config.radio.firmware_version, "2.4.0");
    assert_eq!(config.timing.tick_interval_ms, 250);
    assert_eq!(config.timing.config_step_ms, 3000);
    assert_eq!(config.provisioning.max_status_polls, 5);
    assert_eq!(config.reconnect.max_attempts, Some(8));
    assert_eq!(config.telemetry.default_interval_ms, 10000);
}

#[test]
fn test_host_config_rejects_bad_values() {
    let result = GatewayConfig::from_toml_str("[telemetry]\ndefault_interval_ms = 100\n");
    assert!(matches!(result, Err(SettingsError::Invalid(_))));

    let result = GatewayConfig::from_toml_str("[radio]\nconnect_timeout_ms = 0\n");
    assert!(matches!(result, Err(SettingsError::Invalid(_))));

    let result = GatewayConfig::from_toml_str("[radio\n");
    assert!(matches!(result, Err(SettingsError::TomlParse(_))));
}

#[test]
fn test_host_config_missing_file() {
    let result = GatewayConfig::discover(Some(Path::new("/nonexistent/gateway.toml")));
    assert!(matches!(result, Err(SettingsError::FileRead(_))));
}

#[test]
fn test_host_config_renders_back() {
    let config = GatewayConfig::default();
    let rendered = config.to_toml_string().unwrap();
    assert_eq!(GatewayConfig::from_toml_str(&rendered).unwrap(), config);
}

#[tokio::test]
async fn test_device_config_from_radio() {
    let mut radio = MockRadio::new().with_file(
        paths::CONFIG_FILE,
        r#"{"version":1,"deviceId":"dev-1","scopeId":"0ne00ABC","DPSServer":"global.azure-devices-provisioning.net","modelId":"dtmi:test;1","SNTPServer":"time.example.org","timezone":-300,"WiFiSSID":"lab","WiFiPassword":"pw","WiFiSecurity":"wpa3"}"#,
    );

    let config = load_configuration(&mut radio).await.unwrap();

    assert_eq!(config.client_id, "dev-1");
    assert_eq!(config.endpoint_address, None);
    assert_eq!(config.sntp.server, "time.example.org");
    assert_eq!(config.sntp.timezone_minutes, -300);
    assert_eq!(config.wifi.ssid, "lab");
    assert_eq!(config.wifi.security, WifiSecurity::Wpa3);
    assert!(matches!(
        config.identity,
        CloudIdentity::Azure { ref scope_id, .. } if scope_id == "0ne00ABC"
    ));
}

#[tokio::test]
async fn test_device_config_error_classes() {
    let mut radio = MockRadio::new();
    let missing = load_configuration(&mut radio).await.unwrap_err();
    assert_eq!(missing, ConfigError::NotFound);
    assert!(GatewayError::from(missing).needs_configuration());

    let mut radio = MockRadio::new().with_file(paths::CONFIG_FILE, "{\"version\":0,");
    let malformed = load_configuration(&mut radio).await.unwrap_err();
    assert!(matches!(malformed, ConfigError::Parse(_)));
    assert!(matches!(
        GatewayError::from(malformed),
        GatewayError::ConfigParseError { .. }
    ));

    let oversized = format!(
        r#"{{"version":0,"clientId":"{}","mqttServer":"b","sntpServer":"s","timezone":0,"wifiSsid":"w","wifiKey":"k"}}"#,
        "x".repeat(600)
    );
    let mut radio = MockRadio::new().with_file(paths::CONFIG_FILE, &oversized);
    let too_large = load_configuration(&mut radio).await.unwrap_err();
    assert!(matches!(too_large, ConfigError::TooLarge(_)));
    assert!(GatewayError::from(too_large).needs_configuration());

    let mut radio = MockRadio::new().with_file(paths::CONFIG_FILE, r#"{"version":4}"#);
    let unsupported = load_configuration(&mut radio).await.unwrap_err();
    assert_eq!(unsupported, ConfigError::UnsupportedVersion(4));
}
