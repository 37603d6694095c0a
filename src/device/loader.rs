//! Device configuration loading
//!
//! The device configuration is one JSON document on the radio filesystem.
//! Its `version` field selects the platform and with it the set of field
//! names the rest of the document uses. Fields are looked up by name.

use crate::cloud::Platform;
use crate::transport::store::paths;
use crate::transport::{SntpSettings, Transport, TransportError, WifiSecurity, WifiSettings};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Largest configuration document the radio buffer accepts
pub const MAX_CONFIG_BYTES: usize = 512;

/// Configuration loading errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Configuration file not found")]
    NotFound,
    #[error("Configuration is {0} bytes, limit is {MAX_CONFIG_BYTES}")]
    TooLarge(usize),
    #[error("Malformed configuration: {0}")]
    Parse(String),
    #[error("Unsupported configuration version {0}")]
    UnsupportedVersion(i64),
}

/// Platform-specific identity fields
#[derive(Debug, Clone, PartialEq)]
pub enum CloudIdentity {
    Broker,
    Azure {
        scope_id: String,
        dps_server: String,
        model_id: String,
    },
    Aws,
    Kaa {
        token: String,
        app_version: String,
    },
}

/// Parsed device configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub platform: Platform,
    pub client_id: String,
    /// Broker, AWS or Kaa server; Azure resolves its hub through DPS
    pub endpoint_address: Option<String>,
    pub identity: CloudIdentity,
    pub sntp: SntpSettings,
    pub wifi: WifiSettings,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokerDocument {
    client_id: String,
    mqtt_server: String,
    sntp_server: String,
    timezone: i32,
    wifi_ssid: String,
    wifi_key: String,
    wifi_security_type: Option<SecurityField>,
}

#[derive(Deserialize)]
struct AzureDocument {
    #[serde(rename = "deviceId")]
    device_id: String,
    #[serde(rename = "scopeId")]
    scope_id: String,
    #[serde(rename = "DPSServer")]
    dps_server: String,
    #[serde(rename = "modelId")]
    model_id: String,
    #[serde(rename = "SNTPServer")]
    sntp_server: String,
    timezone: i32,
    #[serde(rename = "WiFiSSID")]
    wifi_ssid: String,
    #[serde(rename = "WiFiPassword")]
    wifi_password: String,
    #[serde(rename = "WiFiSecurity")]
    wifi_security: Option<SecurityField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwsDocument {
    client_id: String,
    endpoint_address: String,
    sntp_server: String,
    timezone: i32,
    wifi_ssid: String,
    wifi_key: String,
    wifi_security_type: Option<SecurityField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KaaDocument {
    token: String,
    app_version: String,
    mqtt_server: String,
    sntp_server: String,
    timezone: i32,
    wifi_ssid: String,
    wifi_key: String,
    wifi_security_type: Option<SecurityField>,
}

fn decode<T: DeserializeOwned>(document: Value) -> Result<T, ConfigError> {
    serde_json::from_value(document).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Security mode as written by the configuration pages: a code or a name
#[derive(Deserialize)]
#[serde(untagged)]
enum SecurityField {
    Code(u64),
    Name(String),
}

fn wifi_settings(
    ssid: String,
    key: String,
    security: Option<SecurityField>,
) -> Result<WifiSettings, ConfigError> {
    let security = match security {
        Some(SecurityField::Code(code)) => WifiSecurity::from_code(code)
            .ok_or_else(|| ConfigError::Parse(format!("unknown Wi-Fi security code {code}")))?,
        Some(SecurityField::Name(name)) => WifiSecurity::parse(&name)
            .ok_or_else(|| ConfigError::Parse(format!("unknown Wi-Fi security type '{name}'")))?,
        None => WifiSecurity::default(),
    };
    Ok(WifiSettings {
        ssid,
        security,
        key,
    })
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Parse(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Parse a configuration document (pure function)
pub fn parse_configuration(text: &str) -> Result<DeviceConfig, ConfigError> {
    if text.len() > MAX_CONFIG_BYTES {
        return Err(ConfigError::TooLarge(text.len()));
    }

    let document: Value =
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let version = document
        .get("version")
        .and_then(Value::as_i64)
        .ok_or_else(|| ConfigError::Parse("missing integer field 'version'".to_string()))?;
    let platform = Platform::from_version(version).ok_or(ConfigError::UnsupportedVersion(version))?;
    debug!(version, ?platform, "Decoding device configuration");

    let config = match platform {
        Platform::Broker => {
            let doc: BrokerDocument = decode(document)?;
            DeviceConfig {
                platform,
                client_id: doc.client_id,
                endpoint_address: Some(doc.mqtt_server),
                identity: CloudIdentity::Broker,
                sntp: SntpSettings {
                    server: doc.sntp_server,
                    timezone_minutes: doc.timezone,
                },
                wifi: wifi_settings(doc.wifi_ssid, doc.wifi_key, doc.wifi_security_type)?,
            }
        }
        Platform::Azure => {
            let doc: AzureDocument = decode(document)?;
            require_non_empty("scopeId", &doc.scope_id)?;
            require_non_empty("DPSServer", &doc.dps_server)?;
            DeviceConfig {
                platform,
                client_id: doc.device_id,
                endpoint_address: None,
                identity: CloudIdentity::Azure {
                    scope_id: doc.scope_id,
                    dps_server: doc.dps_server,
                    model_id: doc.model_id,
                },
                sntp: SntpSettings {
                    server: doc.sntp_server,
                    timezone_minutes: doc.timezone,
                },
                wifi: wifi_settings(doc.wifi_ssid, doc.wifi_password, doc.wifi_security)?,
            }
        }
        Platform::Aws => {
            let doc: AwsDocument = decode(document)?;
            DeviceConfig {
                platform,
                client_id: doc.client_id,
                endpoint_address: Some(doc.endpoint_address),
                identity: CloudIdentity::Aws,
                sntp: SntpSettings {
                    server: doc.sntp_server,
                    timezone_minutes: doc.timezone,
                },
                wifi: wifi_settings(doc.wifi_ssid, doc.wifi_key, doc.wifi_security_type)?,
            }
        }
        Platform::Kaa => {
            let doc: KaaDocument = decode(document)?;
            require_non_empty("token", &doc.token)?;
            DeviceConfig {
                platform,
                client_id: doc.token.clone(),
                endpoint_address: Some(doc.mqtt_server),
                identity: CloudIdentity::Kaa {
                    token: doc.token,
                    app_version: doc.app_version,
                },
                sntp: SntpSettings {
                    server: doc.sntp_server,
                    timezone_minutes: doc.timezone,
                },
                wifi: wifi_settings(doc.wifi_ssid, doc.wifi_key, doc.wifi_security_type)?,
            }
        }
    };

    require_non_empty("client id", &config.client_id)?;
    if let Some(endpoint) = &config.endpoint_address {
        require_non_empty("server address", endpoint)?;
    }
    Ok(config)
}

/// Read and parse the persisted configuration from the radio filesystem
pub async fn load_configuration(
    transport: &mut dyn Transport,
) -> Result<DeviceConfig, ConfigError> {
    if !transport.file_exists(paths::CONFIG_FILE).await {
        return Err(ConfigError::NotFound);
    }

    let text = match transport.read_file(paths::CONFIG_FILE).await {
        Ok(text) => text,
        Err(TransportError::FileNotFound(_)) => return Err(ConfigError::NotFound),
        Err(e) => return Err(ConfigError::Parse(e.to_string())),
    };

    let config = parse_configuration(&text)?;
    info!(
        platform = ?config.platform,
        client_id = %config.client_id,
        "Device configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRadio;

    const KAA_CONFIG: &str = r#"{"version":3,"token":"tok1","appVersion":"app-v1","mqttServer":"mqtt.cloud.kaaiot.com","sntpServer":"pool.ntp.org","timezone":60,"wifiSsid":"office","wifiKey":"secret","wifiSecurityType":"WPA2"}"#;

    #[test]
    fn test_parse_kaa_configuration() {
        let config = parse_configuration(KAA_CONFIG).unwrap();
        assert_eq!(config.platform, Platform::Kaa);
        assert_eq!(config.client_id, "tok1");
        assert_eq!(
            config.endpoint_address.as_deref(),
            Some("mqtt.cloud.kaaiot.com")
        );
        assert_eq!(
            config.identity,
            CloudIdentity::Kaa {
                token: "tok1".to_string(),
                app_version: "app-v1".to_string()
            }
        );
        assert_eq!(config.sntp.timezone_minutes, 60);
        assert_eq!(config.wifi.security, WifiSecurity::WpaWpa2);
    }

    #[test]
    fn test_parse_azure_configuration() {
        let text = r#"{"version":1,"deviceId":"dev-1","scopeId":"0ne00ABC","DPSServer":"global.azure-devices-provisioning.net","modelId":"dtmi:test;1","SNTPServer":"pool.ntp.org","timezone":0,"WiFiSSID":"lab","WiFiPassword":"pw","WiFiSecurity":"wpa3"}"#;
        let config = parse_configuration(text).unwrap();
        assert_eq!(config.platform, Platform::Azure);
        assert_eq!(config.endpoint_address, None);
        assert_eq!(config.wifi.security, WifiSecurity::Wpa3);
        assert!(matches!(
            config.identity,
            CloudIdentity::Azure { ref scope_id, .. } if scope_id == "0ne00ABC"
        ));
    }

    #[test]
    fn test_numeric_security_codes() {
        let numeric = KAA_CONFIG.replace(r#""WPA2""#, "3");
        let config = parse_configuration(&numeric).unwrap();
        assert_eq!(config.wifi.security, WifiSecurity::WpaWpa2);

        let quoted = KAA_CONFIG.replace(r#""WPA2""#, r#""3""#);
        let config = parse_configuration(&quoted).unwrap();
        assert_eq!(config.wifi.security, WifiSecurity::WpaWpa2);

        let open = KAA_CONFIG.replace(r#""WPA2""#, "0");
        assert_eq!(parse_configuration(&open).unwrap().wifi.security, WifiSecurity::Open);
        let wpa3 = KAA_CONFIG.replace(r#""WPA2""#, "5");
        assert_eq!(parse_configuration(&wpa3).unwrap().wifi.security, WifiSecurity::Wpa3);

        let unknown = KAA_CONFIG.replace(r#""WPA2""#, "9");
        assert!(matches!(parse_configuration(&unknown), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let text = r#"{"wifiKey":"k","wifiSsid":"s","timezone":0,"sntpServer":"pool.ntp.org","mqttServer":"broker.local","clientId":"gw-1","version":0}"#;
        let config = parse_configuration(text).unwrap();
        assert_eq!(config.platform, Platform::Broker);
        assert_eq!(config.wifi.security, WifiSecurity::WpaWpa2);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_configuration("{not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            parse_configuration(r#"{"clientId":"x"}"#),
            Err(ConfigError::Parse(_))
        ));
        // Missing required field for the selected version
        assert!(matches!(
            parse_configuration(r#"{"version":2,"clientId":"x"}"#),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            parse_configuration(r#"{"version":9}"#),
            Err(ConfigError::UnsupportedVersion(9))
        );
        assert_eq!(
            parse_configuration(r#"{"version":-1}"#),
            Err(ConfigError::UnsupportedVersion(-1))
        );
    }

    #[test]
    fn test_too_large_rejected() {
        let text = format!(r#"{{"version":0,"clientId":"{}"}}"#, "x".repeat(600));
        assert!(matches!(
            parse_configuration(&text),
            Err(ConfigError::TooLarge(_))
        ));
    }

    #[test]
    fn test_unknown_wifi_security() {
        let text = KAA_CONFIG.replace("WPA2", "enterprise");
        assert!(matches!(
            parse_configuration(&text),
            Err(ConfigError::Parse(message)) if message.contains("enterprise")
        ));
    }

    #[tokio::test]
    async fn test_load_from_transport() {
        let mut radio = MockRadio::new();
        assert_eq!(
            load_configuration(&mut radio).await,
            Err(ConfigError::NotFound)
        );

        let mut radio = MockRadio::new().with_file(paths::CONFIG_FILE, KAA_CONFIG);
        let config = load_configuration(&mut radio).await.unwrap();
        assert_eq!(config.platform, Platform::Kaa);
    }
}
