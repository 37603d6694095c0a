//! Radio connection parameters
//!
//! Cloud adapters prime these at configuration load time; the transport only
//! consumes them.

use super::store::paths;
use std::fmt;

/// Plain MQTT port
pub const MQTT_PORT_UNSECURE: u16 = 1883;

/// MQTT over TLS port
pub const MQTT_PORT_SECURE: u16 = 8883;

/// Wi-Fi security mode, numbered as the radio's configuration pages number it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WifiSecurity {
    Open,
    Wep,
    WepShared,
    #[default]
    WpaWpa2,
    Wpa2Plus,
    Wpa3,
}

impl WifiSecurity {
    /// Map a numeric security code (0..=5)
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(WifiSecurity::Open),
            1 => Some(WifiSecurity::Wep),
            2 => Some(WifiSecurity::WepShared),
            3 => Some(WifiSecurity::WpaWpa2),
            4 => Some(WifiSecurity::Wpa2Plus),
            5 => Some(WifiSecurity::Wpa3),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            WifiSecurity::Open => 0,
            WifiSecurity::Wep => 1,
            WifiSecurity::WepShared => 2,
            WifiSecurity::WpaWpa2 => 3,
            WifiSecurity::Wpa2Plus => 4,
            WifiSecurity::Wpa3 => 5,
        }
    }

    /// Parse a security mode name or a decimal code (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if let Ok(code) = value.parse::<u64>() {
            return Self::from_code(code);
        }
        match value.as_str() {
            "open" | "none" => Some(WifiSecurity::Open),
            "wep" => Some(WifiSecurity::Wep),
            "wep_shared" | "wep-shared" => Some(WifiSecurity::WepShared),
            "wpa" | "wpa2" | "wpa_wpa2" | "wpa/wpa2" => Some(WifiSecurity::WpaWpa2),
            "wpa2_plus" | "wpa2+" => Some(WifiSecurity::Wpa2Plus),
            "wpa3" => Some(WifiSecurity::Wpa3),
            _ => None,
        }
    }
}

/// Wi-Fi station settings
#[derive(Clone, PartialEq, Default)]
pub struct WifiSettings {
    pub ssid: String,
    pub security: WifiSecurity,
    pub key: String,
}

impl fmt::Debug for WifiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiSettings")
            .field("ssid", &self.ssid)
            .field("security", &self.security)
            .field("key", &"***")
            .finish()
    }
}

/// Time synchronisation settings
#[derive(Debug, Clone, PartialEq)]
pub struct SntpSettings {
    pub server: String,
    /// Offset from UTC in minutes
    pub timezone_minutes: i32,
}

impl Default for SntpSettings {
    fn default() -> Self {
        Self {
            server: "pool.ntp.org".to_string(),
            timezone_minutes: 0,
        }
    }
}

/// TLS protocol version offered by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMethod {
    #[default]
    TlsV1_2,
}

/// Cipher suite offered by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherSuite {
    #[default]
    RsaWithAes256CbcSha256,
}

/// MQTT protocol revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    V3_1_1,
}

/// TLS parameters; certificate material is referenced by radio file path
#[derive(Debug, Clone, PartialEq)]
pub struct TlsSettings {
    pub method: SecurityMethod,
    pub cipher: CipherSuite,
    pub ca_file: String,
    /// Alternate root CA tried once when the server rejects `ca_file`
    pub fallback_ca_file: Option<String>,
    pub certificate_file: Option<String>,
    pub private_key_file: Option<String>,
}

impl TlsSettings {
    /// TLS 1.2 with client certificate, primary and fallback root CA
    pub fn mutual_tls() -> Self {
        Self {
            method: SecurityMethod::TlsV1_2,
            cipher: CipherSuite::RsaWithAes256CbcSha256,
            ca_file: paths::ROOT_CA.to_string(),
            fallback_ca_file: Some(paths::FALLBACK_ROOT_CA.to_string()),
            certificate_file: Some(paths::DEVICE_CERT.to_string()),
            private_key_file: Some(paths::DEVICE_KEY.to_string()),
        }
    }

    /// Client credential files that must exist before connecting
    pub fn client_files(&self) -> Vec<&str> {
        self.certificate_file
            .iter()
            .chain(self.private_key_file.iter())
            .map(String::as_str)
            .collect()
    }

    /// Exchange the active and alternate CA paths; false without an alternate
    pub fn swap_ca_files(&mut self) -> bool {
        match self.fallback_ca_file.as_mut() {
            Some(fallback) => {
                std::mem::swap(&mut self.ca_file, fallback);
                true
            }
            None => false,
        }
    }

    /// Root CA candidates in the order they are tried
    pub fn ca_candidates(&self) -> Vec<&str> {
        std::iter::once(self.ca_file.as_str())
            .chain(self.fallback_ca_file.as_deref())
            .collect()
    }
}

/// MQTT session settings
#[derive(Clone, PartialEq)]
pub struct MqttSettings {
    pub client_id: String,
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: ProtocolVersion,
    pub keep_alive_secs: u16,
    pub tls: Option<TlsSettings>,
}

impl MqttSettings {
    pub fn new<C: Into<String>, A: Into<String>>(client_id: C, address: A, port: u16) -> Self {
        Self {
            client_id: client_id.into(),
            address: address.into(),
            port,
            username: None,
            password: None,
            protocol: ProtocolVersion::V3_1_1,
            keep_alive_secs: 60,
            tls: None,
        }
    }

    /// Whether the session runs over TLS
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self::new("", "", MQTT_PORT_UNSECURE)
    }
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("client_id", &self.client_id)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("protocol", &self.protocol)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("tls", &self.tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wifi_security_parse() {
        assert_eq!(WifiSecurity::parse("WPA2"), Some(WifiSecurity::WpaWpa2));
        assert_eq!(WifiSecurity::parse(" open "), Some(WifiSecurity::Open));
        assert_eq!(WifiSecurity::parse("wpa3"), Some(WifiSecurity::Wpa3));
        assert_eq!(WifiSecurity::parse("enterprise"), None);
        assert_eq!(WifiSecurity::parse("3"), Some(WifiSecurity::WpaWpa2));
        assert_eq!(WifiSecurity::parse("6"), None);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let wifi = WifiSettings {
            ssid: "office".to_string(),
            security: WifiSecurity::WpaWpa2,
            key: "hunter2".to_string(),
        };
        assert!(!format!("{wifi:?}").contains("hunter2"));

        let mut mqtt = MqttSettings::new("dev", "broker", MQTT_PORT_UNSECURE);
        mqtt.password = Some("s3cret".to_string());
        assert!(!format!("{mqtt:?}").contains("s3cret"));
    }

    #[test]
    fn test_mutual_tls_profile() {
        let tls = TlsSettings::mutual_tls();
        assert_eq!(tls.method, SecurityMethod::TlsV1_2);
        assert_eq!(tls.cipher, CipherSuite::RsaWithAes256CbcSha256);
        assert_eq!(tls.ca_candidates(), vec!["user/rootca1", "user/rootca"]);
        assert_eq!(tls.client_files(), vec!["user/devcert", "user/devkey"]);
    }

    #[test]
    fn test_settings_default_is_plain_mqtt() {
        let settings = MqttSettings::default();
        assert!(!settings.is_secure());
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.protocol, ProtocolVersion::V3_1_1);
    }
}
