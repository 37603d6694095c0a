//! Sensor Gateway - Rust Implementation
//!
//! Firmware core for an IoT sensor board that talks to the cloud through a
//! Wi-Fi radio module. The radio is driven through the [`transport::Transport`]
//! trait; the device logic runs as a single state machine in
//! [`device::Device`].
//!
//! # Overview
//!
//! - Configuration loading from the radio filesystem (`user/devconf`)
//! - Cloud adapters for a plain MQTT broker, Azure IoT (with DPS provisioning),
//!   AWS IoT Core and KaaIoT
//! - Periodic telemetry, cloud commands and device twin handling
//! - A host radio built on rumqttc and a local directory standing in for the
//!   radio filesystem
//!
//! # Quick Start
//!
//! ```rust
//! use sensor_gateway::device::parse_configuration;
//! use sensor_gateway::cloud::{CloudAdapter, Platform};
//! use sensor_gateway::transport::MqttSettings;
//!
//! let config = parse_configuration(
//!     r#"{"version":0,"clientId":"gw-1","mqttServer":"broker.local",
//!         "sntpServer":"pool.ntp.org","timezone":60,"wifiSsid":"office","wifiKey":"secret"}"#,
//! )
//! .unwrap();
//!
//! let mut settings = MqttSettings::default();
//! let adapter = CloudAdapter::from_config(&config, &mut settings).unwrap();
//! assert_eq!(adapter.platform(), Platform::Broker);
//! assert_eq!(adapter.telemetry_topic(), "gateway/gw-1/telemetry");
//! assert_eq!(settings.port, 1883);
//! ```

pub mod cloud;
pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod peripherals;
pub mod testing;
pub mod transport;

pub use cloud::{CloudAdapter, CloudPlatform, Platform, TelemetryInterval};
pub use config::{GatewayConfig, SettingsError};
pub use device::{Device, DeviceState, Peripherals, TickOutcome};
pub use error::{GatewayError, GatewayResult};
pub use transport::mqtt::HostRadio;
pub use transport::{RadioStatus, Transport, TransportError};
