//! rumqttc-backed host implementation of the radio module
//!
//! This module provides the radio the `sensor-gateway` binary drives on a
//! host, split so the pure decisions can be tested without a broker.
//!
//! # Architecture
//!
//! The module is split into four focused sub-modules:
//!
//! - [`connection`] - Pure option building, reconnect backoff and error classification
//! - [`message_handler`] - Pure rumqttc event routing
//! - [`health_monitor`] - Pure radio status transitions and reconnection decisions
//! - [`client`] - Impure I/O: the [`HostRadio`] transport
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensor_gateway::config::RadioSection;
//! use sensor_gateway::transport::mqtt::HostRadio;
//! use sensor_gateway::transport::{MqttSettings, Transport, WifiSettings};
//!
//! # tokio_test::block_on(async {
//! let mut radio = HostRadio::from_section(&RadioSection::default()).await?;
//! radio
//!     .connect_wifi(&WifiSettings { ssid: "office".to_string(), ..Default::default() })
//!     .await?;
//! radio
//!     .connect_mqtt(&MqttSettings::new("gateway-1", "localhost", 1883))
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::{HostRadio, RadioIdentity, RadioTimeouts};
pub use connection::{configure_mqtt_options, ReconnectConfig, TlsMaterial};
pub use health_monitor::{HealthMonitor, RadioEvent, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
