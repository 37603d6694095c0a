//! Observability for the gateway
//!
//! Structured logging through `tracing`, with span macros for the device
//! loop, MQTT operations and cloud exchanges.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, raise_level, LogFormat};

// Span macros for structured logging
pub use logging::{cloud_span, device_span, mqtt_span};
