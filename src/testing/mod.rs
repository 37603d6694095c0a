//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the gateway core
//! without a radio module, an MQTT broker or sensor hardware.

pub mod mocks;

pub use mocks::*;
