//! Pure radio status transitions and reconnection decisions
//!
//! This module contains pure functions for radio status tracking and
//! reconnection decision making. Both the host radio and the mock radio
//! drive their [`RadioStatus`] through [`HealthMonitor::determine_next_status`]
//! so the `MqttConnected`-only-after-`WlanConnected` invariant holds
//! everywhere.

use super::connection::ReconnectConfig;
use crate::transport::RadioStatus;
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if another connection attempt should be made (pure function)
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
    ) -> ReconnectionDecision {
        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let backoff_delay = config.calculate_backoff_delay(current_attempts + 1);
        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay_ms: backoff_delay,
        }
    }

    /// Determine next radio status after an event (pure function)
    pub fn determine_next_status(current: RadioStatus, event: RadioEvent) -> RadioStatus {
        use RadioStatus::*;

        match event {
            RadioEvent::WifiConnected => WlanConnected,
            RadioEvent::WifiDisconnected => Disconnected,
            RadioEvent::MqttConnectStarted => match current {
                WlanConnected | MqttConnecting | MqttConnected | MqttWrongRootCa => MqttConnecting,
                other => other,
            },
            RadioEvent::ConnAckReceived => match current {
                MqttConnecting => MqttConnected,
                other => other,
            },
            RadioEvent::CertificateRejected => match current {
                MqttConnecting => MqttWrongRootCa,
                other => other,
            },
            RadioEvent::MqttDisconnected => match current {
                MqttConnecting | MqttConnected | MqttWrongRootCa => WlanConnected,
                other => other,
            },
            RadioEvent::ProvisioningStarted => Provisioning,
            RadioEvent::Fault => Error,
        }
    }

    /// Log radio status transition (pure logging function)
    pub fn log_status_transition(from: RadioStatus, to: RadioStatus) {
        match (from, to) {
            (RadioStatus::MqttConnecting, RadioStatus::MqttConnected) => {
                info!("MQTT session established");
            }
            (RadioStatus::MqttConnected, RadioStatus::WlanConnected) => {
                warn!("MQTT session closed");
            }
            (_, RadioStatus::MqttWrongRootCa) => {
                warn!("Server certificate rejected by root CA");
            }
            (_, RadioStatus::Error) => {
                error!("Radio entered error status");
            }
            _ if from != to => {
                info!("Radio status: {:?} -> {:?}", from, to);
            }
            _ => {}
        }
    }

    /// Validate reconnection configuration (pure function)
    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if let Some(max_attempts) = config.max_attempts {
            if max_attempts == 0 {
                return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
            }
        }

        if config.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Decision result for connection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with another attempt after the delay
    Proceed { attempt: u32, delay_ms: u64 },
    /// Give up - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Radio events that trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadioEvent {
    WifiConnected,
    WifiDisconnected,
    MqttConnectStarted,
    ConnAckReceived,
    CertificateRejected,
    MqttDisconnected,
    ProvisioningStarted,
    Fault,
}
