//! Pure event routing for the host MQTT session
//!
//! This module contains pure functions that map rumqttc events onto routing
//! decisions for the event loop task.

use crate::transport::{InboundMessage, Subscription};
use rumqttc::{ConnectReturnCode, Event, Packet, SubscribeFilter, SubscribeReasonCode};
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    accepted: connack.code == ConnectReturnCode::Success,
                    code: connack.code,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage::new(
                    publish.topic.clone(),
                    publish.payload.to_vec(),
                )),
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    accepted: Self::validate_subscription_success(&suback.return_codes).is_ok(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Convert radio subscriptions into rumqttc filters (pure function)
    pub fn build_subscribe_filters(subscriptions: &[Subscription]) -> Vec<SubscribeFilter> {
        subscriptions
            .iter()
            .map(|s| SubscribeFilter::new(s.topic.clone(), s.qos))
            .collect()
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), String> {
        if return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(format!(
                "Subscription failed with return codes: {return_codes:?}"
            ))
        } else {
            debug!("Subscription accepted: {:?}", return_codes);
            Ok(())
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// ConnAck received; `accepted` is false when the broker refused the session
    ConnectionAcknowledged {
        accepted: bool,
        code: ConnectReturnCode,
    },
    /// Message received on a subscribed topic
    MessageReceived(InboundMessage),
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16, accepted: bool },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
