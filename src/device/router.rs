//! Inbound cloud message routing
//!
//! At most one message is taken from the radio per Idle tick. Payloads that
//! are not UTF-8 JSON are dropped; a bad message never stops the device.

use crate::cloud::{CloudAdapter, DispatchContext};
use serde_json::Value;
use tracing::debug;

/// Result of one routing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No message waiting
    Idle,
    /// Message discarded before dispatch
    Dropped,
    /// Message handed to the adapter
    Dispatched,
}

/// Fetch one message without blocking and dispatch it to the adapter
pub async fn route_one(adapter: &mut CloudAdapter, ctx: &mut DispatchContext<'_>) -> RouteOutcome {
    let Some(message) = ctx.transport.get_message(false).await else {
        return RouteOutcome::Idle;
    };

    let text = match std::str::from_utf8(&message.payload) {
        Ok(text) => text,
        Err(e) => {
            debug!(topic = %message.topic, "Dropping non UTF-8 payload: {}", e);
            return RouteOutcome::Dropped;
        }
    };
    let body: Value = match serde_json::from_str(text) {
        Ok(body) => body,
        Err(e) => {
            debug!(topic = %message.topic, "Dropping malformed JSON: {}", e);
            return RouteOutcome::Dropped;
        }
    };

    debug!(topic = %message.topic, "Dispatching cloud message");
    adapter.process_message(&message, &body, ctx).await;
    RouteOutcome::Dispatched
}
