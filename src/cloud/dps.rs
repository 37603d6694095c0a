//! Azure Device Provisioning Service handshake
//!
//! Registers the device with DPS over MQTT and polls the operation until the
//! service assigns an IoT hub. The assigned hub is persisted to
//! `user/endPointAddr` so later boots skip this step.

use super::azure::AzureAdapter;
use super::ensure_certificates;
use super::topics::DPS_RESPONSE;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::settings::MQTT_PORT_SECURE;
use crate::transport::store::paths;
use crate::transport::{
    connect_with_ca_fallback, InboundMessage, MqttSettings, QoS, Subscription, TlsSettings,
    Transport,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// DPS MQTT API version
pub const DPS_API_VERSION: &str = "2021-06-01";

/// Delay used when the service gives no usable retry-after hint
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Operation handle returned by the registration request
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningToken {
    pub operation_id: String,
    /// Seconds, from the `retry-after` topic parameter
    pub retry_after: Option<u64>,
}

/// Wait before the next status request: the hint when `1 < hint < 10`, else 5 s
pub fn retry_delay(hint: Option<u64>) -> Duration {
    match hint {
        Some(secs) if secs > 1 && secs < 10 => Duration::from_secs(secs),
        _ => DEFAULT_RETRY_DELAY,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationState {
    assigned_hub: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationBody {
    operation_id: Option<String>,
    status: Option<String>,
    registration_state: Option<RegistrationState>,
}

/// One parsed DPS response
#[derive(Debug)]
struct DpsResponse {
    code: u16,
    retry_after: Option<u64>,
    body: OperationBody,
}

/// What a response means for the handshake
#[derive(Debug, PartialEq)]
enum Progress {
    Assigned(String),
    Pending(ProvisioningToken),
}

fn parse_response(message: &InboundMessage) -> GatewayResult<DpsResponse> {
    let matched = DPS_RESPONSE.matches(&message.topic).ok_or_else(|| {
        GatewayError::provisioning_failure(format!("unexpected topic {}", message.topic))
    })?;
    let code = matched
        .field("status")
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| GatewayError::provisioning_failure("response without status code"))?;
    let retry_after = matched.query("retry-after").and_then(|s| s.parse().ok());
    let body: OperationBody = serde_json::from_slice(&message.payload)
        .map_err(|e| GatewayError::provisioning_failure(format!("malformed response: {e}")))?;

    Ok(DpsResponse {
        code,
        retry_after,
        body,
    })
}

fn evaluate(response: DpsResponse, previous: Option<&ProvisioningToken>) -> GatewayResult<Progress> {
    if response.code >= 300 {
        return Err(GatewayError::provisioning_failure(format!(
            "service answered {}",
            response.code
        )));
    }

    match response.body.status.as_deref() {
        Some("assigned") => response
            .body
            .registration_state
            .and_then(|state| state.assigned_hub)
            .filter(|hub| !hub.is_empty())
            .map(Progress::Assigned)
            .ok_or_else(|| GatewayError::provisioning_failure("assigned without hub")),
        Some("failed") => {
            let reason = response
                .body
                .registration_state
                .and_then(|state| state.error_message)
                .unwrap_or_else(|| "registration failed".to_string());
            Err(GatewayError::provisioning_failure(reason))
        }
        _ => {
            let operation_id = response
                .body
                .operation_id
                .or_else(|| previous.map(|token| token.operation_id.clone()))
                .ok_or_else(|| GatewayError::provisioning_failure("response without operationId"))?;
            Ok(Progress::Pending(ProvisioningToken {
                operation_id,
                retry_after: response.retry_after,
            }))
        }
    }
}

/// MQTT settings for the DPS endpoint
pub fn dps_settings(adapter: &AzureAdapter) -> MqttSettings {
    let mut settings = MqttSettings::new(
        adapter.device_id().to_string(),
        adapter.dps_server().to_string(),
        MQTT_PORT_SECURE,
    );
    settings.username = Some(format!(
        "{}/registrations/{}/api-version={}&model-id={}",
        adapter.scope_id(),
        adapter.device_id(),
        DPS_API_VERSION,
        adapter.model_id()
    ));
    settings.tls = Some(TlsSettings::mutual_tls());
    settings
}

/// Run the registration handshake and persist the assigned hub
pub async fn provision(
    transport: &mut dyn Transport,
    adapter: &mut AzureAdapter,
    max_status_polls: u32,
) -> GatewayResult<String> {
    let result = run_handshake(transport, adapter, max_status_polls).await;
    transport.disconnect_mqtt().await;

    let hub = result?;
    if !transport.write_file(paths::ENDPOINT, &hub).await {
        return Err(GatewayError::provisioning_failure(format!(
            "could not persist {}",
            paths::ENDPOINT
        )));
    }
    info!(hub = %hub, "IoT hub assigned");
    Ok(hub)
}

async fn run_handshake(
    transport: &mut dyn Transport,
    adapter: &mut AzureAdapter,
    max_status_polls: u32,
) -> GatewayResult<String> {
    let mut settings = dps_settings(adapter);
    if let Some(tls) = &settings.tls {
        ensure_certificates(transport, tls).await?;
    }

    connect_with_ca_fallback(transport, &mut settings).await?;

    let subscription = Subscription::new("$dps/registrations/res/#", QoS::AtLeastOnce);
    if !transport.subscribe(&[subscription]).await {
        return Err(GatewayError::provisioning_failure(
            "could not subscribe to DPS responses",
        ));
    }

    let register_topic = format!(
        "$dps/registrations/PUT/iotdps-register/?$rid={}",
        adapter.next_request_id()
    );
    let request = json!({
        "registrationId": adapter.device_id(),
        "payload": { "modelId": adapter.model_id() },
    });
    if !transport
        .publish(
            &register_topic,
            request.to_string().as_bytes(),
            QoS::AtLeastOnce,
            false,
        )
        .await
    {
        return Err(GatewayError::publish_failure(register_topic));
    }

    let response = transport
        .get_message(true)
        .await
        .ok_or_else(|| GatewayError::transport_timeout("DPS registration response"))?;
    let mut token = match evaluate(parse_response(&response)?, None)? {
        Progress::Assigned(hub) => return Ok(hub),
        Progress::Pending(token) => token,
    };
    debug!(operation_id = %token.operation_id, "Registration accepted");

    for poll in 1..=max_status_polls {
        tokio::time::sleep(retry_delay(token.retry_after)).await;

        let status_topic = format!(
            "$dps/registrations/GET/iotdps-get-operationstatus/?$rid={}&operationId={}",
            adapter.next_request_id(),
            token.operation_id
        );
        if !transport
            .publish(&status_topic, b"", QoS::AtLeastOnce, false)
            .await
        {
            warn!(poll, "Status request publish failed");
            continue;
        }

        let Some(response) = transport.get_message(true).await else {
            warn!(poll, "No operation status received");
            continue;
        };
        match evaluate(parse_response(&response)?, Some(&token))? {
            Progress::Assigned(hub) => return Ok(hub),
            Progress::Pending(next) => {
                debug!(poll, retry_after = ?next.retry_after, "Registration still assigning");
                token = next;
            }
        }
    }

    Err(GatewayError::provisioning_failure(format!(
        "no assignment after {max_status_polls} status requests"
    )))
}
