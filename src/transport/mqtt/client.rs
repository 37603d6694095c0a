//! Impure I/O for the host radio
//!
//! [`HostRadio`] plays the radio module's role when the gateway runs on a
//! host: the MQTT session is a rumqttc client whose event loop runs on its own
//! task, and the radio filesystem is a [`FileStore`] directory. The event loop
//! task owns nothing the device reads directly; it hands inbound publishes
//! over an `mpsc` channel and session health over a `watch` channel.

use super::connection::{classify_connection_error, configure_mqtt_options, TlsMaterial};
use super::health_monitor::{HealthMonitor, RadioEvent};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::RadioSection;
use crate::transport::store::{paths, FileStore};
use crate::transport::{
    InboundMessage, MqttSettings, QoS, RadioStatus, SntpSettings, Subscription, Transport,
    TransportError, WifiSettings,
};
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use rumqttc::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounded queue between the event loop task and the device tick
const INBOUND_CAPACITY: usize = 16;

/// Identity the host radio reports
#[derive(Debug, Clone, PartialEq)]
pub struct RadioIdentity {
    pub firmware_version: String,
    pub mac_address: String,
    pub udid: String,
}

/// Timeouts bounding each blocking radio call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioTimeouts {
    /// Wait used by blocking `get_message`
    pub response: Duration,
    /// Wait used by non-blocking `get_message`
    pub poll: Duration,
    /// Wait for ConnAck
    pub connect: Duration,
}

impl RadioTimeouts {
    pub fn from_section(section: &RadioSection) -> Self {
        Self {
            response: Duration::from_millis(section.response_timeout_ms),
            poll: Duration::from_millis(section.poll_timeout_ms),
            connect: Duration::from_millis(section.connect_timeout_ms),
        }
    }
}

/// Live MQTT session state
struct Session {
    client: AsyncClient,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    health_rx: watch::Receiver<RadioStatus>,
    event_loop_handle: JoinHandle<()>,
}

/// Host implementation of the radio transport
pub struct HostRadio {
    store: FileStore,
    identity: RadioIdentity,
    timeouts: RadioTimeouts,
    status: RadioStatus,
    session: Option<Session>,
}

impl HostRadio {
    pub fn new(store: FileStore, identity: RadioIdentity, timeouts: RadioTimeouts) -> Self {
        Self {
            store,
            identity,
            timeouts,
            status: RadioStatus::Disconnected,
            session: None,
        }
    }

    /// Build a radio from the host configuration, creating a persistent UDID on first use
    pub async fn from_section(section: &RadioSection) -> Result<Self, TransportError> {
        let store = FileStore::new(&section.store_dir);
        let udid = match &section.udid {
            Some(udid) => udid.clone(),
            None => Self::load_or_create_udid(&store).await?,
        };

        let identity = RadioIdentity {
            firmware_version: section.firmware_version.clone(),
            mac_address: section.mac_address.clone(),
            udid,
        };
        Ok(Self::new(
            store,
            identity,
            RadioTimeouts::from_section(section),
        ))
    }

    async fn load_or_create_udid(store: &FileStore) -> Result<String, TransportError> {
        match store.read(paths::UDID).await {
            Ok(udid) if !udid.trim().is_empty() => Ok(udid.trim().to_string()),
            Ok(_) | Err(TransportError::FileNotFound(_)) => {
                let udid = uuid::Uuid::new_v4().simple().to_string();
                store.write(paths::UDID, &udid).await?;
                info!(udid = %udid, "Generated radio UDID");
                Ok(udid)
            }
            Err(e) => Err(e),
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    fn apply(&mut self, event: RadioEvent) {
        let next = HealthMonitor::determine_next_status(self.status, event);
        HealthMonitor::log_status_transition(self.status, next);
        self.status = next;
    }

    /// Read the certificate files the TLS settings reference
    async fn load_tls_material(
        &self,
        settings: &MqttSettings,
    ) -> Result<Option<TlsMaterial>, TransportError> {
        let Some(tls) = &settings.tls else {
            return Ok(None);
        };

        let ca = self.store.read_bytes(&tls.ca_file).await?;
        let client_auth = match (&tls.certificate_file, &tls.private_key_file) {
            (Some(cert), Some(key)) => Some((
                self.store.read_bytes(cert).await?,
                self.store.read_bytes(key).await?,
            )),
            _ => None,
        };
        Ok(Some(TlsMaterial { ca, client_auth }))
    }

    /// Poll the fresh event loop until the broker answers the CONNECT
    async fn await_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged { accepted: true, .. } => return Ok(()),
                    EventRoute::ConnectionAcknowledged {
                        accepted: false,
                        code,
                    } => {
                        return Err(TransportError::ConnectionRefused(format!("{code:?}")));
                    }
                    _ => continue,
                },
                Err(e) => return Err(classify_connection_error(&e)),
            }
        }
    }

    /// Drive the event loop for an established session
    async fn run_event_loop(
        mut event_loop: EventLoop,
        inbound_tx: mpsc::Sender<InboundMessage>,
        health_tx: watch::Sender<RadioStatus>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::MessageReceived(message) => {
                        debug!(topic = %message.topic, "MQTT message received");
                        if let Err(e) = inbound_tx.try_send(message) {
                            warn!("Dropping inbound message, device queue unavailable: {}", e);
                        }
                    }
                    EventRoute::SubscriptionConfirmed {
                        packet_id,
                        accepted,
                    } => {
                        if !accepted {
                            warn!(packet_id, "Broker rejected subscription");
                        }
                    }
                    EventRoute::Disconnected => {
                        warn!("Broker closed the MQTT session");
                        let _ = health_tx.send(RadioStatus::Error);
                        break;
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("MQTT event loop error: {}", e);
                    let _ = health_tx.send(RadioStatus::Error);
                    break;
                }
            }
        }
    }

    async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.client.try_disconnect() {
                debug!("MQTT disconnect request failed: {}", e);
            }
            session.event_loop_handle.abort();
        }
    }
}

#[async_trait]
impl Transport for HostRadio {
    async fn status(&self) -> RadioStatus {
        match &self.session {
            Some(session) if self.status == RadioStatus::MqttConnected => {
                *session.health_rx.borrow()
            }
            _ => self.status,
        }
    }

    async fn mark_error(&mut self) {
        self.apply(RadioEvent::Fault);
    }

    async fn firmware_version(&self) -> String {
        self.identity.firmware_version.clone()
    }

    async fn mac_address(&self) -> String {
        self.identity.mac_address.clone()
    }

    async fn udid(&self) -> String {
        self.identity.udid.clone()
    }

    async fn connect_wifi(&mut self, wifi: &WifiSettings) -> Result<(), TransportError> {
        if wifi.ssid.is_empty() {
            return Err(TransportError::ConnectionRefused("empty SSID".to_string()));
        }
        // The host is already on a network; joining only validates the settings
        info!(
            ssid = %wifi.ssid,
            security = ?wifi.security,
            security_code = wifi.security.code(),
            "Wi-Fi connected"
        );
        self.apply(RadioEvent::WifiConnected);
        Ok(())
    }

    async fn disconnect_wifi(&mut self) {
        self.close_session().await;
        self.apply(RadioEvent::WifiDisconnected);
    }

    async fn configure_sntp(&mut self, sntp: &SntpSettings) -> bool {
        let Some(offset) = FixedOffset::east_opt(sntp.timezone_minutes * 60) else {
            warn!(
                timezone_minutes = sntp.timezone_minutes,
                "Timezone offset out of range"
            );
            return false;
        };
        let local = Utc::now().with_timezone(&offset);
        info!(server = %sntp.server, local_time = %local.format("%Y-%m-%d %H:%M:%S %:z"), "Time synchronised");
        true
    }

    async fn start_provisioning_ap(&mut self) -> bool {
        self.close_session().await;
        self.apply(RadioEvent::ProvisioningStarted);
        info!(
            store = %self.store.root().display(),
            "Provisioning mode active; upload a device configuration and restart"
        );
        true
    }

    async fn connect_mqtt(&mut self, settings: &MqttSettings) -> Result<(), TransportError> {
        if !matches!(
            self.status,
            RadioStatus::WlanConnected
                | RadioStatus::MqttConnecting
                | RadioStatus::MqttConnected
                | RadioStatus::MqttWrongRootCa
        ) {
            return Err(TransportError::NotConnected);
        }
        if self.session.is_some() {
            self.close_session().await;
            self.apply(RadioEvent::MqttDisconnected);
        }

        let tls = self.load_tls_material(settings).await?;
        let options = configure_mqtt_options(settings, tls)?;

        self.apply(RadioEvent::MqttConnectStarted);
        info!(
            server = %settings.address,
            port = settings.port,
            client_id = %settings.client_id,
            secure = settings.is_secure(),
            "Connecting MQTT session"
        );

        let (client, mut event_loop) = AsyncClient::new(options, INBOUND_CAPACITY);
        let outcome =
            tokio::time::timeout(self.timeouts.connect, Self::await_connack(&mut event_loop))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout("mqtt connect".to_string())));

        match outcome {
            Ok(()) => {
                self.apply(RadioEvent::ConnAckReceived);
                let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
                let (health_tx, health_rx) = watch::channel(RadioStatus::MqttConnected);
                let event_loop_handle =
                    tokio::spawn(Self::run_event_loop(event_loop, inbound_tx, health_tx));
                self.session = Some(Session {
                    client,
                    inbound_rx,
                    health_rx,
                    event_loop_handle,
                });
                Ok(())
            }
            Err(TransportError::WrongRootCa) => {
                self.apply(RadioEvent::CertificateRejected);
                Err(TransportError::WrongRootCa)
            }
            Err(e) => {
                warn!("MQTT connect failed: {}", e);
                self.apply(RadioEvent::MqttDisconnected);
                Err(e)
            }
        }
    }

    async fn disconnect_mqtt(&mut self) {
        self.close_session().await;
        self.apply(RadioEvent::MqttDisconnected);
    }

    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let filters = MessageHandler::build_subscribe_filters(subscriptions);
        match session.client.subscribe_many(filters).await {
            Ok(()) => {
                for subscription in subscriptions {
                    info!(topic = %subscription.topic, qos = ?subscription.qos, "Subscribed");
                }
                true
            }
            Err(e) => {
                warn!("Subscribe request failed: {}", e);
                false
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        match session
            .client
            .publish(topic, qos, retain, payload.to_vec())
            .await
        {
            Ok(()) => {
                debug!(topic = %topic, bytes = payload.len(), "Published");
                true
            }
            Err(e) => {
                warn!(topic = %topic, "Publish failed: {}", e);
                false
            }
        }
    }

    async fn get_message(&mut self, blocking: bool) -> Option<InboundMessage> {
        let wait = if blocking {
            self.timeouts.response
        } else {
            self.timeouts.poll
        };
        let session = self.session.as_mut()?;
        tokio::time::timeout(wait, session.inbound_rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn file_exists(&mut self, path: &str) -> bool {
        self.store.exists(path).await
    }

    async fn read_file(&mut self, path: &str) -> Result<String, TransportError> {
        self.store.read(path).await
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> bool {
        match self.store.write(path, contents).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path, "File write failed: {}", e);
                false
            }
        }
    }

    async fn delete_file(&mut self, path: &str) -> bool {
        self.store.delete(path).await.is_ok()
    }
}
