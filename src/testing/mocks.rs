//! Mock implementations for testing
//!
//! Provides a scripted in-memory radio plus recording peripherals so the
//! device state machine and the cloud adapters can be exercised without a
//! broker or hardware.

use crate::peripherals::{DisplaySink, Indicator, SensorReadings, SensorSource};
use crate::transport::mqtt::{HealthMonitor, RadioEvent};
use crate::transport::{
    InboundMessage, MqttSettings, QoS, RadioStatus, SntpSettings, Subscription, Transport,
    TransportError, WifiSettings,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A message the device published through the mock radio
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    /// Parse the payload as JSON, `Value::Null` when it is not JSON
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Scripted result of one `connect_mqtt` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectOutcome {
    Accept,
    /// Server certificate rejected; status becomes `MqttWrongRootCa`
    WrongRootCa,
    /// Broker refused the session
    Refused,
}

/// Shared state behind a [`MockRadio`]
#[derive(Debug)]
pub struct MockRadioState {
    pub status: RadioStatus,
    pub firmware_version: String,
    pub mac_address: String,
    pub udid: String,
    pub files: HashMap<String, String>,
    pub connect_script: VecDeque<ConnectOutcome>,
    pub connect_attempts: Vec<MqttSettings>,
    pub wifi_joins: Vec<WifiSettings>,
    pub sntp_configs: Vec<SntpSettings>,
    pub subscriptions: Vec<Subscription>,
    pub published: Vec<PublishedMessage>,
    pub inbound: VecDeque<InboundMessage>,
    /// Number of upcoming publishes that fail
    pub failing_publishes: u32,
    pub wifi_fails: bool,
    pub subscribe_fails: bool,
    pub provisioning_ap_starts: u32,
}

impl Default for MockRadioState {
    fn default() -> Self {
        Self {
            status: RadioStatus::Disconnected,
            firmware_version: "2.2.0".to_string(),
            mac_address: "00:11:22:33:44:55".to_string(),
            udid: "0123456789abcdef".to_string(),
            files: HashMap::new(),
            connect_script: VecDeque::new(),
            connect_attempts: Vec::new(),
            wifi_joins: Vec::new(),
            sntp_configs: Vec::new(),
            subscriptions: Vec::new(),
            published: Vec::new(),
            inbound: VecDeque::new(),
            failing_publishes: 0,
            wifi_fails: false,
            subscribe_fails: false,
            provisioning_ap_starts: 0,
        }
    }
}

impl MockRadioState {
    fn apply(&mut self, event: RadioEvent) {
        self.status = HealthMonitor::determine_next_status(self.status, event);
    }
}

/// Mock radio for testing
///
/// Clones share state, so a test can keep a handle while the device owns
/// another one.
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    pub state: Arc<Mutex<MockRadioState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, update: impl FnOnce(&mut MockRadioState)) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            update(&mut state);
        }
        self
    }

    /// Start with Wi-Fi already joined
    pub fn with_wifi_connected(self) -> Self {
        self.configure(|state| state.apply(RadioEvent::WifiConnected))
    }

    /// Start with a file on the radio filesystem
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        let (path, contents) = (path.to_string(), contents.to_string());
        self.configure(|state| {
            state.files.insert(path, contents);
        })
    }

    pub fn with_firmware(self, version: &str) -> Self {
        let version = version.to_string();
        self.configure(|state| state.firmware_version = version)
    }

    /// Make every `connect_wifi` fail
    pub fn with_wifi_failure(self) -> Self {
        self.configure(|state| state.wifi_fails = true)
    }

    /// Queue outcomes for the next `connect_mqtt` calls; unscripted calls accept
    pub async fn script_connects(&self, outcomes: Vec<ConnectOutcome>) {
        self.state.lock().await.connect_script.extend(outcomes);
    }

    /// Queue an inbound message
    pub async fn queue_message(&self, topic: &str, payload: &str) {
        self.state
            .lock()
            .await
            .inbound
            .push_back(InboundMessage::new(topic, payload));
    }

    /// Queue an inbound message with arbitrary bytes
    pub async fn queue_raw(&self, topic: &str, payload: Vec<u8>) {
        self.state
            .lock()
            .await
            .inbound
            .push_back(InboundMessage::new(topic, payload));
    }

    /// Fail the next `count` publishes
    pub async fn fail_next_publishes(&self, count: u32) {
        self.state.lock().await.failing_publishes = count;
    }

    pub async fn set_subscribe_failure(&self, fails: bool) {
        self.state.lock().await.subscribe_fails = fails;
    }

    /// Force a status, e.g. to simulate a dropped session
    pub async fn set_status(&self, status: RadioStatus) {
        self.state.lock().await.status = status;
    }

    pub async fn put_file(&self, path: &str, contents: &str) {
        self.state
            .lock()
            .await
            .files
            .insert(path.to_string(), contents.to_string());
    }

    pub async fn get_connect_attempts(&self) -> Vec<MqttSettings> {
        self.state.lock().await.connect_attempts.clone()
    }

    pub async fn get_published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.clone()
    }

    /// Published messages whose topic starts with `prefix`
    pub async fn published_to(&self, prefix: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|m| m.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn get_subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.subscriptions.clone()
    }

    pub async fn get_wifi_joins(&self) -> Vec<WifiSettings> {
        self.state.lock().await.wifi_joins.clone()
    }

    pub async fn get_sntp_configs(&self) -> Vec<SntpSettings> {
        self.state.lock().await.sntp_configs.clone()
    }

    pub async fn provisioning_ap_starts(&self) -> u32 {
        self.state.lock().await.provisioning_ap_starts
    }

    pub async fn has_file(&self, path: &str) -> bool {
        self.state.lock().await.files.contains_key(path)
    }

    pub async fn file(&self, path: &str) -> Option<String> {
        self.state.lock().await.files.get(path).cloned()
    }

    pub async fn pending_messages(&self) -> usize {
        self.state.lock().await.inbound.len()
    }

    pub async fn clear_history(&self) {
        let mut state = self.state.lock().await;
        state.published.clear();
        state.connect_attempts.clear();
    }
}

#[async_trait]
impl Transport for MockRadio {
    async fn status(&self) -> RadioStatus {
        self.state.lock().await.status
    }

    async fn mark_error(&mut self) {
        self.state.lock().await.apply(RadioEvent::Fault);
    }

    async fn firmware_version(&self) -> String {
        self.state.lock().await.firmware_version.clone()
    }

    async fn mac_address(&self) -> String {
        self.state.lock().await.mac_address.clone()
    }

    async fn udid(&self) -> String {
        self.state.lock().await.udid.clone()
    }

    async fn connect_wifi(&mut self, wifi: &WifiSettings) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.wifi_joins.push(wifi.clone());
        if state.wifi_fails {
            return Err(TransportError::ConnectionRefused(
                "access point not found".to_string(),
            ));
        }
        state.apply(RadioEvent::WifiConnected);
        Ok(())
    }

    async fn disconnect_wifi(&mut self) {
        let mut state = self.state.lock().await;
        state.subscriptions.clear();
        state.apply(RadioEvent::WifiDisconnected);
    }

    async fn configure_sntp(&mut self, sntp: &SntpSettings) -> bool {
        self.state.lock().await.sntp_configs.push(sntp.clone());
        true
    }

    async fn start_provisioning_ap(&mut self) -> bool {
        let mut state = self.state.lock().await;
        state.provisioning_ap_starts += 1;
        state.apply(RadioEvent::ProvisioningStarted);
        true
    }

    async fn connect_mqtt(&mut self, settings: &MqttSettings) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !matches!(
            state.status,
            RadioStatus::WlanConnected
                | RadioStatus::MqttConnecting
                | RadioStatus::MqttConnected
                | RadioStatus::MqttWrongRootCa
        ) {
            return Err(TransportError::NotConnected);
        }

        state.connect_attempts.push(settings.clone());
        state.apply(RadioEvent::MqttConnectStarted);
        match state
            .connect_script
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept)
        {
            ConnectOutcome::Accept => {
                state.apply(RadioEvent::ConnAckReceived);
                Ok(())
            }
            ConnectOutcome::WrongRootCa => {
                state.apply(RadioEvent::CertificateRejected);
                Err(TransportError::WrongRootCa)
            }
            ConnectOutcome::Refused => {
                state.apply(RadioEvent::MqttDisconnected);
                Err(TransportError::ConnectionRefused(
                    "NotAuthorized".to_string(),
                ))
            }
        }
    }

    async fn disconnect_mqtt(&mut self) {
        let mut state = self.state.lock().await;
        state.subscriptions.clear();
        state.apply(RadioEvent::MqttDisconnected);
    }

    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> bool {
        let mut state = self.state.lock().await;
        if !state.status.is_mqtt_connected() || state.subscribe_fails {
            return false;
        }
        state.subscriptions.extend_from_slice(subscriptions);
        true
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        let mut state = self.state.lock().await;
        if !state.status.is_mqtt_connected() {
            return false;
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return false;
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        true
    }

    async fn get_message(&mut self, _blocking: bool) -> Option<InboundMessage> {
        let mut state = self.state.lock().await;
        if !state.status.is_mqtt_connected() {
            return None;
        }
        state.inbound.pop_front()
    }

    async fn file_exists(&mut self, path: &str) -> bool {
        self.state.lock().await.files.contains_key(path)
    }

    async fn read_file(&mut self, path: &str) -> Result<String, TransportError> {
        self.state
            .lock()
            .await
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::FileNotFound(path.to_string()))
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> bool {
        self.state
            .lock()
            .await
            .files
            .insert(path.to_string(), contents.to_string());
        true
    }

    async fn delete_file(&mut self, path: &str) -> bool {
        self.state.lock().await.files.remove(path).is_some()
    }
}

/// Display that records every line shown
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    lines: Arc<std::sync::Mutex<Vec<String>>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether any shown line contains `text`
    pub fn contains(&self, text: &str) -> bool {
        self.lines().iter().any(|line| line.contains(text))
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl DisplaySink for RecordingDisplay {
    fn show(&mut self, _scale: u8, _col: u16, _row: u16, text: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(text.to_string());
        }
    }
}

/// Indicator that records every color set
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    colors: Arc<std::sync::Mutex<Vec<u32>>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn colors(&self) -> Vec<u32> {
        self.colors
            .lock()
            .map(|colors| colors.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<u32> {
        self.colors().last().copied()
    }
}

impl Indicator for RecordingIndicator {
    fn set_color(&mut self, rgb: u32) {
        if let Ok(mut colors) = self.colors.lock() {
            colors.push(rgb);
        }
    }
}

/// Sensors returning the same readings every time
#[derive(Debug, Clone, Default)]
pub struct FixedSensors {
    pub readings: SensorReadings,
    pub battery: Option<f32>,
    pub present: bool,
}

impl FixedSensors {
    pub fn new(readings: SensorReadings) -> Self {
        Self {
            readings,
            battery: Some(3.7),
            present: true,
        }
    }

    /// No sensor answered
    pub fn absent() -> Self {
        Self::default()
    }
}

impl SensorSource for FixedSensors {
    fn read_all(&mut self) -> SensorReadings {
        self.readings
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        self.battery
    }

    fn is_present(&self) -> bool {
        self.present
    }
}
