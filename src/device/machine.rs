//! Device state machine
//!
//! [`Device`] owns the radio, the peripherals and every piece of runtime
//! state. The host loop calls [`Device::tick`] repeatedly; each call runs one
//! state step to completion. A [`TickOutcome::Restart`] asks the caller to
//! run [`Device::reboot`], the host equivalent of a hard reset.

use super::buttons::{Button, ButtonEvent, PendingEvent};
use super::health::{firmware_supported, PacketLossCounter};
use super::loader::{load_configuration, DeviceConfig};
use super::router::route_one;
use crate::cloud::{self, dps, CloudAdapter, DispatchContext, Platform, TelemetryInterval};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::peripherals::{colors, DisplaySink, Indicator, SensorReadings, SensorSource};
use crate::transport::mqtt::{HealthMonitor, ReconnectionDecision};
use crate::transport::store::paths;
use crate::transport::{connect_with_ca_fallback, MqttSettings, QoS, RadioStatus, Transport};
use crate::transport::TransportError;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Files removed by a factory reset
pub const FACTORY_RESET_FILES: [&str; 4] = [
    paths::CONFIG_FILE,
    paths::ENDPOINT,
    paths::DEVICE_CERT,
    paths::DEVICE_KEY,
];

/// Number of pages in the configuration mode walkthrough
pub const CONFIG_STEPS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    InvalidFirmware,
    WaitingForConfig,
    ConfiguringDevice,
    Provisioning,
    ConnectingToCloud,
    Idle,
    SendSensorData,
    ErrorState,
    FactoryReset,
}

/// What the control loop should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Restart,
}

/// Display, indicator and sensors handed to the device
#[derive(Debug)]
pub struct Peripherals {
    pub display: Box<dyn DisplaySink>,
    pub indicator: Box<dyn Indicator>,
    pub sensors: Box<dyn SensorSource>,
}

/// Single owner of the gateway runtime state
pub struct Device<T: Transport> {
    transport: T,
    peripherals: Peripherals,
    buttons: PendingEvent,
    settings: GatewayConfig,
    state: DeviceState,
    config: Option<DeviceConfig>,
    adapter: Option<CloudAdapter>,
    mqtt: MqttSettings,
    interval: TelemetryInterval,
    packet_loss: PacketLossCounter,
    last_publish: Instant,
    connect_attempts: u32,
    config_step: usize,
    blink_on: bool,
    sensors_present: bool,
    last_error: Option<String>,
}

impl<T: Transport> Device<T> {
    /// Create a device; call [`Device::boot`] before the first tick
    pub fn new(
        transport: T,
        peripherals: Peripherals,
        buttons: PendingEvent,
        settings: GatewayConfig,
    ) -> Self {
        let interval = Self::default_interval(&settings);
        Self {
            transport,
            peripherals,
            buttons,
            settings,
            state: DeviceState::WaitingForConfig,
            config: None,
            adapter: None,
            mqtt: MqttSettings::default(),
            interval,
            packet_loss: PacketLossCounter::default(),
            last_publish: Instant::now(),
            connect_attempts: 0,
            config_step: 0,
            blink_on: false,
            sensors_present: false,
            last_error: None,
        }
    }

    fn default_interval(settings: &GatewayConfig) -> TelemetryInterval {
        TelemetryInterval::new(settings.telemetry.default_interval_ms).unwrap_or_default()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn interval(&self) -> TelemetryInterval {
        self.interval
    }

    /// Configuration loaded at the last boot
    pub fn device_config(&self) -> Option<&DeviceConfig> {
        self.config.as_ref()
    }

    pub fn platform(&self) -> Option<Platform> {
        self.adapter.as_ref().map(CloudAdapter::platform)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Settings the next MQTT connect will use
    pub fn mqtt_settings(&self) -> &MqttSettings {
        &self.mqtt
    }

    pub fn packet_loss(&self) -> u32 {
        self.packet_loss.count()
    }

    /// Last user-visible error, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Handle for feeding button events into the device
    pub fn buttons(&self) -> PendingEvent {
        self.buttons.clone()
    }

    /// Run the startup sequence and pick the first operating state
    pub async fn boot(&mut self) {
        let span = crate::device_span!(operation = "boot");
        async {
            self.reset_runtime();
            self.show_banner();

            let firmware = self.transport.firmware_version().await;
            if !firmware_supported(&firmware) {
                warn!(firmware = %firmware, "Radio firmware too old");
                self.enter(DeviceState::InvalidFirmware);
                return;
            }

            self.sensors_present = self.peripherals.sensors.is_present();
            if !self.sensors_present {
                warn!("No sensor answered, telemetry disabled");
            }

            self.notify("Loading configuration...");
            let config = match load_configuration(&mut self.transport).await {
                Ok(config) => config,
                Err(e) => {
                    self.fail(e.into());
                    return;
                }
            };

            let adapter = match CloudAdapter::from_config(&config, &mut self.mqtt) {
                Ok(adapter) => adapter,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            };
            if let Err(e) = cloud::persist_endpoint(&mut self.transport, &config).await {
                warn!("Endpoint not persisted: {}", e);
            }
            info!(platform = adapter.platform().name(), client_id = %config.client_id, "Configuration loaded");

            self.notify("Connecting to Wi-Fi..");
            if let Err(e) = self.transport.connect_wifi(&config.wifi).await {
                error!("Wi-Fi connect failed: {}", e);
                self.record_error("Error: Wi-Fi connect failed");
                self.config = Some(config);
                self.adapter = Some(adapter);
                self.enter(DeviceState::WaitingForConfig);
                return;
            }
            self.notify("Connected to Wi-Fi");

            if !self.transport.configure_sntp(&config.sntp).await {
                warn!(server = %config.sntp.server, "SNTP configuration failed");
            }

            let next = if adapter.platform() == Platform::Azure {
                match self.stored_endpoint().await {
                    Some(endpoint) => {
                        adapter.apply_endpoint(&mut self.mqtt, &endpoint);
                        DeviceState::ConnectingToCloud
                    }
                    None => DeviceState::Provisioning,
                }
            } else {
                DeviceState::ConnectingToCloud
            };

            self.config = Some(config);
            self.adapter = Some(adapter);
            self.enter(next);
        }
        .instrument(span)
        .await
    }

    /// Drop the session and boot again against the same radio store
    pub async fn reboot(&mut self) {
        info!("Restarting device");
        self.transport.disconnect_mqtt().await;
        self.transport.disconnect_wifi().await;
        self.boot().await;
    }

    /// Run one state step
    pub async fn tick(&mut self) -> GatewayResult<TickOutcome> {
        if let Some(event) = self.buttons.take() {
            self.handle_button(event);
        }

        let span = crate::device_span!(operation = "tick", state = ?self.state);
        async {
            match self.state {
                DeviceState::InvalidFirmware => self.invalid_firmware().await,
                DeviceState::WaitingForConfig => self.waiting_for_config().await,
                DeviceState::ConfiguringDevice => self.configuring().await,
                DeviceState::Provisioning => self.provisioning().await,
                DeviceState::ConnectingToCloud => self.connecting().await,
                DeviceState::Idle => self.idle().await,
                DeviceState::SendSensorData => self.send_sensor_data().await,
                DeviceState::ErrorState => self.error_state().await,
                DeviceState::FactoryReset => self.factory_reset().await,
            }
        }
        .instrument(span)
        .await
    }

    fn handle_button(&mut self, event: ButtonEvent) {
        debug!(?event, state = ?self.state, "Button event");
        match (event, self.state) {
            (ButtonEvent::Long(Button::C), _) => self.enter(DeviceState::FactoryReset),
            (ButtonEvent::Short(Button::C), DeviceState::WaitingForConfig) => {
                self.config_step = 0;
                self.enter(DeviceState::ConfiguringDevice);
            }
            (ButtonEvent::Short(Button::B), DeviceState::Idle) => {
                let text = format!("Interval: {} s", self.interval.as_secs());
                self.notify(&text);
            }
            _ => debug!("Button ignored in this state"),
        }
    }

    async fn invalid_firmware(&mut self) -> GatewayResult<TickOutcome> {
        let firmware = self.transport.firmware_version().await;
        self.peripherals.display.clear();
        self.peripherals
            .display
            .show(1, 0, 0, "Radio firmware not supported");
        self.peripherals
            .display
            .show(1, 0, 24, &format!("Found {firmware}, need 2.2+"));
        self.peripherals.indicator.set_color(colors::RED);
        sleep(self.settings.timing.indication()).await;
        Ok(TickOutcome::Continue)
    }

    async fn waiting_for_config(&mut self) -> GatewayResult<TickOutcome> {
        self.peripherals.display.clear();
        let mut row = 0;
        if let Some(message) = &self.last_error {
            self.peripherals.display.show(1, 0, row, message);
            row += 24;
        }
        self.peripherals
            .display
            .show(1, 0, row, "Press C to enter configuration mode");
        sleep(self.settings.timing.tick_interval()).await;
        Ok(TickOutcome::Continue)
    }

    async fn configuring(&mut self) -> GatewayResult<TickOutcome> {
        if self.transport.status().await != RadioStatus::Provisioning
            && !self.transport.start_provisioning_ap().await
        {
            warn!("Provisioning access point did not start");
        }

        let mac = self.transport.mac_address().await;
        let device_id = device_id_from_mac(&mac);
        let page = config_page(self.config_step, &device_id);
        self.peripherals.display.clear();
        for (line, text) in page.lines().enumerate() {
            self.peripherals.display.show(1, 0, (line * 12) as u16, text);
        }
        self.config_step = (self.config_step + 1) % CONFIG_STEPS;

        self.blink_on = !self.blink_on;
        self.peripherals
            .indicator
            .set_color(if self.blink_on { colors::BLUE } else { colors::OFF });

        sleep(self.settings.timing.config_step()).await;
        Ok(TickOutcome::Continue)
    }

    async fn provisioning(&mut self) -> GatewayResult<TickOutcome> {
        self.notify("Provisioning device...");
        let max_polls = self.settings.provisioning.max_status_polls;
        let Some(azure) = self.adapter.as_mut().and_then(CloudAdapter::as_azure_mut) else {
            self.enter(DeviceState::ConnectingToCloud);
            return Ok(TickOutcome::Continue);
        };

        let span = crate::cloud_span!(operation = "provision", scope_id = %azure.scope_id());
        let result = dps::provision(&mut self.transport, azure, max_polls)
            .instrument(span)
            .await;
        match result {
            Ok(hub) => {
                if let Some(adapter) = &self.adapter {
                    adapter.apply_endpoint(&mut self.mqtt, &hub);
                }
                self.enter(DeviceState::ConnectingToCloud);
            }
            Err(e) => self.fail(e),
        }
        Ok(TickOutcome::Continue)
    }

    async fn connecting(&mut self) -> GatewayResult<TickOutcome> {
        let (attempt, delay_ms) =
            match HealthMonitor::should_attempt_reconnection(self.connect_attempts, &self.settings.reconnect) {
                ReconnectionDecision::Proceed { attempt, delay_ms } => (attempt, delay_ms),
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    error!(attempts = self.connect_attempts, "Giving up on the cloud connection");
                    self.record_error("Error: Failed to connect to end point");
                    self.enter(DeviceState::ErrorState);
                    return Ok(TickOutcome::Continue);
                }
            };
        if attempt == 1 {
            debug!(
                max_backoff_ms = ?self.settings.reconnect.calculate_max_total_time(),
                "Starting cloud connection"
            );
        } else {
            debug!(attempt, delay_ms, "Waiting before reconnect");
            sleep(Duration::from_millis(delay_ms)).await;
        }

        self.peripherals.indicator.set_color(colors::ORANGE);
        self.notify("Connecting to end point...");

        let span = crate::mqtt_span!(operation = "connect", attempt, address = %self.mqtt.address);
        let result = self.connect_cloud().instrument(span).await;
        match result {
            Ok(()) => {
                self.connect_attempts = 0;
                self.peripherals.indicator.set_color(colors::GREEN);
                self.notify("Connected to end point");
                self.last_publish = Instant::now();
                self.enter(DeviceState::Idle);
            }
            Err(e @ GatewayError::CertificateMissing { .. }) => {
                self.transport.disconnect_mqtt().await;
                self.fail(e);
            }
            Err(e) => {
                warn!(attempt, "Cloud connection failed: {}", e);
                self.connect_attempts = attempt;
                self.transport.disconnect_mqtt().await;
            }
        }
        Ok(TickOutcome::Continue)
    }

    async fn connect_cloud(&mut self) -> GatewayResult<()> {
        let Some(adapter) = self.adapter.as_mut() else {
            return Err(GatewayError::ConfigMissing);
        };

        if let Some(tls) = &self.mqtt.tls {
            cloud::ensure_certificates(&mut self.transport, tls).await?;
        }
        connect_with_ca_fallback(&mut self.transport, &mut self.mqtt).await?;

        if !adapter.subscribe(&mut self.transport).await {
            return Err(GatewayError::Transport(TransportError::ConnectionRefused(
                "subscription rejected".to_string(),
            )));
        }

        let mut ctx = DispatchContext {
            transport: &mut self.transport,
            interval: &mut self.interval,
            display: self.peripherals.display.as_mut(),
            indicator: self.peripherals.indicator.as_mut(),
            sensors: self.peripherals.sensors.as_mut(),
        };
        adapter.on_connected(&mut ctx).await
    }

    async fn idle(&mut self) -> GatewayResult<TickOutcome> {
        let status = self.transport.status().await;
        if !status.is_ok() {
            warn!(?status, "Radio reported a fault");
            return Ok(TickOutcome::Restart);
        }

        if let Some(adapter) = self.adapter.as_mut() {
            let mut ctx = DispatchContext {
                transport: &mut self.transport,
                interval: &mut self.interval,
                display: self.peripherals.display.as_mut(),
                indicator: self.peripherals.indicator.as_mut(),
                sensors: self.peripherals.sensors.as_mut(),
            };
            route_one(adapter, &mut ctx).await;
        }

        if self.sensors_present && self.last_publish.elapsed() >= self.interval.as_duration() {
            self.enter(DeviceState::SendSensorData);
            return Ok(TickOutcome::Continue);
        }

        sleep(self.settings.timing.tick_interval()).await;
        Ok(TickOutcome::Continue)
    }

    async fn send_sensor_data(&mut self) -> GatewayResult<TickOutcome> {
        let readings = self.peripherals.sensors.read_all();
        if let Some(adapter) = &self.adapter {
            let topic = adapter.telemetry_topic();
            let body = adapter.serialize_telemetry(&readings).to_string();
            if self
                .transport
                .publish(&topic, body.as_bytes(), QoS::AtLeastOnce, false)
                .await
            {
                debug!(topic = %topic, "Telemetry published");
                self.packet_loss.record_success();
            } else {
                let failures = self.packet_loss.count() + 1;
                warn!(topic = %topic, failures, "Telemetry publish failed");
                if self.packet_loss.record_failure() {
                    error!("Packet loss threshold reached");
                    self.transport.mark_error().await;
                }
            }
        }
        self.show_readings(&readings);

        self.last_publish = Instant::now();
        self.enter(DeviceState::Idle);
        Ok(TickOutcome::Continue)
    }

    async fn error_state(&mut self) -> GatewayResult<TickOutcome> {
        let message = self
            .last_error
            .clone()
            .unwrap_or_else(|| "Error".to_string());
        self.peripherals.display.clear();
        self.peripherals.display.show(1, 0, 24, &message);
        self.peripherals.indicator.set_color(colors::RED);
        sleep(self.settings.timing.error_display()).await;
        Ok(TickOutcome::Continue)
    }

    async fn factory_reset(&mut self) -> GatewayResult<TickOutcome> {
        self.notify("Factory reset...");
        self.transport.disconnect_mqtt().await;
        self.transport.disconnect_wifi().await;

        for path in FACTORY_RESET_FILES {
            if self.transport.file_exists(path).await && !self.transport.delete_file(path).await {
                warn!(path, "Could not delete file");
            }
        }
        info!("Factory reset complete");
        sleep(self.settings.timing.indication()).await;
        Ok(TickOutcome::Restart)
    }

    fn reset_runtime(&mut self) {
        self.state = DeviceState::WaitingForConfig;
        self.config = None;
        self.adapter = None;
        self.mqtt = MqttSettings::default();
        self.interval = Self::default_interval(&self.settings);
        self.packet_loss = PacketLossCounter::default();
        self.last_publish = Instant::now();
        self.connect_attempts = 0;
        self.config_step = 0;
        self.last_error = None;
        self.peripherals.indicator.set_color(colors::OFF);
    }

    async fn stored_endpoint(&mut self) -> Option<String> {
        if !self.transport.file_exists(paths::ENDPOINT).await {
            return None;
        }
        match self.transport.read_file(paths::ENDPOINT).await {
            Ok(endpoint) if !endpoint.trim().is_empty() => Some(endpoint.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Stored endpoint unreadable: {}", e);
                None
            }
        }
    }

    fn enter(&mut self, next: DeviceState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "State change");
        }
        self.state = next;
    }

    /// Log and show an error, then park in the state the error calls for
    fn fail(&mut self, error: GatewayError) {
        error!("{}", error);
        self.record_error(&error.display_message());
        if error.needs_configuration() {
            self.enter(DeviceState::WaitingForConfig);
        } else {
            self.enter(DeviceState::ErrorState);
        }
    }

    fn record_error(&mut self, message: &str) {
        self.last_error = Some(message.to_string());
        self.notify(message);
    }

    fn notify(&mut self, text: &str) {
        self.peripherals.display.clear();
        self.peripherals.display.show(1, 0, 24, text);
    }

    fn show_banner(&mut self) {
        self.peripherals.display.clear();
        self.peripherals.display.show(2, 0, 0, "Sensor Gateway");
        self.peripherals
            .display
            .show(1, 0, 24, concat!("v", env!("CARGO_PKG_VERSION")));
    }

    fn show_readings(&mut self, readings: &SensorReadings) {
        let display = &mut self.peripherals.display;
        display.clear();
        display.show(1, 0, 0, "Status: Connected");
        let mut row = 12;
        let mut line = |text: String| {
            display.show(1, 0, row, &text);
            row += 12;
        };
        if let Some(p) = readings.pressure {
            line(format!("P:{p:.2} kPa"));
        }
        if let Some(t) = readings.temperature {
            line(format!("T:{t:.2} C"));
        }
        if let Some(h) = readings.humidity {
            line(format!("RH:{h:.2} %"));
        }
        if let Some(a) = readings.acceleration {
            line(format!("Acc: x:{:.3} y:{:.3} z:{:.3} g", a.x, a.y, a.z));
        }
    }
}

/// Last three MAC bytes as upper case hex, the suffix of the access point SSID
pub fn device_id_from_mac(mac: &str) -> String {
    let compact: String = mac.chars().filter(char::is_ascii_hexdigit).collect();
    let tail = compact.len().saturating_sub(6);
    compact[tail..].to_uppercase()
}

/// Text of one configuration mode page
pub fn config_page(step: usize, device_id: &str) -> String {
    let body = match step % CONFIG_STEPS {
        0 => "Perform the\nfollowing 5 steps".to_string(),
        1 => format!("1. Connect your PC to\nthe access point\ncalypso_{device_id}"),
        2 => "2. Open your browser".to_string(),
        3 => "3. Navigate to the\nconfiguration page".to_string(),
        4 => "4. Select and upload\nthe config files".to_string(),
        _ => "5. Upon completion,\npress reset".to_string(),
    };
    format!("** Config mode **\nDev ID: {device_id}\n{body}")
}
