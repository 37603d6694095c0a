//! Collaborating peripherals: display, indicator LED and sensors
//!
//! The gateway core only talks to these through the traits below. The host
//! implementations log through `tracing` (targets `display` and `indicator`)
//! and simulate sensor readings.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::info;

/// Indicator colors, `0xRRGGBB`
pub mod colors {
    pub const OFF: u32 = 0x000000;
    pub const RED: u32 = 0xFF0000;
    pub const GREEN: u32 = 0x00FF00;
    pub const BLUE: u32 = 0x0000FF;
    pub const ORANGE: u32 = 0xFF8000;
    pub const WHITE: u32 = 0xFFFFFF;

    /// Pack three channel values into an indicator color
    pub fn rgb(red: u8, green: u8, blue: u8) -> u32 {
        (u32::from(red) << 16) | (u32::from(green) << 8) | u32::from(blue)
    }
}

/// Acceleration on three axes, in g
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One sampling of every sensor; each reading is independently optional
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReadings {
    /// kPa
    pub pressure: Option<f32>,
    /// degrees Celsius
    pub temperature: Option<f32>,
    /// percent relative humidity
    pub humidity: Option<f32>,
    pub acceleration: Option<Acceleration>,
}

/// Text output device
pub trait DisplaySink: Send + Debug {
    /// Draw `text` at (`col`, `row`) with the given font scale
    fn show(&mut self, scale: u8, col: u16, row: u16, text: &str);

    fn clear(&mut self) {}
}

/// RGB status LED
pub trait Indicator: Send + Debug {
    fn set_color(&mut self, rgb: u32);
}

/// Environmental sensors
pub trait SensorSource: Send + Debug {
    fn read_all(&mut self) -> SensorReadings;

    fn battery_voltage(&mut self) -> Option<f32>;

    /// Whether at least one sensor answered at startup
    fn is_present(&self) -> bool;
}

/// Display that writes every line to the log
#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn show(&mut self, scale: u8, col: u16, row: u16, text: &str) {
        info!(target: "display", scale, col, row, "{}", text);
    }

    fn clear(&mut self) {
        info!(target: "display", "----");
    }
}

/// Indicator that logs color changes
#[derive(Debug, Default)]
pub struct LogIndicator {
    current: Option<u32>,
}

impl Indicator for LogIndicator {
    fn set_color(&mut self, rgb: u32) {
        if self.current != Some(rgb) {
            info!(target: "indicator", color = %format!("#{rgb:06X}"), "Indicator changed");
            self.current = Some(rgb);
        }
    }
}

/// Deterministic drifting sensor values for running without hardware
#[derive(Debug, Default)]
pub struct SimulatedSensors {
    sample: u32,
}

impl SimulatedSensors {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorSource for SimulatedSensors {
    fn read_all(&mut self) -> SensorReadings {
        self.sample = self.sample.wrapping_add(1);
        // Triangle wave over 20 samples
        let phase = (self.sample % 20) as f32;
        let wave = if phase < 10.0 { phase } else { 20.0 - phase } / 10.0;

        SensorReadings {
            pressure: Some(101.3 + wave * 0.4),
            temperature: Some(21.0 + wave * 2.0),
            humidity: Some(45.0 + wave * 5.0),
            acceleration: Some(Acceleration {
                x: 0.0,
                y: wave * 0.02,
                z: 1.0,
            }),
        }
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        Some(3.3)
    }

    fn is_present(&self) -> bool {
        true
    }
}
