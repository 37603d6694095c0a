//! Button input
//!
//! Raw pin samples go through a [`Debouncer`] per button, which turns stable
//! press/release edges into short or long presses. Events land in a
//! [`PendingEvent`] slot the control loop drains once per tick; a newer event
//! overwrites one that was never consumed.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum stable time before an edge is accepted
pub const DEBOUNCE: Duration = Duration::from_millis(30);

/// Holding a button at least this long makes a long press
pub const LONG_PRESS: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Short(Button),
    Long(Button),
}

/// Single-slot mailbox between input handling and the control loop
#[derive(Debug, Clone, Default)]
pub struct PendingEvent {
    slot: Arc<Mutex<Option<ButtonEvent>>>,
}

impl PendingEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event, replacing any unconsumed one
    pub fn set(&self, event: ButtonEvent) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(event);
        }
    }

    /// Take the pending event, leaving the slot empty
    pub fn take(&self) -> Option<ButtonEvent> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn peek(&self) -> Option<ButtonEvent> {
        self.slot.lock().ok().and_then(|slot| *slot)
    }
}

/// Edge detector for one button
#[derive(Debug)]
pub struct Debouncer {
    button: Button,
    stable_pressed: bool,
    candidate: Option<(bool, Instant)>,
    pressed_at: Option<Instant>,
}

impl Debouncer {
    pub fn new(button: Button) -> Self {
        Self {
            button,
            stable_pressed: false,
            candidate: None,
            pressed_at: None,
        }
    }

    /// Feed one raw sample; returns an event when a debounced release completes a press
    pub fn sample(&mut self, pressed: bool, now: Instant) -> Option<ButtonEvent> {
        if pressed == self.stable_pressed {
            self.candidate = None;
            return None;
        }

        let since = match self.candidate {
            Some((level, since)) if level == pressed => since,
            _ => {
                self.candidate = Some((pressed, now));
                now
            }
        };
        if now.duration_since(since) < DEBOUNCE {
            return None;
        }

        self.stable_pressed = pressed;
        self.candidate = None;
        if pressed {
            self.pressed_at = Some(since);
            return None;
        }

        let held = self
            .pressed_at
            .take()
            .map(|at| since.duration_since(at))
            .unwrap_or_default();
        Some(if held >= LONG_PRESS {
            ButtonEvent::Long(self.button)
        } else {
            ButtonEvent::Short(self.button)
        })
    }
}

/// Map a console line to a button event (`a`, `b`, `c` short; upper case long)
pub fn parse_console_input(line: &str) -> Option<ButtonEvent> {
    match line.trim() {
        "a" => Some(ButtonEvent::Short(Button::A)),
        "b" => Some(ButtonEvent::Short(Button::B)),
        "c" => Some(ButtonEvent::Short(Button::C)),
        "A" => Some(ButtonEvent::Long(Button::A)),
        "B" => Some(ButtonEvent::Long(Button::B)),
        "C" => Some(ButtonEvent::Long(Button::C)),
        _ => None,
    }
}
