//! Device core
//!
//! The control loop state machine and the pieces it drives: configuration
//! loading, button input, health policies and inbound message routing.

pub mod buttons;
pub mod health;
pub mod loader;
pub mod machine;
pub mod router;

pub use buttons::{parse_console_input, Button, ButtonEvent, Debouncer, PendingEvent};
pub use health::{firmware_supported, PacketLossCounter, PACKET_LOSS_THRESHOLD};
pub use loader::{load_configuration, parse_configuration, CloudIdentity, ConfigError, DeviceConfig};
pub use machine::{Device, DeviceState, Peripherals, TickOutcome};
pub use router::{route_one, RouteOutcome};
