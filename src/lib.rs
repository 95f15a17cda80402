#![cfg_attr(not(test), no_std)]

#[cfg(feature = "defmt")]
pub use defmt as log;

#[cfg(not(feature = "defmt"))]
pub use log;

pub mod config;
pub mod control_loop;
pub mod editor;
pub mod heater;
pub mod max6675;
pub mod pid;
pub mod process;
pub mod profile;
pub mod sequencer;
pub mod thermocouple;

#[cfg(any(test, feature = "std"))]
pub mod simulator;

pub static VERSION: &str = "v0.1";
pub const SYSTEM_TICK_MILLIS: u32 = 100;

/// Number of chip-select lines on the thermocouple bus.
pub const MAX_CHANNELS: usize = 4;

/// Ambient temperature used as the IDLE setpoint (°C).
pub const AMBIENT_TEMPERATURE: f32 = 25.0;

pub use config::{ConfigError, OvenConfig, PidConfig};
pub use control_loop::{Clock, ControlLoop, OvenStatus, SystemClock};
pub use editor::{EncoderEvent, ParameterEditor};
pub use heater::{Heater, HeaterCommand, SignalHeater};
pub use pid::{PidController, PidGains};
pub use process::SharedProcess;
pub use profile::{ParameterId, Phase, ReflowParameters};
pub use sequencer::ReflowSequencer;
pub use thermocouple::{ChannelId, ThermocoupleBus};
