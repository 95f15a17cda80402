use core::fmt;

use serde::{Deserialize, Serialize};

use crate::profile::{ParameterId, ReflowParameters};
use crate::{MAX_CHANNELS, SYSTEM_TICK_MILLIS};

/// Configuration error. The control loop must not start with any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    SampleTime,
    FilterTimeConstant,
    OutputLimits,
    IntegratorLimits,
    TickMismatch,
    PrimaryChannel,
    BusTimeout,
    Parameter(ParameterId),
    Json,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::SampleTime => write!(f, "PID sample time must be positive"),
            ConfigError::FilterTimeConstant => {
                write!(f, "derivative filter time constant must not be negative")
            }
            ConfigError::OutputLimits => write!(f, "output limits must satisfy min < max"),
            ConfigError::IntegratorLimits => {
                write!(f, "integrator limits must satisfy min < max")
            }
            ConfigError::TickMismatch => {
                write!(f, "control tick period does not match the PID sample time")
            }
            ConfigError::PrimaryChannel => write!(f, "primary thermocouple channel is invalid"),
            ConfigError::BusTimeout => write!(f, "bus timeout out of range"),
            ConfigError::Parameter(id) => write!(f, "reflow parameter {} out of range", id.to_str()),
            ConfigError::Json => write!(f, "malformed JSON configuration"),
        }
    }
}

/// PID tuning and limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Derivative low-pass time constant (s)
    pub tau: f32,
    pub out_min: f32,
    pub out_max: f32,
    pub int_min: f32,
    pub int_max: f32,
    /// Sample period (s)
    pub sample_time_s: f32,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 3.0,
            ki: 0.5,
            kd: 1.0,
            tau: 0.2,
            out_min: 0.0,
            out_max: 100.0,
            int_min: -25.0,
            int_max: 75.0,
            sample_time_s: SYSTEM_TICK_MILLIS as f32 / 1000.0,
        }
    }
}

impl PidConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Written as negated comparisons so NaN fails too.
        if !(self.sample_time_s > 0.0) {
            return Err(ConfigError::SampleTime);
        }
        if !(self.tau >= 0.0) {
            return Err(ConfigError::FilterTimeConstant);
        }
        if !(self.out_min < self.out_max) {
            return Err(ConfigError::OutputLimits);
        }
        if !(self.int_min < self.int_max) {
            return Err(ConfigError::IntegratorLimits);
        }
        Ok(())
    }
}

/// Complete controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OvenConfig {
    pub pid: PidConfig,
    pub tick_millis: u32,
    pub primary_channel: u8,
    pub bus_timeout_millis: u32,
    pub parameters: ReflowParameters,
}

impl Default for OvenConfig {
    fn default() -> Self {
        Self {
            pid: PidConfig::default(),
            tick_millis: SYSTEM_TICK_MILLIS,
            primary_channel: 0,
            bus_timeout_millis: 50,
            parameters: ReflowParameters::default(),
        }
    }
}

impl OvenConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let (config, _) =
            serde_json_core::from_str::<OvenConfig>(json).map_err(|_| ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pid.validate()?;

        let sample_millis = self.pid.sample_time_s * 1000.0;
        let drift = sample_millis - self.tick_millis as f32;
        if !(drift < 0.5 && drift > -0.5) {
            return Err(ConfigError::TickMismatch);
        }
        if self.primary_channel as usize >= MAX_CHANNELS {
            return Err(ConfigError::PrimaryChannel);
        }
        if !(1..=100).contains(&self.bus_timeout_millis) {
            return Err(ConfigError::BusTimeout);
        }
        for id in ParameterId::ALL {
            if !id.accepts(self.parameters.get(id)) {
                return Err(ConfigError::Parameter(id));
            }
        }
        Ok(())
    }
}
