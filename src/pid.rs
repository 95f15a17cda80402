//! Discrete-time PID controller suitable for no_std embedded use.
//!
//! - Uses `f32` math with a fixed sample period `T`
//! - Trapezoidal integration, integrator clamped after accumulation
//! - Derivative-on-measurement through a bilinear low-pass filter (time constant `tau`)
//! - Output clamped to configured limits
//!
//! Example
//! ```ignore
//! let mut pid = PidController::new(&PidConfig::default())?;
//! let power = pid.update(setpoint_c, measured_c);
//! ```

use crate::config::{ConfigError, PidConfig};

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

#[derive(Debug, Clone)]
pub struct PidController {
    // Gains
    kp: f32,
    ki: f32,
    kd: f32,

    // Derivative low-pass filter time constant (s)
    tau: f32,

    // Output limits
    out_min: f32,
    out_max: f32,

    // Integrator limits
    int_min: f32,
    int_max: f32,

    // Sample period (s)
    sample_time: f32,

    // State
    integrator: f32,
    prev_error: f32,
    differentiator: f32,
    prev_measurement: f32,
    last_output: f32,
}

impl PidController {
    /// Create a controller from a validated configuration. All state starts at zero.
    pub fn new(config: &PidConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            tau: config.tau,
            out_min: config.out_min,
            out_max: config.out_max,
            int_min: config.int_min,
            int_max: config.int_max,
            sample_time: config.sample_time_s,
            integrator: 0.0,
            prev_error: 0.0,
            differentiator: 0.0,
            prev_measurement: 0.0,
            last_output: clamp(0.0, config.out_min, config.out_max),
        })
    }

    /// Reset internal state (integrator, derivative, last error/measurement/output).
    /// Gains and limits are kept.
    pub fn reset(&mut self) {
        self.integrator = 0.0;
        self.prev_error = 0.0;
        self.differentiator = 0.0;
        self.prev_measurement = 0.0;
        self.last_output = clamp(0.0, self.out_min, self.out_max);
    }

    /// Run one PID step for the configured sample period.
    /// Returns the clamped control output.
    pub fn update(&mut self, setpoint: f32, measurement: f32) -> f32 {
        let error = setpoint - measurement;

        let proportional = self.kp * error;

        // Clamp after accumulating, so a saturated integrator still tracks the limit.
        self.integrator += 0.5 * self.ki * self.sample_time * (error + self.prev_error);
        self.integrator = clamp(self.integrator, self.int_min, self.int_max);

        // Negative sign because the derivative acts on the measurement, not the error.
        self.differentiator = -(2.0 * self.kd * (measurement - self.prev_measurement)
            + (2.0 * self.tau - self.sample_time) * self.differentiator)
            / (2.0 * self.tau + self.sample_time);

        let output = proportional + self.integrator + self.differentiator;
        self.last_output = clamp(output, self.out_min, self.out_max);

        self.prev_error = error;
        self.prev_measurement = measurement;

        self.last_output
    }

    /// Change gains live. Controller state is not touched.
    pub fn update_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Current gains.
    pub fn gains(&self) -> PidGains {
        PidGains {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }

    /// Return the last computed output.
    pub fn output(&self) -> f32 {
        self.last_output
    }

    pub fn integrator(&self) -> f32 {
        self.integrator
    }

    pub fn output_limits(&self) -> (f32, f32) {
        (self.out_min, self.out_max)
    }
}

#[inline]
pub(crate) fn clamp(x: f32, min: f32, max: f32) -> f32 {
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}
