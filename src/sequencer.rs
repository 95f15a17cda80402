use crate::log::*;
use crate::pid::PidController;
use crate::profile::{ParameterId, Phase, ReflowParameters};
use crate::AMBIENT_TEMPERATURE;

/// Emergency stop above this temperature (°C).
pub const MAX_SAFE_TEMPERATURE: f32 = 250.0;

/// Longest time any phase may last before the run is aborted into cooldown (ms).
pub const MAX_PHASE_MILLIS: u32 = 600 * 1000;

/// Reflow phase state machine.
///
/// Transitions are staged in `next_phase` and applied at the start of the
/// next [`step`](Self::step), so commands arriving between ticks never
/// change the phase mid-update.
#[derive(Debug, Clone)]
pub struct ReflowSequencer {
    parameters: ReflowParameters,
    current_phase: Phase,
    next_phase: Phase,
    phase_start_ms: u32,
    current_setpoint: f32,
    temperature_at_phase_start: f32,
    emergency_stop: bool,
    last_temperature: f32,
}

impl Default for ReflowSequencer {
    fn default() -> Self {
        Self::new(ReflowParameters::default())
    }
}

impl ReflowSequencer {
    pub fn new(parameters: ReflowParameters) -> Self {
        Self {
            parameters,
            current_phase: Phase::Idle,
            next_phase: Phase::Idle,
            phase_start_ms: 0,
            current_setpoint: AMBIENT_TEMPERATURE,
            temperature_at_phase_start: AMBIENT_TEMPERATURE,
            emergency_stop: false,
            last_temperature: AMBIENT_TEMPERATURE,
        }
    }

    /// Change one parameter. Only allowed while idle and inside the field's range.
    pub fn modify_parameter(&mut self, id: ParameterId, value: f32) -> bool {
        if self.current_phase != Phase::Idle {
            warn!("Cannot modify {}: process running", id.to_str());
            return false;
        }
        if !self.parameters.set(id, value) {
            warn!("Rejected {} = {}: out of range", id.to_str(), value);
            return false;
        }
        info!("{} set to {}", id.to_str(), value);
        true
    }

    /// Stage PREHEAT. Only allowed while idle.
    pub fn start_process(&mut self) -> bool {
        if self.current_phase != Phase::Idle {
            info!("Cannot start: process already running");
            return false;
        }
        self.next_phase = Phase::Preheat;
        true
    }

    /// Stage COOLDOWN unless idle.
    pub fn stop_process(&mut self) {
        if self.current_phase != Phase::Idle {
            self.next_phase = Phase::Cooldown;
        }
    }

    /// Run one control tick and return the PID output.
    pub fn step(&mut self, pid: &mut PidController, temperature: f32, now_ms: u32) -> f32 {
        let tripped = temperature > MAX_SAFE_TEMPERATURE;
        if tripped {
            if !self.emergency_stop {
                error!("Over-temperature: {} C, emergency stop", temperature);
            }
            self.emergency_stop = true;
            self.next_phase = Phase::Idle;
        }
        self.last_temperature = temperature;

        self.apply_pending(pid, temperature, now_ms, tripped);

        let elapsed_ms = now_ms.wrapping_sub(self.phase_start_ms);
        if elapsed_ms > MAX_PHASE_MILLIS
            && self.current_phase != Phase::Idle
            && self.current_phase != Phase::Cooldown
        {
            warn!("{} timed out, cooling down", self.current_phase.to_str());
            self.next_phase = Phase::Cooldown;
        }

        self.current_setpoint = self.evaluate_phase(temperature, elapsed_ms);
        let output = pid.update(self.current_setpoint, temperature);
        debug!(
            "{}: setpoint {} measured {} output {}",
            self.current_phase.to_str(),
            self.current_setpoint,
            temperature,
            output
        );
        output
    }

    /// Tick without a usable temperature: the primary sensor is gone.
    /// Latches the emergency stop, forces IDLE and returns the minimum output.
    pub fn step_sensor_fault(&mut self, pid: &mut PidController, now_ms: u32) -> f32 {
        if !self.emergency_stop {
            error!("Primary thermocouple missing, emergency stop");
        }
        self.emergency_stop = true;
        self.next_phase = Phase::Idle;
        self.apply_pending(pid, self.last_temperature, now_ms, true);
        self.current_setpoint = AMBIENT_TEMPERATURE;
        pid.output_limits().0
    }

    pub fn current_phase(&self) -> Phase {
        self.current_phase
    }

    pub fn next_phase(&self) -> Phase {
        self.next_phase
    }

    /// Whole seconds spent in the current phase.
    pub fn phase_elapsed_secs(&self, now_ms: u32) -> u32 {
        now_ms.wrapping_sub(self.phase_start_ms) / 1000
    }

    pub fn current_setpoint(&self) -> f32 {
        self.current_setpoint
    }

    pub fn temperature_at_phase_start(&self) -> f32 {
        self.temperature_at_phase_start
    }

    pub fn emergency_stop(&self) -> bool {
        self.emergency_stop
    }

    pub fn parameters(&self) -> &ReflowParameters {
        &self.parameters
    }

    fn apply_pending(&mut self, pid: &mut PidController, temperature: f32, now_ms: u32, latch: bool) {
        if self.next_phase == self.current_phase {
            return;
        }
        let phase = self.next_phase;
        info!(
            "Phase {} -> {} at {} C",
            self.current_phase.to_str(),
            phase.to_str(),
            temperature
        );
        self.temperature_at_phase_start = temperature;
        self.phase_start_ms = now_ms;
        self.current_phase = phase;

        match phase {
            Phase::Idle => {
                pid.reset();
                if !latch {
                    self.emergency_stop = false;
                }
            }
            Phase::Preheat => pid.reset(),
            _ => {}
        }
    }

    /// Stage an advance unless something else is already pending this tick.
    fn stage(&mut self, phase: Phase) {
        if self.next_phase == self.current_phase {
            self.next_phase = phase;
        }
    }

    fn evaluate_phase(&mut self, temperature: f32, elapsed_ms: u32) -> f32 {
        let p = self.parameters;
        let elapsed_s = elapsed_ms as f32 / 1000.0;
        let start = self.temperature_at_phase_start;

        match self.current_phase {
            Phase::Idle => AMBIENT_TEMPERATURE,
            Phase::Preheat => {
                if temperature >= p.soak_temperature {
                    self.stage(Phase::Soak);
                }
                (start + p.preheat_rate * elapsed_s).min(p.soak_temperature)
            }
            Phase::Soak => {
                if elapsed_ms >= seconds_to_millis(p.soak_time) {
                    self.stage(Phase::Heatup);
                }
                p.soak_temperature
            }
            Phase::Heatup => {
                if temperature >= p.reflow_temperature {
                    self.stage(Phase::Reflow);
                }
                (start + p.heatup_rate * elapsed_s).min(p.reflow_temperature)
            }
            Phase::Reflow => {
                if elapsed_ms >= seconds_to_millis(p.reflow_time) {
                    self.stage(Phase::Cooldown);
                }
                p.reflow_temperature
            }
            Phase::Cooldown => {
                if temperature <= p.cooldown_temperature {
                    self.stage(Phase::Idle);
                }
                (start - p.cooldown_rate * elapsed_s).max(p.cooldown_temperature)
            }
        }
    }
}

fn seconds_to_millis(seconds: f32) -> u32 {
    (seconds * 1000.0) as u32
}
