//! Serialized access to the sequencer and PID controller.
//!
//! The control loop and the UI side run in different contexts; both go
//! through [`SharedProcess`], whose mutex makes every setter atomic with
//! respect to a control tick.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::pid::{PidController, PidGains};
use crate::profile::{ParameterId, Phase, ReflowParameters};
use crate::sequencer::ReflowSequencer;

/// Snapshot of the sequencer for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSnapshot {
    pub phase: Phase,
    pub setpoint: f32,
    pub emergency_stop: bool,
    pub elapsed_secs: u32,
    pub parameters: ReflowParameters,
    pub gains: PidGains,
}

struct Process {
    sequencer: ReflowSequencer,
    pid: PidController,
}

pub struct SharedProcess<M: RawMutex> {
    inner: Mutex<M, RefCell<Process>>,
}

impl<M: RawMutex> SharedProcess<M> {
    pub fn new(sequencer: ReflowSequencer, pid: PidController) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Process { sequencer, pid })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Process) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }

    /// One control tick with a valid measurement.
    pub fn step(&self, temperature: f32, now_ms: u32) -> f32 {
        self.with(|p| p.sequencer.step(&mut p.pid, temperature, now_ms))
    }

    /// One control tick without a primary measurement.
    pub fn step_sensor_fault(&self, now_ms: u32) -> f32 {
        self.with(|p| p.sequencer.step_sensor_fault(&mut p.pid, now_ms))
    }

    pub fn start_process(&self) -> bool {
        self.with(|p| p.sequencer.start_process())
    }

    pub fn stop_process(&self) {
        self.with(|p| p.sequencer.stop_process())
    }

    pub fn modify_parameter(&self, id: ParameterId, value: f32) -> bool {
        self.with(|p| p.sequencer.modify_parameter(id, value))
    }

    pub fn parameter(&self, id: ParameterId) -> f32 {
        self.with(|p| p.sequencer.parameters().get(id))
    }

    pub fn update_gains(&self, kp: f32, ki: f32, kd: f32) {
        self.with(|p| p.pid.update_gains(kp, ki, kd))
    }

    pub fn gains(&self) -> PidGains {
        self.with(|p| p.pid.gains())
    }

    pub fn current_phase(&self) -> Phase {
        self.with(|p| p.sequencer.current_phase())
    }

    pub fn phase_elapsed_secs(&self, now_ms: u32) -> u32 {
        self.with(|p| p.sequencer.phase_elapsed_secs(now_ms))
    }

    pub fn snapshot(&self, now_ms: u32) -> ProcessSnapshot {
        self.with(|p| ProcessSnapshot {
            phase: p.sequencer.current_phase(),
            setpoint: p.sequencer.current_setpoint(),
            emergency_stop: p.sequencer.emergency_stop(),
            elapsed_secs: p.sequencer.phase_elapsed_secs(now_ms),
            parameters: *p.sequencer.parameters(),
            gains: p.pid.gains(),
        })
    }
}
