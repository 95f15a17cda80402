//! Fixed-rate control tick: read sensors, step the sequencer, drive the
//! heater, publish status.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::watch::Watch;
use embassy_time::{Duration, Instant, Ticker};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::spi::SpiBus;

use crate::config::{ConfigError, OvenConfig};
use crate::heater::Heater;
use crate::log::*;
use crate::process::SharedProcess;
use crate::profile::Phase;
use crate::thermocouple::{ChannelId, ThermocoupleBus};

/// Monotonic millisecond time source. Wraps after ~49 days.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Clock backed by the embassy time driver.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }
}

/// What the display side gets after every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OvenStatus {
    pub phase: Phase,
    pub setpoint: f32,
    /// Primary sensor reading, `None` while it is disconnected.
    pub measured: Option<f32>,
    pub emergency_stop: bool,
    pub output: f32,
    pub elapsed_secs: u32,
}

pub struct ControlLoop<'a, M: RawMutex, SPI, CS, H, C, const N: usize> {
    process: &'a SharedProcess<M>,
    sensors: ThermocoupleBus<SPI, CS, N>,
    heater: H,
    clock: C,
    primary: ChannelId,
    tick: Duration,
    primary_missing: bool,
}

impl<'a, M, SPI, CS, H, C, const N: usize> ControlLoop<'a, M, SPI, CS, H, C, N>
where
    M: RawMutex,
    SPI: SpiBus<u8>,
    CS: OutputPin,
    H: Heater,
    C: Clock,
{
    /// The primary channel from `config` must already be registered on
    /// `sensors`.
    pub fn new(
        process: &'a SharedProcess<M>,
        sensors: ThermocoupleBus<SPI, CS, N>,
        heater: H,
        clock: C,
        config: &OvenConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let primary = config.primary_channel;
        if sensors.channel(primary).is_none() {
            return Err(ConfigError::PrimaryChannel);
        }
        Ok(Self {
            process,
            sensors,
            heater,
            clock,
            primary,
            tick: Duration::from_millis(config.tick_millis as u64),
            primary_missing: false,
        })
    }

    pub async fn tick(&mut self) -> OvenStatus {
        let readings = self.sensors.read_all().await;
        let measured = readings
            .iter()
            .find(|(channel, _)| *channel == self.primary)
            .map(|(_, temperature)| *temperature);

        let now = self.clock.now_ms();
        let output = match measured {
            Some(temperature) => {
                if self.primary_missing {
                    info!("Primary thermocouple {} back online", self.primary);
                    self.primary_missing = false;
                }
                self.process.step(temperature, now)
            }
            None => {
                if !self.primary_missing {
                    error!("Primary thermocouple {} missing, stopping", self.primary);
                    self.primary_missing = true;
                }
                self.process.step_sensor_fault(now)
            }
        };
        self.heater.set_output(output);

        let snapshot = self.process.snapshot(now);
        debug!(
            "{} setpoint {} measured {} output {}",
            snapshot.phase.to_str(),
            snapshot.setpoint,
            measured.unwrap_or(f32::NAN),
            output
        );

        OvenStatus {
            phase: snapshot.phase,
            setpoint: snapshot.setpoint,
            measured,
            emergency_stop: snapshot.emergency_stop,
            output,
            elapsed_secs: snapshot.elapsed_secs,
        }
    }

    /// Tick forever at the configured period.
    pub async fn run<SM: RawMutex, const W: usize>(
        &mut self,
        status: &Watch<SM, OvenStatus, W>,
    ) -> ! {
        let sender = status.sender();
        let mut ticker = Ticker::every(self.tick);
        loop {
            sender.send(self.tick().await);
            ticker.next().await;
        }
    }

    pub fn sensors(&self) -> &ThermocoupleBus<SPI, CS, N> {
        &self.sensors
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::heater::{HeaterCommand, SignalHeater};
    use crate::max6675::encode_temperature;
    use crate::sequencer::tests::pid;
    use crate::sequencer::ReflowSequencer;
    use crate::thermocouple::mock::{bus, push, Response};
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::signal::Signal;

    #[derive(Clone, Default)]
    struct ManualClock(Rc<Cell<u32>>);

    impl Clock for ManualClock {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
    }

    fn process() -> SharedProcess<NoopRawMutex> {
        SharedProcess::new(ReflowSequencer::default(), pid())
    }

    #[test]
    fn rejects_unregistered_primary() {
        let process = process();
        let mock = bus::<2>(encode_temperature(25.0));
        let mut sensors =
            ThermocoupleBus::new(mock.spi, mock.pins, Duration::from_millis(20)).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        let mut config = OvenConfig::default();
        config.primary_channel = 1;
        let result = ControlLoop::new(&process, sensors, |_: f32| {}, ManualClock::default(), &config);
        assert!(matches!(result, Err(ConfigError::PrimaryChannel)));
    }

    #[test]
    fn tick_drives_heater_and_reports_status() {
        let process = process();
        let mock = bus::<2>(encode_temperature(25.0));
        let fallback = mock.fallback.clone();
        let mut sensors =
            ThermocoupleBus::new(mock.spi, mock.pins, Duration::from_millis(20)).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        block_on(sensors.add_device(1)).unwrap();

        let clock = ManualClock::default();
        let outputs = Rc::new(Cell::new(-1.0f32));
        let sink = {
            let outputs = outputs.clone();
            move |output: f32| outputs.set(output)
        };
        let mut control =
            ControlLoop::new(&process, sensors, sink, clock.clone(), &OvenConfig::default())
                .unwrap();

        let status = block_on(control.tick());
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.measured, Some(25.0));
        assert_eq!(status.setpoint, crate::AMBIENT_TEMPERATURE);
        assert!(!status.emergency_stop);
        assert_eq!(outputs.get(), status.output);

        assert!(process.start_process());
        fallback.borrow_mut()[0] = encode_temperature(30.0);
        clock.0.set(100);
        let status = block_on(control.tick());
        assert_eq!(status.phase, Phase::Preheat);
        assert_eq!(status.measured, Some(30.0));
        assert_eq!(status.setpoint, 30.0);
    }

    #[test]
    fn missing_primary_forces_emergency_stop() {
        let process = process();
        let mock = bus::<2>(encode_temperature(120.0));
        let scripts = mock.scripts.clone();
        let mut sensors =
            ThermocoupleBus::new(mock.spi, mock.pins, Duration::from_millis(20)).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        block_on(sensors.add_device(1)).unwrap();

        let clock = ManualClock::default();
        let mut control =
            ControlLoop::new(&process, sensors, |_: f32| {}, clock.clone(), &OvenConfig::default())
                .unwrap();

        assert!(process.start_process());
        block_on(control.tick());
        assert_eq!(process.current_phase(), Phase::Preheat);

        // A secondary reading must never stand in for the primary.
        push(&scripts, 0, Response::Frame(0x0000));
        clock.0.set(100);
        let status = block_on(control.tick());
        assert_eq!(status.measured, None);
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.emergency_stop);
        assert_eq!(status.output, 0.0);
        assert!(!control.sensors().is_connected(0));
        assert!(control.sensors().is_connected(1));

        // Sensor back: the loop keeps running, still latched at IDLE.
        clock.0.set(200);
        let status = block_on(control.tick());
        assert_eq!(status.measured, Some(120.0));
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.emergency_stop);
    }

    #[test]
    fn over_temperature_interlock() {
        let process = process();
        let mock = bus::<1>(encode_temperature(100.0));
        let fallback = mock.fallback.clone();
        let mut sensors =
            ThermocoupleBus::new(mock.spi, mock.pins, Duration::from_millis(20)).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        let clock = ManualClock::default();
        let mut control =
            ControlLoop::new(&process, sensors, |_: f32| {}, clock.clone(), &OvenConfig::default())
                .unwrap();

        assert!(process.start_process());
        block_on(control.tick());
        fallback.borrow_mut()[0] = encode_temperature(251.0);
        clock.0.set(100);
        let status = block_on(control.tick());
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.emergency_stop);
    }

    #[test]
    fn sensor_fault_switches_heater_off() {
        let process = process();
        let mock = bus::<1>(encode_temperature(25.0));
        let scripts = mock.scripts.clone();
        let mut sensors =
            ThermocoupleBus::new(mock.spi, mock.pins, Duration::from_millis(20)).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        let signal: Signal<NoopRawMutex, HeaterCommand> = Signal::new();
        let heater = SignalHeater::new(&signal, (0.0, 100.0));
        let clock = ManualClock::default();
        let mut control =
            ControlLoop::new(&process, sensors, heater, clock.clone(), &OvenConfig::default())
                .unwrap();

        assert!(process.start_process());
        block_on(control.tick());
        // Setpoint has ramped well above the cold oven: full power.
        clock.0.set(100_000);
        block_on(control.tick());
        assert_eq!(signal.try_take(), Some(HeaterCommand::SetPower(100)));

        block_on(control.tick());
        push(&scripts, 0, Response::Fail);
        clock.0.set(100_100);
        let status = block_on(control.tick());
        assert!(status.emergency_stop);
        // The heater task only ever sees the newest command.
        assert_eq!(signal.try_take(), Some(HeaterCommand::SetPower(0)));
    }
}
