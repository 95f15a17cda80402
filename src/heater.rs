use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaterCommand {
    SetPower(u8), // value between 0 and 100
}

/// Sink for the controller output, called once per tick.
pub trait Heater {
    fn set_output(&mut self, output: f32);
}

impl<F: FnMut(f32)> Heater for F {
    fn set_output(&mut self, output: f32) {
        self(output)
    }
}

/// Map `output` from `[min, max]` onto 0..=100 %.
pub fn power_percent(output: f32, min: f32, max: f32) -> u8 {
    let fraction = (output - min) / (max - min);
    if fraction.is_nan() || fraction <= 0.0 {
        0
    } else if fraction >= 1.0 {
        100
    } else {
        (fraction * 100.0 + 0.5) as u8
    }
}

/// Publishes the output as `HeaterCommand::SetPower` to the heater task.
///
/// The signal holds only the newest command, so a slow heater task always
/// picks up the latest power, including the 0 % an interlock asks for.
pub struct SignalHeater<'a, M: RawMutex> {
    signal: &'a Signal<M, HeaterCommand>,
    out_min: f32,
    out_max: f32,
}

impl<'a, M: RawMutex> SignalHeater<'a, M> {
    /// `limits` are the PID output limits.
    pub fn new(signal: &'a Signal<M, HeaterCommand>, limits: (f32, f32)) -> Self {
        Self {
            signal,
            out_min: limits.0,
            out_max: limits.1,
        }
    }
}

impl<M: RawMutex> Heater for SignalHeater<'_, M> {
    fn set_output(&mut self, output: f32) {
        let power = power_percent(output, self.out_min, self.out_max);
        self.signal.signal(HeaterCommand::SetPower(power));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn maps_output_range_to_percent() {
        assert_eq!(power_percent(0.0, 0.0, 100.0), 0);
        assert_eq!(power_percent(42.4, 0.0, 100.0), 42);
        assert_eq!(power_percent(0.0, -100.0, 100.0), 50);
        assert_eq!(power_percent(150.0, 0.0, 100.0), 100);
        assert_eq!(power_percent(-5.0, 0.0, 100.0), 0);
    }

    #[test]
    fn nan_output_means_off() {
        assert_eq!(power_percent(f32::NAN, 0.0, 100.0), 0);
    }

    #[test]
    fn newest_command_wins() {
        let signal: Signal<NoopRawMutex, HeaterCommand> = Signal::new();
        let mut heater = SignalHeater::new(&signal, (0.0, 100.0));
        heater.set_output(100.0);
        heater.set_output(100.0);
        // Interlock trips before the heater task catches up.
        heater.set_output(0.0);
        assert_eq!(signal.try_take(), Some(HeaterCommand::SetPower(0)));
        assert_eq!(signal.try_take(), None);
    }

    #[test]
    fn signals_power_commands() {
        let signal: Signal<NoopRawMutex, HeaterCommand> = Signal::new();
        let mut heater = SignalHeater::new(&signal, (-100.0, 100.0));
        heater.set_output(50.0);
        assert_eq!(signal.try_take(), Some(HeaterCommand::SetPower(75)));
    }

    #[test]
    fn closures_are_heaters() {
        let mut seen = 0.0;
        {
            let mut sink = |output: f32| seen = output;
            sink.set_output(12.5);
        }
        assert_eq!(seen, 12.5);
    }
}
