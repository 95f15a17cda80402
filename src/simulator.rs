//! Simulated oven for running the controller on a host.
//!
//! [`OvenModel`] is a lumped thermal model heated by a power percentage.
//! [`SensorBoard`] stands in for the MAX6675 converters: it hands out an
//! SPI bus and chip-select lines that answer with frames encoding whatever
//! temperature was last stored for each channel.

use core::cell::RefCell;
use core::convert::Infallible;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::spi::ErrorKind;

use crate::max6675::encode_temperature;
use crate::{AMBIENT_TEMPERATURE, MAX_CHANNELS};

/// Frame read while no converter drives the bus.
const FLOATING_BUS: u16 = 0xFFFF;

/// Lumped thermal model of the oven chamber.
#[derive(Debug, Clone, Copy)]
pub struct OvenModel {
    temperature: f32,
    pub ambient: f32,
    /// Heating rate at 100 % power with no losses (°C/s)
    pub max_heating_rate: f32,
    /// Heat loss per degree above ambient (1/s)
    pub heat_loss: f32,
    /// Fraction of the net heat that ends up in the chamber (0-1)
    pub thermal_mass: f32,
}

impl Default for OvenModel {
    fn default() -> Self {
        Self {
            temperature: AMBIENT_TEMPERATURE,
            ambient: AMBIENT_TEMPERATURE,
            max_heating_rate: 6.0,
            heat_loss: 0.01,
            thermal_mass: 0.8,
        }
    }
}

impl OvenModel {
    /// Advance the model by `dt_s` seconds at `power` percent.
    pub fn step(&mut self, power: u8, dt_s: f32) -> f32 {
        let power_fraction = power.min(100) as f32 / 100.0;
        let heat_input = self.max_heating_rate * power_fraction;
        // Newton's law of cooling
        let heat_loss = self.heat_loss * (self.temperature - self.ambient);

        self.temperature += (heat_input - heat_loss) * self.thermal_mass * dt_s;
        if self.temperature < self.ambient {
            self.temperature = self.ambient;
        }
        self.temperature
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

struct Board {
    selected: Option<usize>,
    frames: [u16; MAX_CHANNELS],
}

/// Simulated thermocouple converters sharing one bus.
pub struct SensorBoard<M: RawMutex> {
    inner: Mutex<M, RefCell<Board>>,
}

impl<M: RawMutex> SensorBoard<M> {
    /// Every channel starts out unplugged.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Board {
                selected: None,
                frames: [0; MAX_CHANNELS],
            })),
        }
    }

    pub fn set_temperature(&self, channel: usize, celsius: f32) {
        self.set_frame(channel, encode_temperature(celsius));
    }

    /// Make `channel` answer with an open-thermocouple frame.
    pub fn disconnect(&self, channel: usize) {
        self.set_frame(channel, 0x0004);
    }

    pub fn set_frame(&self, channel: usize, frame: u16) {
        self.inner.lock(|board| {
            if let Some(slot) = board.borrow_mut().frames.get_mut(channel) {
                *slot = frame;
            }
        });
    }

    pub fn spi(&self) -> SimulatedSpi<'_, M> {
        SimulatedSpi { board: self }
    }

    pub fn chip_select(&self, channel: usize) -> SimulatedChipSelect<'_, M> {
        SimulatedChipSelect {
            board: self,
            channel,
        }
    }

    fn selected_frame(&self) -> u16 {
        self.inner.lock(|board| {
            let board = board.borrow();
            board
                .selected
                .and_then(|channel| board.frames.get(channel).copied())
                .unwrap_or(FLOATING_BUS)
        })
    }
}

impl<M: RawMutex> Default for SensorBoard<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SimulatedSpi<'a, M: RawMutex> {
    board: &'a SensorBoard<M>,
}

impl<M: RawMutex> embedded_hal::spi::ErrorType for SimulatedSpi<'_, M> {
    type Error = ErrorKind;
}

impl<M: RawMutex> embedded_hal_async::spi::SpiBus for SimulatedSpi<'_, M> {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        let frame = self.board.selected_frame().to_be_bytes();
        for (i, word) in words.iter_mut().enumerate() {
            *word = frame.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }

    async fn write(&mut self, _words: &[u8]) -> Result<(), ErrorKind> {
        Ok(())
    }

    async fn transfer(&mut self, read: &mut [u8], _write: &[u8]) -> Result<(), ErrorKind> {
        self.read(read).await
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        self.read(words).await
    }

    async fn flush(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

pub struct SimulatedChipSelect<'a, M: RawMutex> {
    board: &'a SensorBoard<M>,
    channel: usize,
}

impl<M: RawMutex> embedded_hal::digital::ErrorType for SimulatedChipSelect<'_, M> {
    type Error = Infallible;
}

impl<M: RawMutex> embedded_hal::digital::OutputPin for SimulatedChipSelect<'_, M> {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.board
            .inner
            .lock(|board| board.borrow_mut().selected = Some(self.channel));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.board.inner.lock(|board| {
            let mut board = board.borrow_mut();
            if board.selected == Some(self.channel) {
                board.selected = None;
            }
        });
        Ok(())
    }
}
