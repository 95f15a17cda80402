//! Multi-channel MAX6675 bus driver.
//!
//! All converters share one SPI bus; each channel owns a chip-select line
//! (active low). A failed read only affects its own channel.

use core::fmt;

use embassy_time::{with_timeout, Duration};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::spi::SpiBus;

use crate::log::*;
use crate::max6675::{self, FrameFault, FAULT_TEMPERATURE};
use crate::MAX_CHANNELS;

pub type ChannelId = u8;

/// Thermocouple bus driver error
#[derive(Debug)]
pub enum Error<SpiE, PinE> {
    Spi(SpiE),
    Pin(PinE),
    Timeout,
    /// The bus was built with no chip-select lines or more than `MAX_CHANNELS`.
    InvalidBus,
    InvalidChannel,
    UnknownChannel,
    AlreadyRegistered,
    CapacityReached,
    Frame(FrameFault),
    Disconnected,
}

impl<SpiE, PinE> Error<SpiE, PinE> {
    pub fn describe(&self) -> &'static str {
        match self {
            Error::Spi(_) => "SPI error",
            Error::Pin(_) => "chip-select error",
            Error::Timeout => "transfer timed out",
            Error::InvalidBus => "invalid bus",
            Error::InvalidChannel => "invalid channel",
            Error::UnknownChannel => "channel not registered",
            Error::AlreadyRegistered => "channel already registered",
            Error::CapacityReached => "no free channel slot",
            Error::Frame(FrameFault::NoResponse) => "no response",
            Error::Frame(FrameFault::BadDummyBit) => "bad dummy bit",
            Error::Frame(FrameFault::OpenInput) => "thermocouple open",
            Error::Disconnected => "channel disconnected",
        }
    }
}

impl<SpiE: fmt::Debug, PinE: fmt::Debug> fmt::Display for Error<SpiE, PinE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(e) => write!(f, "SPI error: {:?}", e),
            Error::Pin(e) => write!(f, "chip-select error: {:?}", e),
            Error::Frame(fault) => write!(f, "invalid frame: {}", fault),
            other => write!(f, "{}", other.describe()),
        }
    }
}

/// Cached state of one converter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub raw: u16,
    /// Last decoded temperature, `FAULT_TEMPERATURE` while disconnected.
    pub temperature: f32,
    pub connected: bool,
}

impl Channel {
    const fn new(id: ChannelId) -> Self {
        Self {
            id,
            raw: 0,
            temperature: 0.0,
            connected: false,
        }
    }
}

pub struct ThermocoupleBus<SPI, CS, const N: usize> {
    spi: SPI,
    chip_selects: [CS; N],
    channels: [Option<Channel>; N],
    device_count: usize,
    timeout: Duration,
}

impl<SPI, CS, const N: usize> ThermocoupleBus<SPI, CS, N>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    /// Take ownership of the bus and drive every chip-select inactive.
    pub fn new(
        spi: SPI,
        mut chip_selects: [CS; N],
        timeout: Duration,
    ) -> Result<Self, Error<SPI::Error, CS::Error>> {
        if N == 0 || N > MAX_CHANNELS {
            return Err(Error::InvalidBus);
        }
        for cs in chip_selects.iter_mut() {
            cs.set_high().map_err(Error::Pin)?;
        }
        Ok(Self {
            spi,
            chip_selects,
            channels: [None; N],
            device_count: 0,
            timeout,
        })
    }

    /// Register a channel and read it once to validate the wiring.
    ///
    /// The channel stays registered even if that first read fails; it will be
    /// retried on every later read.
    pub async fn add_device(
        &mut self,
        channel: ChannelId,
    ) -> Result<(), Error<SPI::Error, CS::Error>> {
        let index = channel as usize;
        if index >= N {
            return Err(Error::InvalidChannel);
        }
        if self.device_count >= N {
            return Err(Error::CapacityReached);
        }
        if self.channels[index].is_some() {
            return Err(Error::AlreadyRegistered);
        }
        self.channels[index] = Some(Channel::new(channel));
        self.device_count += 1;
        info!("Thermocouple channel {} registered", channel);

        self.read_temperature(channel).await.map(|_| ())
    }

    /// One bus transaction: select, receive 16 bits, deselect, decode.
    pub async fn read_temperature(
        &mut self,
        channel: ChannelId,
    ) -> Result<f32, Error<SPI::Error, CS::Error>> {
        let index = self.registered_index(channel)?;

        if let Err(e) = self.chip_selects[index].set_low() {
            self.record(index, None, Err(()));
            return Err(Error::Pin(e));
        }

        let mut buf = [0u8; 2];
        let spi = &mut self.spi;
        let transfer = async {
            spi.read(&mut buf).await?;
            spi.flush().await
        };
        let outcome = with_timeout(self.timeout, transfer).await;
        let deselect = self.chip_selects[index].set_high();

        let result = match (outcome, deselect) {
            (Err(_), _) => Err(Error::Timeout),
            (Ok(Err(e)), _) => Err(Error::Spi(e)),
            (Ok(Ok(())), Err(e)) => Err(Error::Pin(e)),
            (Ok(Ok(())), Ok(())) => {
                let raw = max6675::frame_from_bytes(buf);
                let decoded = max6675::decode_frame(raw);
                self.record(index, Some(raw), decoded.map_err(|_| ()));
                return decoded.map_err(Error::Frame);
            }
        };
        self.record(index, None, Err(()));
        result
    }

    /// Read every registered channel. Failures are logged and leave the
    /// channel disconnected; the returned list holds the good readings.
    pub async fn read_all(&mut self) -> heapless::Vec<(ChannelId, f32), N> {
        let mut readings = heapless::Vec::new();
        for index in 0..N {
            let Some(channel) = self.channels[index].map(|c| c.id) else {
                continue;
            };
            match self.read_temperature(channel).await {
                Ok(temperature) => {
                    // Capacity is N, one entry per channel.
                    let _ = readings.push((channel, temperature));
                }
                Err(e) => warn!("Thermocouple {} read failed: {}", channel, e.describe()),
            }
        }
        readings
    }

    /// Cached temperature, only while the channel is connected.
    pub fn get_temperature(&self, channel: ChannelId) -> Result<f32, Error<SPI::Error, CS::Error>> {
        let index = self.registered_index(channel)?;
        match self.channels[index] {
            Some(c) if c.connected => Ok(c.temperature),
            _ => Err(Error::Disconnected),
        }
    }

    pub fn is_connected(&self, channel: ChannelId) -> bool {
        self.channel(channel).map(|c| c.connected).unwrap_or(false)
    }

    pub fn channel(&self, channel: ChannelId) -> Option<&Channel> {
        self.channels.get(channel as usize).and_then(|c| c.as_ref())
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    fn registered_index(&self, channel: ChannelId) -> Result<usize, Error<SPI::Error, CS::Error>> {
        let index = channel as usize;
        if index >= N {
            return Err(Error::InvalidChannel);
        }
        if self.channels[index].is_none() {
            return Err(Error::UnknownChannel);
        }
        Ok(index)
    }

    fn record(&mut self, index: usize, raw: Option<u16>, decoded: Result<f32, ()>) {
        if let Some(channel) = self.channels[index].as_mut() {
            if let Some(raw) = raw {
                channel.raw = raw;
            }
            match decoded {
                Ok(temperature) => {
                    channel.temperature = temperature;
                    channel.connected = true;
                }
                Err(()) => {
                    channel.temperature = FAULT_TEMPERATURE;
                    channel.connected = false;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{bus, push, Response};
    use super::*;
    use crate::max6675::encode_temperature;
    use embassy_futures::block_on;

    const TIMEOUT: Duration = Duration::from_millis(20);

    #[test]
    fn new_deasserts_all_chip_selects() {
        let mock = bus::<3>(0);
        let levels = mock.levels.clone();
        let _bus = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        assert!(levels.borrow().iter().all(|high| *high));
    }

    #[test]
    fn add_device_validates_channel() {
        let mock = bus::<2>(encode_temperature(25.0));
        let mut sensors = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        assert!(matches!(
            block_on(sensors.add_device(2)),
            Err(Error::InvalidChannel)
        ));
        block_on(sensors.add_device(0)).unwrap();
        assert!(matches!(
            block_on(sensors.add_device(0)),
            Err(Error::AlreadyRegistered)
        ));
        block_on(sensors.add_device(1)).unwrap();
        assert_eq!(sensors.device_count(), 2);
        assert_eq!(sensors.get_temperature(1).unwrap(), 25.0);
    }

    #[test]
    fn add_device_reports_bad_wiring_but_stays_registered() {
        let mock = bus::<1>(0xFFFF);
        let fallback = mock.fallback.clone();
        let mut sensors = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        assert!(matches!(
            block_on(sensors.add_device(0)),
            Err(Error::Frame(FrameFault::BadDummyBit))
        ));
        assert!(!sensors.is_connected(0));

        fallback.borrow_mut()[0] = encode_temperature(30.0);
        assert_eq!(block_on(sensors.read_temperature(0)).unwrap(), 30.0);
        assert!(sensors.is_connected(0));
    }

    #[test]
    fn decodes_and_caches_reading() {
        let mock = bus::<1>(400 << 3);
        let levels = mock.levels.clone();
        let mut sensors = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        assert_eq!(sensors.get_temperature(0).unwrap(), 100.0);
        assert_eq!(sensors.channel(0).unwrap().raw, 400 << 3);
        assert!(levels.borrow()[0]);
    }

    #[test]
    fn zero_frame_marks_disconnected() {
        let mock = bus::<1>(encode_temperature(50.0));
        let mut sensors = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        push(&mock.scripts, 0, Response::Frame(0x0000));
        assert!(block_on(sensors.read_temperature(0)).is_err());
        assert!(!sensors.is_connected(0));
        assert_eq!(sensors.channel(0).unwrap().temperature, FAULT_TEMPERATURE);
        assert!(matches!(sensors.get_temperature(0), Err(Error::Disconnected)));
    }

    #[test]
    fn spi_failure_is_per_channel() {
        let mock = bus::<2>(encode_temperature(80.0));
        let scripts = mock.scripts.clone();
        let levels = mock.levels.clone();
        let mut sensors = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        block_on(sensors.add_device(0)).unwrap();
        block_on(sensors.add_device(1)).unwrap();

        push(&scripts, 0, Response::Fail);
        let readings = block_on(sensors.read_all());
        assert_eq!(readings.as_slice(), &[(1, 80.0)]);
        assert!(!sensors.is_connected(0));
        assert!(sensors.is_connected(1));
        // Chip-select released even after a failed transfer.
        assert!(levels.borrow().iter().all(|high| *high));

        // Recovered on the next read.
        let readings = block_on(sensors.read_all());
        assert_eq!(readings.len(), 2);
    }

    #[test]
    fn hung_transfer_times_out() {
        let mock = bus::<1>(encode_temperature(60.0));
        let scripts = mock.scripts.clone();
        let levels = mock.levels.clone();
        let mut sensors = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        block_on(sensors.add_device(0)).unwrap();

        push(&scripts, 0, Response::Hang);
        assert!(matches!(
            block_on(sensors.read_temperature(0)),
            Err(Error::Timeout)
        ));
        assert!(!sensors.is_connected(0));
        assert!(levels.borrow()[0]);
    }

    #[test]
    fn unregistered_channel_rejected() {
        let mock = bus::<2>(encode_temperature(25.0));
        let mut sensors = ThermocoupleBus::new(mock.spi, mock.pins, TIMEOUT).unwrap();
        assert!(matches!(
            block_on(sensors.read_temperature(1)),
            Err(Error::UnknownChannel)
        ));
        assert!(!sensors.is_connected(7));
    }
}
