//! MAX6675 thermocouple-to-digital frame decoding.
//!
//! The converter is read-only: one chip-select cycle clocks out a single
//! 16-bit frame, MSB first.
//!
//! ```text
//!  D15   D14..D3        D2     D1   D0
//!  dummy temperature    open   id   reserved
//! ```

use core::fmt;

/// Temperature bits D14..D3
pub const TEMPERATURE_MASK: u16 = 0x7FF8;
pub const TEMPERATURE_SHIFT: u16 = 3;

/// Scaling factor for the temperature field (°C/LSB)
pub const TEMP_SCALE: f32 = 0.25;

/// Temperature recorded for a channel that failed its last read.
pub const FAULT_TEMPERATURE: f32 = -404.0;

bitflags::bitflags! {
    /// Status bits sharing the frame with the temperature field
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        /// Always reads 0 on a healthy bus.
        const DUMMY      = 0x8000;
        /// Set when the thermocouple input is open.
        const OPEN_INPUT = 0x0004;
        const DEVICE_ID  = 0x0002;
        const RESERVED   = 0x0001;
    }
}

/// Why a frame was not accepted as a temperature reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameFault {
    /// All-zero frame: nothing answered on the bus.
    NoResponse,
    /// Dummy bit set, the bus is floating or garbled.
    BadDummyBit,
    /// Thermocouple not attached.
    OpenInput,
}

impl fmt::Display for FrameFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFault::NoResponse => write!(f, "no response"),
            FrameFault::BadDummyBit => write!(f, "dummy bit set"),
            FrameFault::OpenInput => write!(f, "thermocouple open"),
        }
    }
}

/// Assemble the two received bytes into a frame.
pub fn frame_from_bytes(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

pub fn flags(raw: u16) -> FrameFlags {
    FrameFlags::from_bits_truncate(raw)
}

/// Decode one raw frame into degrees Celsius.
pub fn decode_frame(raw: u16) -> Result<f32, FrameFault> {
    if raw == 0x0000 {
        return Err(FrameFault::NoResponse);
    }
    let flags = flags(raw);
    if flags.contains(FrameFlags::DUMMY) {
        return Err(FrameFault::BadDummyBit);
    }
    if flags.contains(FrameFlags::OPEN_INPUT) {
        return Err(FrameFault::OpenInput);
    }
    let counts = (raw & TEMPERATURE_MASK) >> TEMPERATURE_SHIFT;
    Ok(counts as f32 * TEMP_SCALE)
}

/// Build the frame a healthy converter would send for `celsius`. Used by
/// simulated buses.
pub fn encode_temperature(celsius: f32) -> u16 {
    let counts = if celsius <= 0.0 {
        0
    } else {
        let scaled = celsius / TEMP_SCALE + 0.5;
        if scaled >= 4095.0 {
            4095
        } else {
            scaled as u16
        }
    };
    counts << TEMPERATURE_SHIFT
}
