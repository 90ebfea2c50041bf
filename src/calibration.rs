//! Calibration store
//!
//! Reads stick, deadzone and accelerometer calibration out of the
//! controller's SPI flash once during setup. User calibration wins when
//! present; otherwise the factory block is used.

use serde::Serialize;
use tracing::debug;

use crate::connection::Side;
use crate::error::{JoyConError, Result};
use crate::protocol::subcommand;

/// SPI flash addresses
pub mod address {
    pub const COLORS: u32 = 0x6050;
    pub const IMU_FACTORY: u32 = 0x6020;
    pub const LEFT_STICK_FACTORY: u32 = 0x603D;
    pub const RIGHT_STICK_FACTORY: u32 = 0x6046;
    pub const LEFT_STICK_PARAMETERS: u32 = 0x6086;
    pub const RIGHT_STICK_PARAMETERS: u32 = 0x6098;
    pub const LEFT_STICK_USER: u32 = 0x8012;
    pub const RIGHT_STICK_USER: u32 = 0x801D;
    pub const IMU_USER_MARKER: u32 = 0x8026;
    pub const IMU_USER: u32 = 0x8028;
}

/// Magic found at [`address::IMU_USER_MARKER`] when user IMU calibration exists
pub const IMU_USER_MARKER: [u8; 2] = [0xB2, 0xA1];

/// Source of flash bytes. Implemented by the setup-phase command channel.
pub trait FlashReader {
    fn read_flash(&mut self, address: u32, size: u8) -> Result<Vec<u8>>;
}

/// Unpack two 12-bit values from three bytes (low byte first, nibble shared)
pub fn unpack_u12_pair(bytes: [u8; 3]) -> (u16, u16) {
    let first = u16::from(bytes[0]) | (u16::from(bytes[1] & 0x0F) << 8);
    let second = u16::from(bytes[1] >> 4) | (u16::from(bytes[2]) << 4);
    (first, second)
}

/// Inverse of [`unpack_u12_pair`]. Values are truncated to 12 bits.
pub fn pack_u12_pair(first: u16, second: u16) -> [u8; 3] {
    let first = first & 0x0FFF;
    let second = second & 0x0FFF;
    [
        (first & 0xFF) as u8,
        ((first >> 8) as u8) | (((second & 0x0F) as u8) << 4),
        (second >> 4) as u8,
    ]
}

fn triple(bytes: &[u8], start: usize) -> [u8; 3] {
    [bytes[start], bytes[start + 1], bytes[start + 2]]
}

fn read_exact<R, const N: usize>(reader: &mut R, address: u32) -> Result<[u8; N]>
where
    R: FlashReader + ?Sized,
{
    let size = u8::try_from(N).map_err(|_| JoyConError::FlashReadTooLarge(u8::MAX))?;
    let data = reader.read_flash(address, size)?;
    <[u8; N]>::try_from(data.as_slice()).map_err(|_| JoyConError::UnexpectedReply {
        subcommand: subcommand::SPI_FLASH_READ,
        reason: format!(
            "flash read @ {:#06x} returned {} bytes, wanted {}",
            address,
            data.len(),
            N
        ),
    })
}

/// Where a calibration block was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationSource {
    User,
    Factory,
}

/// Body and button colors, RGB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Colors {
    pub body: [u8; 3],
    pub buttons: [u8; 3],
}

impl Colors {
    pub fn from_flash(bytes: &[u8; 6]) -> Self {
        Self {
            body: triple(bytes, 0),
            buttons: triple(bytes, 3),
        }
    }
}

/// Calibration of one stick axis, in raw 12-bit units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AxisCalibration {
    pub center: u16,
    pub max_above_center: u16,
    pub min_below_center: u16,
}

impl AxisCalibration {
    /// Map a raw reading to roughly [-1, 1].
    ///
    /// Readings closer to center than `deadzone` are exactly 0.
    pub fn normalize(&self, raw: u16, deadzone: u16) -> f32 {
        let diff = i32::from(raw) - i32::from(self.center);
        if diff.unsigned_abs() < u32::from(deadzone) || diff == 0 {
            return 0.0;
        }

        let range = if diff > 0 {
            self.max_above_center
        } else {
            self.min_below_center
        };
        diff as f32 / f32::from(range.max(1))
    }
}

/// Calibration of the controller's one stick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StickCalibration {
    pub horizontal: AxisCalibration,
    pub vertical: AxisCalibration,
}

impl StickCalibration {
    /// Decode a 9-byte flash block.
    ///
    /// The block holds three packed (x, y) pairs. Left sticks store them as
    /// (max above, center, min below); right sticks as (center, min below,
    /// max above).
    pub fn from_flash(bytes: &[u8; 9], side: Side) -> Self {
        let pairs = [
            unpack_u12_pair(triple(bytes, 0)),
            unpack_u12_pair(triple(bytes, 3)),
            unpack_u12_pair(triple(bytes, 6)),
        ];
        let (max_above, center, min_below) = match side {
            Side::Left => (pairs[0], pairs[1], pairs[2]),
            Side::Right => (pairs[2], pairs[0], pairs[1]),
        };

        Self {
            horizontal: AxisCalibration {
                center: center.0,
                max_above_center: max_above.0,
                min_below_center: min_below.0,
            },
            vertical: AxisCalibration {
                center: center.1,
                max_above_center: max_above.1,
                min_below_center: min_below.1,
            },
        }
    }

    /// Encode back into the flash layout for `side`
    pub fn to_flash(&self, side: Side) -> [u8; 9] {
        let h = &self.horizontal;
        let v = &self.vertical;
        let max_above = pack_u12_pair(h.max_above_center, v.max_above_center);
        let center = pack_u12_pair(h.center, v.center);
        let min_below = pack_u12_pair(h.min_below_center, v.min_below_center);
        let ordered = match side {
            Side::Left => [max_above, center, min_below],
            Side::Right => [center, min_below, max_above],
        };

        let mut bytes = [0u8; 9];
        for (chunk, pair) in bytes.chunks_exact_mut(3).zip(ordered) {
            chunk.copy_from_slice(&pair);
        }
        bytes
    }
}

const AXES: [char; 3] = ['x', 'y', 'z'];

/// Accelerometer calibration. Samples are scaled by `coefficient` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccelCalibration {
    pub offset: [i16; 3],
    pub coefficient: [f32; 3],
}

impl AccelCalibration {
    /// `coefficient = 4.0 / (reference - offset)` per axis
    pub fn new(offset: [i16; 3], reference: [i16; 3]) -> Result<Self> {
        let mut coefficient = [0.0f32; 3];
        for axis in 0..3 {
            let span = i32::from(reference[axis]) - i32::from(offset[axis]);
            if span == 0 {
                return Err(JoyConError::DegenerateAccelCalibration(AXES[axis]));
            }
            coefficient[axis] = 4.0 / span as f32;
        }

        Ok(Self {
            offset,
            coefficient,
        })
    }

    /// Decode the 24-byte IMU calibration block. Only the first 12 bytes
    /// (accelerometer offsets and reference values) are used.
    pub fn from_flash(bytes: &[u8; 24]) -> Result<Self> {
        let value = |i: usize| i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        Self::new(
            [value(0), value(1), value(2)],
            [value(3), value(4), value(5)],
        )
    }
}

impl Default for AccelCalibration {
    fn default() -> Self {
        Self {
            offset: [0; 3],
            coefficient: [4.0; 3],
        }
    }
}

/// Everything read from flash during setup. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calibration {
    pub colors: Colors,
    pub stick: StickCalibration,
    pub stick_source: CalibrationSource,
    pub deadzone: u16,
    pub accel: AccelCalibration,
    pub imu_source: CalibrationSource,
}

impl Calibration {
    /// Read the full calibration set for a controller on `side`.
    ///
    /// Any flash read failure aborts the load.
    pub fn load<R: FlashReader + ?Sized>(reader: &mut R, side: Side) -> Result<Self> {
        let colors = Colors::from_flash(&read_exact::<_, 6>(reader, address::COLORS)?);

        let (stick, stick_source) = Self::load_stick(reader, side)?;

        let parameters_address = match side {
            Side::Left => address::LEFT_STICK_PARAMETERS,
            Side::Right => address::RIGHT_STICK_PARAMETERS,
        };
        let parameters = read_exact::<_, 16>(reader, parameters_address)?;
        let deadzone = (u16::from(parameters[4] & 0x0F) << 8) | u16::from(parameters[3]);

        let (accel, imu_source) = Self::load_accel(reader)?;

        debug!(
            "Calibration loaded: stick from {:?}, imu from {:?}, deadzone {}",
            stick_source, imu_source, deadzone
        );

        Ok(Self {
            colors,
            stick,
            stick_source,
            deadzone,
            accel,
            imu_source,
        })
    }

    fn load_stick<R: FlashReader + ?Sized>(
        reader: &mut R,
        side: Side,
    ) -> Result<(StickCalibration, CalibrationSource)> {
        let (user_address, factory_address) = match side {
            Side::Left => (address::LEFT_STICK_USER, address::LEFT_STICK_FACTORY),
            Side::Right => (address::RIGHT_STICK_USER, address::RIGHT_STICK_FACTORY),
        };

        let user = read_exact::<_, 9>(reader, user_address)?;
        if user.iter().any(|&b| b != 0xFF) {
            return Ok((StickCalibration::from_flash(&user, side), CalibrationSource::User));
        }

        let factory = read_exact::<_, 9>(reader, factory_address)?;
        Ok((
            StickCalibration::from_flash(&factory, side),
            CalibrationSource::Factory,
        ))
    }

    fn load_accel<R: FlashReader + ?Sized>(
        reader: &mut R,
    ) -> Result<(AccelCalibration, CalibrationSource)> {
        let marker = read_exact::<_, 2>(reader, address::IMU_USER_MARKER)?;
        let (source, block_address) = if marker == IMU_USER_MARKER {
            (CalibrationSource::User, address::IMU_USER)
        } else {
            (CalibrationSource::Factory, address::IMU_FACTORY)
        };

        let block = read_exact::<_, 24>(reader, block_address)?;
        Ok((AccelCalibration::from_flash(&block)?, source))
    }
}
