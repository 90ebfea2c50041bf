//! Input report decoding
//!
//! Turns a 49-byte `0x30` full-state report into a [`ControllerStatus`].
//! Decoding is a pure function of the report, the calibration and the
//! controller side; nothing here touches the device.

use serde::Serialize;

use crate::calibration::{unpack_u12_pair, AccelCalibration, Calibration};
use crate::connection::Side;
use crate::error::{JoyConError, Result};
use crate::protocol::{FULL_STATE_TAG, INPUT_REPORT_SIZE};

/// Byte offsets inside a full-state report
mod offset {
    pub const BATTERY: usize = 2;
    pub const RIGHT_BUTTONS: usize = 3;
    pub const SHARED_BUTTONS: usize = 4;
    pub const LEFT_BUTTONS: usize = 5;
    pub const LEFT_STICK: usize = 6;
    pub const RIGHT_STICK: usize = 9;
    pub const IMU: usize = 13;
    pub const IMU_SAMPLE_SIZE: usize = 12;
}

/// Number of accelerometer samples in one report
pub const ACCEL_SAMPLES: usize = 3;

/// One validated full-state report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputReport([u8; INPUT_REPORT_SIZE]);

impl TryFrom<&[u8]> for InputReport {
    type Error = JoyConError;

    fn try_from(data: &[u8]) -> Result<Self> {
        let bytes = <[u8; INPUT_REPORT_SIZE]>::try_from(data).map_err(|_| {
            JoyConError::InvalidReport(format!(
                "expected {} bytes, got {}",
                INPUT_REPORT_SIZE,
                data.len()
            ))
        })?;
        if bytes[0] != FULL_STATE_TAG {
            return Err(JoyConError::InvalidReport(format!(
                "expected tag {:#04x}, got {:#04x}",
                FULL_STATE_TAG, bytes[0]
            )));
        }
        Ok(Self(bytes))
    }
}

impl InputReport {
    pub fn as_bytes(&self) -> &[u8; INPUT_REPORT_SIZE] {
        &self.0
    }

    /// Extract `width` bits starting at `bit` of byte `byte`
    fn bits(&self, byte: usize, bit: u8, width: u8) -> u8 {
        (self.0[byte] >> bit) & (((1u16 << width) - 1) as u8)
    }

    fn flag(&self, byte: usize, bit: u8) -> bool {
        self.bits(byte, bit, 1) == 1
    }

    pub fn battery(&self) -> Battery {
        Battery {
            charging: self.flag(offset::BATTERY, 4),
            level: self.bits(offset::BATTERY, 5, 3),
        }
    }

    pub fn buttons(&self) -> Buttons {
        let r = offset::RIGHT_BUTTONS;
        let s = offset::SHARED_BUTTONS;
        let l = offset::LEFT_BUTTONS;

        Buttons {
            right: RightButtons {
                y: self.flag(r, 0),
                x: self.flag(r, 1),
                b: self.flag(r, 2),
                a: self.flag(r, 3),
                sr: self.flag(r, 4),
                sl: self.flag(r, 5),
                r: self.flag(r, 6),
                zr: self.flag(r, 7),
            },
            shared: SharedButtons {
                minus: self.flag(s, 0),
                plus: self.flag(s, 1),
                r_stick: self.flag(s, 2),
                l_stick: self.flag(s, 3),
                home: self.flag(s, 4),
                capture: self.flag(s, 5),
                charging_grip: self.flag(s, 7),
            },
            left: LeftButtons {
                down: self.flag(l, 0),
                up: self.flag(l, 1),
                right: self.flag(l, 2),
                left: self.flag(l, 3),
                sr: self.flag(l, 4),
                sl: self.flag(l, 5),
                l: self.flag(l, 6),
                zl: self.flag(l, 7),
            },
        }
    }

    /// Raw 12-bit (horizontal, vertical) reading of the stick on `side`
    pub fn raw_stick(&self, side: Side) -> (u16, u16) {
        let start = match side {
            Side::Left => offset::LEFT_STICK,
            Side::Right => offset::RIGHT_STICK,
        };
        unpack_u12_pair([self.0[start], self.0[start + 1], self.0[start + 2]])
    }

    /// Uncalibrated accelerometer sample `index`
    pub fn raw_accel(&self, index: usize) -> Result<[i16; 3]> {
        if index >= ACCEL_SAMPLES {
            return Err(JoyConError::IndexBounds(index));
        }
        Ok(self.raw_accel_sample(index))
    }

    // `index` must be below ACCEL_SAMPLES
    fn raw_accel_sample(&self, index: usize) -> [i16; 3] {
        let base = offset::IMU + index * offset::IMU_SAMPLE_SIZE;
        let axis = |k: usize| {
            let at = base + 2 * k;
            i16::from_le_bytes([self.0[at], self.0[at + 1]])
        };
        [axis(0), axis(1), axis(2)]
    }

    /// Calibrated accelerometer sample `index`.
    ///
    /// Y and Z are negated on right-side controllers, whose sensor is
    /// mounted mirrored.
    pub fn accel(
        &self,
        index: usize,
        calibration: &AccelCalibration,
        side: Side,
    ) -> Result<AccelSample> {
        let raw = self.raw_accel(index)?;
        Ok(calibrate_accel(raw, calibration, side))
    }

    /// Decode every field
    pub fn decode(&self, calibration: &Calibration, side: Side) -> ControllerStatus {
        let (h, v) = self.raw_stick(side);
        let stick = &calibration.stick;
        let position = StickPosition {
            horizontal: stick.horizontal.normalize(h, calibration.deadzone),
            vertical: stick.vertical.normalize(v, calibration.deadzone),
        };
        let analog_sticks = match side {
            Side::Left => AnalogSticks {
                left: position,
                right: StickPosition::default(),
            },
            Side::Right => AnalogSticks {
                left: StickPosition::default(),
                right: position,
            },
        };

        let accel = std::array::from_fn(|index| {
            calibrate_accel(self.raw_accel_sample(index), &calibration.accel, side)
        });

        ControllerStatus {
            battery: self.battery(),
            buttons: self.buttons(),
            analog_sticks,
            accel,
        }
    }
}

fn calibrate_accel(
    [x, y, z]: [i16; 3],
    calibration: &AccelCalibration,
    side: Side,
) -> AccelSample {
    let mirror = match side {
        Side::Left => 1.0,
        Side::Right => -1.0,
    };
    let c = calibration.coefficient;

    AccelSample {
        x: f32::from(x) * c[0],
        y: f32::from(y) * c[1] * mirror,
        z: f32::from(z) * c[2] * mirror,
    }
}

/// Battery state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Battery {
    pub charging: bool,
    /// 0 (empty) to 4 (full)
    pub level: u8,
}

/// Buttons on the right Joy-Con
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RightButtons {
    pub y: bool,
    pub x: bool,
    pub b: bool,
    pub a: bool,
    pub sr: bool,
    pub sl: bool,
    pub r: bool,
    pub zr: bool,
}

/// Buttons reported for either side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SharedButtons {
    pub minus: bool,
    pub plus: bool,
    pub r_stick: bool,
    pub l_stick: bool,
    pub home: bool,
    pub capture: bool,
    pub charging_grip: bool,
}

/// Buttons on the left Joy-Con
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeftButtons {
    pub down: bool,
    pub up: bool,
    pub right: bool,
    pub left: bool,
    pub sr: bool,
    pub sl: bool,
    pub l: bool,
    pub zl: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Buttons {
    pub right: RightButtons,
    pub shared: SharedButtons,
    pub left: LeftButtons,
}

/// Calibrated stick position, roughly -1.0 to 1.0 per axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StickPosition {
    pub horizontal: f32,
    pub vertical: f32,
}

/// Both sticks. The one the controller does not have reads zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AnalogSticks {
    pub left: StickPosition,
    pub right: StickPosition,
}

/// One calibrated accelerometer sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Decoded snapshot of one full-state report
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerStatus {
    pub battery: Battery,
    pub buttons: Buttons,
    pub analog_sticks: AnalogSticks,
    /// Three samples taken 5ms apart, oldest first
    pub accel: [AccelSample; ACCEL_SAMPLES],
}
