//! Error taxonomy shared by every layer of the driver

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JoyConError {
    /// Opening the HID device failed. Fatal, never retried.
    #[error("Joy-Con connect failed: {0}")]
    ConnectionFailed(#[source] hidapi::HidError),

    #[error("Not a supported controller: vendor {vendor_id:#06x}, product {product_id:#06x}")]
    InvalidIdentity { vendor_id: u16, product_id: u16 },

    /// The transport stopped delivering reports (unplugged, closed, read error).
    #[error("Connection lost")]
    ConnectionLost,

    #[error("HID write error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("Flash read of {0} bytes exceeds the 0x1d byte frame limit")]
    FlashReadTooLarge(u8),

    #[error("Flash read @ {0:#06x}: got NACK")]
    FlashReadNacked(u32),

    #[error("Unexpected reply to subcommand {subcommand:#04x}: {reason}")]
    UnexpectedReply { subcommand: u8, reason: String },

    #[error("Flash reply echoed {actual:02x?}, expected {expected:02x?}")]
    ProtocolMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error("Timed out waiting for reply to subcommand {0:#04x}")]
    ReplyTimeout(u8),

    #[error("Accelerometer calibration for axis {0} has coefficient equal to offset")]
    DegenerateAccelCalibration(char),

    #[error("Sample index {0} out of range, expected 0..=2")]
    IndexBounds(usize),

    #[error("Invalid report received: {0}")]
    InvalidReport(String),
}

pub type Result<T> = std::result::Result<T, JoyConError>;
