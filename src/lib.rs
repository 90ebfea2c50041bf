//! Joy-Con HID driver
//!
//! Opens a Joy-Con or Pro Controller over hidapi, reads its calibration out
//! of SPI flash with the subcommand protocol, then decodes the `0x30`
//! full-state reports streamed by the controller on a background thread.

pub mod calibration;
pub mod config;
pub mod connection;
pub mod error;
pub mod joycon;
pub mod poller;
pub mod protocol;
pub mod report;

#[cfg(test)]
mod testing;

pub use error::{JoyConError, Result};
pub use joycon::JoyCon;
