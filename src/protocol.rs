//! Subcommand protocol
//!
//! Output frames are `[0x01][counter][8 rumble bytes][subcommand][argument]`.
//! Replies come back as `0x21` input reports on the same channel as the
//! `0x30` full-state reports, so a blocking request/response exchange is only
//! possible while nothing else reads the transport. [`CommandChannel`] is
//! that setup-phase handle; it is consumed by [`CommandChannel::into_output`]
//! before polling starts, leaving only the write-only [`OutputChannel`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::calibration::FlashReader;
use crate::connection::Transport;
use crate::error::{JoyConError, Result};

/// Report ID of a rumble + subcommand output report
pub const OUTPUT_REPORT_ID: u8 = 0x01;
/// Input report tag of a subcommand reply
pub const SUBCOMMAND_REPLY_TAG: u8 = 0x21;
/// Input report tag of a full-state report
pub const FULL_STATE_TAG: u8 = 0x30;
/// Size of every input report read from the device
pub const INPUT_REPORT_SIZE: usize = 49;
/// Rumble data that leaves both motors idle
pub const NEUTRAL_RUMBLE: [u8; 8] = [0x00, 0x01, 0x40, 0x40, 0x00, 0x01, 0x40, 0x40];
/// Largest flash read a single reply can carry
pub const MAX_FLASH_READ: u8 = 0x1D;

/// Offset of the ack byte in a subcommand reply
const ACK_OFFSET: usize = 13;
/// Leading payload bytes of an acknowledged flash read
const FLASH_REPLY_MARKER: [u8; 2] = [0x90, 0x10];

/// Subcommand codes
pub mod subcommand {
    pub const SET_INPUT_REPORT_MODE: u8 = 0x03;
    pub const SET_HCI_STATE: u8 = 0x06;
    pub const SPI_FLASH_READ: u8 = 0x10;
    pub const ENABLE_IMU: u8 = 0x40;
}

/// 4-bit global packet number, wraps modulo 16
#[derive(Debug, Default)]
pub struct PacketCounter(AtomicU8);

impl PacketCounter {
    /// Returns the number for the next frame and advances the counter
    pub fn next(&self) -> u8 {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n + 1) & 0x0F))
            .unwrap_or_else(|n| n)
    }

    pub fn current(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build a subcommand output report
pub fn build_output_report(packet_number: u8, subcommand: u8, argument: &[u8]) -> Vec<u8> {
    let mut report = Vec::with_capacity(11 + argument.len());
    report.push(OUTPUT_REPORT_ID);
    report.push(packet_number & 0x0F);
    report.extend_from_slice(&NEUTRAL_RUMBLE);
    report.push(subcommand);
    report.extend_from_slice(argument);
    report
}

/// Reply to a subcommand. `payload` starts at the ack byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcommandReply {
    pub ack: bool,
    pub payload: Vec<u8>,
}

fn write_subcommand(
    transport: &dyn Transport,
    counter: &PacketCounter,
    subcommand: u8,
    argument: &[u8],
) -> Result<()> {
    let report = build_output_report(counter.next(), subcommand, argument);
    trace!("-> subcommand {:#04x} {:02x?}", subcommand, argument);
    transport.write(&report)?;
    Ok(())
}

/// Request/response channel, valid only until polling starts
pub struct CommandChannel {
    transport: Arc<dyn Transport>,
    counter: PacketCounter,
    reply_timeout: Duration,
}

impl CommandChannel {
    pub fn new(transport: Arc<dyn Transport>, reply_timeout: Duration) -> Self {
        Self {
            transport,
            counter: PacketCounter::default(),
            reply_timeout,
        }
    }

    /// Send a subcommand without waiting for its reply
    pub fn send(&self, subcommand: u8, argument: &[u8]) -> Result<()> {
        write_subcommand(self.transport.as_ref(), &self.counter, subcommand, argument)
    }

    /// Send a subcommand and block until a `0x21` reply arrives.
    ///
    /// Reports with any other tag are discarded. Validating the echoed
    /// subcommand and payload is left to the caller.
    pub fn send_subcommand(&self, subcommand: u8, argument: &[u8]) -> Result<SubcommandReply> {
        self.send(subcommand, argument)?;

        let deadline = Instant::now() + self.reply_timeout;
        let mut buf = [0u8; INPUT_REPORT_SIZE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(JoyConError::ReplyTimeout(subcommand));
            }

            let bytes_read = self.transport.read(&mut buf, remaining)?;
            if bytes_read == 0 {
                continue;
            }
            if buf[0] != SUBCOMMAND_REPLY_TAG {
                trace!("Discarding report {:#04x} while awaiting reply", buf[0]);
                continue;
            }
            if bytes_read <= ACK_OFFSET {
                return Err(JoyConError::UnexpectedReply {
                    subcommand,
                    reason: format!("reply too short: {} bytes", bytes_read),
                });
            }

            let ack = buf[ACK_OFFSET] & 0x80 != 0;
            return Ok(SubcommandReply {
                ack,
                payload: buf[ACK_OFFSET..bytes_read].to_vec(),
            });
        }
    }

    /// Read `size` bytes of SPI flash starting at `address`
    pub fn read_flash(&self, address: u32, size: u8) -> Result<Vec<u8>> {
        if size > MAX_FLASH_READ {
            return Err(JoyConError::FlashReadTooLarge(size));
        }

        let mut argument = address.to_le_bytes().to_vec();
        argument.push(size);

        let reply = self.send_subcommand(subcommand::SPI_FLASH_READ, &argument)?;
        if !reply.ack {
            return Err(JoyConError::FlashReadNacked(address));
        }
        if reply.payload.get(..2) != Some(&FLASH_REPLY_MARKER[..]) {
            return Err(JoyConError::UnexpectedReply {
                subcommand: subcommand::SPI_FLASH_READ,
                reason: format!("missing flash read marker in {:02x?}", reply.payload),
            });
        }

        let echoed = reply.payload.get(2..7).unwrap_or_default();
        if echoed != argument.as_slice() {
            return Err(JoyConError::ProtocolMismatch {
                expected: argument,
                actual: echoed.to_vec(),
            });
        }

        let data = reply
            .payload
            .get(7..7 + usize::from(size))
            .ok_or_else(|| JoyConError::UnexpectedReply {
                subcommand: subcommand::SPI_FLASH_READ,
                reason: format!("flash data truncated, wanted {} bytes", size),
            })?;

        debug!("Flash read @ {:#06x} ({} bytes): {:02x?}", address, size, data);
        Ok(data.to_vec())
    }

    /// Enable the 6-axis sensor, then give the controller time to apply it
    pub fn enable_imu(&self, settle: Duration) -> Result<()> {
        self.send(subcommand::ENABLE_IMU, &[0x01])?;
        thread::sleep(settle);
        Ok(())
    }

    /// Switch the input report format, e.g. to [`FULL_STATE_TAG`]
    pub fn set_input_report_mode(&self, mode: u8) -> Result<()> {
        self.send(subcommand::SET_INPUT_REPORT_MODE, &[mode])
    }

    /// End the setup phase. The returned channel can only write.
    pub fn into_output(self) -> OutputChannel {
        OutputChannel {
            transport: self.transport,
            counter: self.counter,
        }
    }
}

impl FlashReader for CommandChannel {
    fn read_flash(&mut self, address: u32, size: u8) -> Result<Vec<u8>> {
        CommandChannel::read_flash(self, address, size)
    }
}

/// Write-only subcommand channel used while the polling loop owns reads
pub struct OutputChannel {
    transport: Arc<dyn Transport>,
    counter: PacketCounter,
}

impl OutputChannel {
    pub fn send(&self, subcommand: u8, argument: &[u8]) -> Result<()> {
        write_subcommand(self.transport.as_ref(), &self.counter, subcommand, argument)
    }

    /// Ask the controller to drop the connection
    pub fn disconnect_device(&self) -> Result<()> {
        self.send(subcommand::SET_HCI_STATE, &[0x00])
    }

    pub fn packet_number(&self) -> u8 {
        self.counter.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{flash_reply, tagged_report, ScriptedTransport};

    fn channel(reports: Vec<Vec<u8>>) -> (Arc<ScriptedTransport>, CommandChannel) {
        let transport = Arc::new(ScriptedTransport::new(reports, true));
        let channel = CommandChannel::new(transport.clone(), Duration::from_millis(200));
        (transport, channel)
    }

    #[test]
    fn test_output_report_layout() {
        let report = build_output_report(5, 0x10, &[0x50, 0x60, 0x00, 0x00, 0x06]);
        assert_eq!(
            report,
            vec![
                0x01, 0x05, 0x00, 0x01, 0x40, 0x40, 0x00, 0x01, 0x40, 0x40, 0x10, 0x50, 0x60,
                0x00, 0x00, 0x06
            ]
        );
    }

    #[test]
    fn test_packet_counter_wraps() {
        let counter = PacketCounter::default();
        let numbers: Vec<u8> = (0..18).map(|_| counter.next()).collect();
        assert_eq!(&numbers[..3], &[0, 1, 2]);
        assert_eq!(numbers[15], 15);
        assert_eq!(numbers[16], 0);
        assert_eq!(numbers[17], 1);
        assert!(numbers.iter().all(|&n| n <= 15));
    }

    #[test]
    fn test_read_flash_returns_payload() {
        let colors = [0x82, 0x82, 0x82, 0x0F, 0x0F, 0x0F];
        let (transport, channel) = channel(vec![
            tagged_report(0x30),
            tagged_report(0x3F),
            flash_reply(0x6050, &colors),
        ]);

        assert_eq!(channel.read_flash(0x6050, 6).unwrap(), colors.to_vec());

        let written = transport.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0][10..], &[0x10, 0x50, 0x60, 0x00, 0x00, 0x06]);
    }

    #[test]
    fn test_send_subcommand_reports_nack() {
        let mut reply = tagged_report(0x21);
        reply[13] = 0x00;
        reply[14] = 0x40;
        let (_, channel) = channel(vec![reply]);

        let reply = channel.send_subcommand(0x40, &[0x01]).unwrap();
        assert!(!reply.ack);
        assert_eq!(reply.payload.len(), INPUT_REPORT_SIZE - 13);
        assert_eq!(reply.payload[1], 0x40);
    }

    #[test]
    fn test_read_flash_nack() {
        let mut reply = flash_reply(0x6050, &[0; 6]);
        reply[13] = 0x10;
        let (_, channel) = channel(vec![reply]);

        assert!(matches!(
            channel.read_flash(0x6050, 6),
            Err(JoyConError::FlashReadNacked(0x6050))
        ));
    }

    #[test]
    fn test_read_flash_wrong_marker() {
        let mut reply = flash_reply(0x6050, &[0; 6]);
        reply[14] = 0x11;
        let (_, channel) = channel(vec![reply]);

        assert!(matches!(
            channel.read_flash(0x6050, 6),
            Err(JoyConError::UnexpectedReply { subcommand: 0x10, .. })
        ));
    }

    #[test]
    fn test_read_flash_echo_mismatch() {
        let (_, channel) = channel(vec![flash_reply(0x6051, &[0; 6])]);

        match channel.read_flash(0x6050, 6) {
            Err(JoyConError::ProtocolMismatch { expected, actual }) => {
                assert_eq!(expected, vec![0x50, 0x60, 0x00, 0x00, 0x06]);
                assert_eq!(actual, vec![0x51, 0x60, 0x00, 0x00, 0x06]);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_read_flash_rejects_oversized_request() {
        let (transport, channel) = channel(vec![]);
        assert!(matches!(
            channel.read_flash(0x6000, 0x1E),
            Err(JoyConError::FlashReadTooLarge(0x1E))
        ));
        assert!(transport.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reply_wait_surfaces_connection_lost() {
        let (_, channel) = channel(vec![tagged_report(0x30)]);
        assert!(matches!(
            channel.read_flash(0x6050, 6),
            Err(JoyConError::ConnectionLost)
        ));
    }

    #[test]
    fn test_reply_wait_times_out_on_silent_device() {
        let transport = Arc::new(ScriptedTransport::new(vec![], false));
        let channel = CommandChannel::new(transport, Duration::from_millis(20));
        assert!(matches!(
            channel.send_subcommand(0x02, &[]),
            Err(JoyConError::ReplyTimeout(0x02))
        ));
    }

    #[test]
    fn test_output_channel_continues_packet_numbers() {
        let (transport, channel) = channel(vec![]);
        channel.set_input_report_mode(FULL_STATE_TAG).unwrap();
        let output = channel.into_output();
        output.disconnect_device().unwrap();

        let written = transport.written.lock().unwrap();
        assert_eq!(written[0][1], 0);
        assert_eq!(&written[0][10..], &[0x03, 0x30]);
        assert_eq!(written[1][1], 1);
        assert_eq!(&written[1][10..], &[0x06, 0x00]);
        assert_eq!(output.packet_number(), 2);
    }
}
