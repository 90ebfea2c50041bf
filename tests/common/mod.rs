//! Simulated controller shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use joycon_cmd::connection::Transport;
use joycon_cmd::{JoyConError, Result};

pub const REPORT_SIZE: usize = 49;

/// Answers flash reads from an in-memory flash image, acks every other
/// subcommand and serves queued full-state reports once setup is done.
pub struct SimulatedController {
    flash: HashMap<u32, Vec<u8>>,
    incoming: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl SimulatedController {
    pub fn new(flash: HashMap<u32, Vec<u8>>) -> Self {
        Self {
            flash,
            incoming: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, report: Vec<u8>) {
        self.incoming.lock().unwrap().push_back(report);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// Subcommand byte of every frame written so far
    pub fn subcommands(&self) -> Vec<u8> {
        self.written().iter().map(|frame| frame[10]).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reply_to(&self, frame: &[u8]) -> Vec<u8> {
        let subcommand = frame[10];
        let mut reply = report(0x21);
        reply[14] = subcommand;
        if subcommand != 0x10 {
            reply[13] = 0x80;
            return reply;
        }

        let address = u32::from_le_bytes([frame[11], frame[12], frame[13], frame[14]]);
        let size = usize::from(frame[15]);
        if let Some(block) = self.flash.get(&address) {
            reply[13] = 0x90;
            reply[15..20].copy_from_slice(&frame[11..16]);
            reply[20..20 + size].copy_from_slice(&block[..size]);
        }
        reply
    }
}

impl Transport for SimulatedController {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.is_closed() {
            return Err(JoyConError::ConnectionLost);
        }
        match self.incoming.lock().unwrap().pop_front() {
            Some(report) => {
                let len = report.len().min(buf.len());
                buf[..len].copy_from_slice(&report[..len]);
                Ok(len)
            }
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(2)));
                Ok(0)
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(JoyConError::ConnectionLost);
        }
        self.written.lock().unwrap().push(data.to_vec());
        let reply = self.reply_to(data);
        self.incoming.lock().unwrap().push_back(reply);
        Ok(data.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Zeroed report with the given tag byte
pub fn report(tag: u8) -> Vec<u8> {
    let mut report = vec![0u8; REPORT_SIZE];
    report[0] = tag;
    report
}

fn imu_block(offset: [i16; 3], reference: [i16; 3]) -> Vec<u8> {
    let mut block = Vec::with_capacity(24);
    for v in offset.iter().chain(reference.iter()) {
        block.extend_from_slice(&v.to_le_bytes());
    }
    block.resize(24, 0);
    block
}

/// Left Joy-Con with a user stick calibration and factory IMU calibration
pub fn left_flash() -> HashMap<u32, Vec<u8>> {
    let mut parameters = vec![0u8; 16];
    parameters[3] = 0xAE;
    parameters[4] = 0x00;

    HashMap::from([
        (0x6050, vec![0x0A, 0xB9, 0xE6, 0x1E, 0x0A, 0x0A]),
        // (max above, center, min below) = (0x600, 0x800, 0x600) on both axes
        (0x8012, vec![0x00, 0x06, 0x60, 0x00, 0x08, 0x80, 0x00, 0x06, 0x60]),
        (0x603D, vec![0x00, 0x05, 0x50, 0x00, 0x07, 0x70, 0x00, 0x05, 0x50]),
        (0x6086, parameters),
        (0x8026, vec![0xFF, 0xFF]),
        (0x6020, imu_block([0, 0, 0], [4096, 4096, 4096])),
    ])
}

/// Right Joy-Con with factory stick calibration and user IMU calibration
pub fn right_flash() -> HashMap<u32, Vec<u8>> {
    let mut parameters = vec![0u8; 16];
    parameters[3] = 0x00;
    parameters[4] = 0x01;

    HashMap::from([
        (0x6050, vec![0x1E, 0xDC, 0x00, 0x00, 0x1E, 0x1E]),
        (0x801D, vec![0xFF; 9]),
        // (center, min below, max above) = (0x800, 0x400, 0x500)
        (0x6046, vec![0x00, 0x08, 0x80, 0x00, 0x04, 0x40, 0x00, 0x05, 0x50]),
        (0x6098, parameters),
        (0x8026, vec![0xB2, 0xA1]),
        (0x8028, imu_block([100, 100, 100], [2148, 2148, 2148])),
        (0x6020, imu_block([0, 0, 0], [4096, 4096, 4096])),
    ])
}

/// Poll `condition` for up to two seconds
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
