//! In-memory transport for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::calibration::{
    AccelCalibration, AxisCalibration, Calibration, CalibrationSource, Colors, StickCalibration,
};
use crate::connection::Transport;
use crate::error::{JoyConError, Result};
use crate::protocol::INPUT_REPORT_SIZE;

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// Replays queued reports and records every write.
///
/// With `hang_up_when_drained` the transport reports a lost connection
/// once the queue is empty, otherwise reads time out.
pub struct ScriptedTransport {
    incoming: Mutex<VecDeque<Vec<u8>>>,
    pub written: Mutex<Vec<Vec<u8>>>,
    responder: Option<Responder>,
    hang_up_when_drained: bool,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(reports: Vec<Vec<u8>>, hang_up_when_drained: bool) -> Self {
        Self {
            incoming: Mutex::new(reports.into()),
            written: Mutex::new(Vec::new()),
            responder: None,
            hang_up_when_drained,
            closed: AtomicBool::new(false),
        }
    }

    /// Reports returned by `responder` are queued after every write
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new(Vec::new(), false)
        }
    }

    pub fn push(&self, report: Vec<u8>) {
        self.incoming.lock().unwrap().push_back(report);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.is_closed() {
            return Err(JoyConError::ConnectionLost);
        }
        let next = self.incoming.lock().unwrap().pop_front();
        match next {
            Some(report) => {
                let len = report.len().min(buf.len());
                buf[..len].copy_from_slice(&report[..len]);
                Ok(len)
            }
            None if self.hang_up_when_drained => Err(JoyConError::ConnectionLost),
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
        if let Some(responder) = &self.responder {
            let mut incoming = self.incoming.lock().unwrap();
            incoming.extend(responder(data));
        }
        Ok(data.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Zeroed report with the given tag byte
pub fn tagged_report(tag: u8) -> Vec<u8> {
    let mut report = vec![0u8; INPUT_REPORT_SIZE];
    report[0] = tag;
    report
}

/// 0x21 flash-read reply carrying `data` for `address`
pub fn flash_reply(address: u32, data: &[u8]) -> Vec<u8> {
    let mut report = tagged_report(0x21);
    report[13] = 0x90;
    report[14] = 0x10;
    report[15..19].copy_from_slice(&address.to_le_bytes());
    report[19] = data.len() as u8;
    report[20..20 + data.len()].copy_from_slice(data);
    report
}

/// Centered stick, no deadzone, 1/1024 accelerometer scale
pub fn neutral_calibration() -> Calibration {
    let axis = AxisCalibration {
        center: 0x800,
        max_above_center: 0x600,
        min_below_center: 0x600,
    };
    Calibration {
        colors: Colors::default(),
        stick: StickCalibration {
            horizontal: axis,
            vertical: axis,
        },
        stick_source: CalibrationSource::Factory,
        deadzone: 0,
        accel: AccelCalibration::new([0; 3], [4096; 3]).unwrap(),
        imu_source: CalibrationSource::Factory,
    }
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

/// Flash contents of a left Joy-Con with factory calibration only
pub fn factory_flash() -> HashMap<u32, Vec<u8>> {
    let mut parameters = vec![0u8; 16];
    parameters[3] = 0x10;
    let mut imu = Vec::new();
    for v in [0i16, 0, 0, 4096, 4096, 4096] {
        imu.extend_from_slice(&v.to_le_bytes());
    }
    imu.resize(24, 0);

    HashMap::from([
        (0x6050, vec![0x0A, 0xB9, 0xE6, 0x1E, 0x0A, 0x0A]),
        (0x8012, vec![0xFF; 9]),
        (0x603D, vec![0x00, 0x06, 0x60, 0x00, 0x08, 0x80, 0x00, 0x06, 0x60]),
        (0x6086, parameters),
        (0x8026, vec![0xFF, 0xFF]),
        (0x6020, imu),
    ])
}

/// Transport that answers flash reads from `flash` and acks everything else
pub fn simulated_device(flash: HashMap<u32, Vec<u8>>) -> ScriptedTransport {
    ScriptedTransport::with_responder(move |frame| {
        let subcommand = frame[10];
        if subcommand != 0x10 {
            let mut ack = tagged_report(0x21);
            ack[13] = 0x80;
            ack[14] = subcommand;
            return vec![ack];
        }

        let address = u32::from_le_bytes([frame[11], frame[12], frame[13], frame[14]]);
        let size = usize::from(frame[15]);
        match flash.get(&address) {
            Some(block) => vec![flash_reply(address, &block[..size])],
            None => {
                let mut nack = tagged_report(0x21);
                nack[14] = 0x10;
                vec![nack]
            }
        }
    })
}
