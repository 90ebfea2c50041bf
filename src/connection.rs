//! Joy-Con connection layer
//!
//! Owns the raw HID handle. Everything above this module talks to the
//! controller through the [`Transport`] trait so the protocol and polling
//! code can run against an in-memory device in tests.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{JoyConError, Result};

/// Nintendo vendor ID
pub const NINTENDO_VENDOR_ID: u16 = 0x057E;
/// Joy-Con (L) product ID
pub const JOYCON_L_PRODUCT_ID: u16 = 0x2006;
/// Joy-Con (R) product ID
pub const JOYCON_R_PRODUCT_ID: u16 = 0x2007;
/// Pro Controller product ID
pub const PRO_CONTROLLER_PRODUCT_ID: u16 = 0x2009;

/// Supported controller models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Model {
    JoyConLeft,
    JoyConRight,
    ProController,
}

impl Model {
    pub fn from_product_id(product_id: u16) -> Option<Self> {
        match product_id {
            JOYCON_L_PRODUCT_ID => Some(Model::JoyConLeft),
            JOYCON_R_PRODUCT_ID => Some(Model::JoyConRight),
            PRO_CONTROLLER_PRODUCT_ID => Some(Model::ProController),
            _ => None,
        }
    }

    pub fn product_id(self) -> u16 {
        match self {
            Model::JoyConLeft => JOYCON_L_PRODUCT_ID,
            Model::JoyConRight => JOYCON_R_PRODUCT_ID,
            Model::ProController => PRO_CONTROLLER_PRODUCT_ID,
        }
    }

    /// Flash layout and sensor orientation family. Only the left Joy-Con
    /// uses the left-hand layout.
    pub fn side(self) -> Side {
        match self {
            Model::JoyConLeft => Side::Left,
            Model::JoyConRight | Model::ProController => Side::Right,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::JoyConLeft => write!(f, "Joy-Con (L)"),
            Model::JoyConRight => write!(f, "Joy-Con (R)"),
            Model::ProController => write!(f, "Pro Controller"),
        }
    }
}

/// Which calibration addresses, stick and IMU orientation apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Vendor/product/serial triple naming one physical controller.
///
/// Validated on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    vendor_id: u16,
    model: Model,
    serial: Option<String>,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, serial: Option<String>) -> Result<Self> {
        let model = Model::from_product_id(product_id)
            .filter(|_| vendor_id == NINTENDO_VENDOR_ID)
            .ok_or(JoyConError::InvalidIdentity {
                vendor_id,
                product_id,
            })?;

        Ok(Self {
            vendor_id,
            model,
            serial,
        })
    }

    pub fn from_model(model: Model, serial: Option<String>) -> Self {
        Self {
            vendor_id: NINTENDO_VENDOR_ID,
            model,
            serial,
        }
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.model.product_id()
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn side(&self) -> Side {
        self.model.side()
    }

    pub fn is_left(&self) -> bool {
        self.model == Model::JoyConLeft
    }

    pub fn is_right(&self) -> bool {
        self.model == Model::JoyConRight
    }
}

/// Byte-stream channel to one controller.
///
/// Reads return whole HID reports. A read that returns `Ok(0)` timed out
/// without data; any read on a closed or unplugged device fails with
/// [`JoyConError::ConnectionLost`]. `close` must be idempotent.
pub trait Transport: Send + Sync {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn write(&self, data: &[u8]) -> Result<usize>;
    fn close(&self);
}

/// hidapi-backed transport
pub struct HidTransport {
    device: Mutex<Option<HidDevice>>,
}

impl HidTransport {
    pub fn new(device: HidDevice) -> Self {
        Self {
            device: Mutex::new(Some(device)),
        }
    }
}

impl Transport for HidTransport {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let guard = self.device.lock().map_err(|_| JoyConError::ConnectionLost)?;
        let device = guard.as_ref().ok_or(JoyConError::ConnectionLost)?;
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        device.read_timeout(buf, timeout_ms).map_err(|e| {
            debug!("HID read failed: {}", e);
            JoyConError::ConnectionLost
        })
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let guard = self.device.lock().map_err(|_| JoyConError::ConnectionLost)?;
        let device = guard.as_ref().ok_or(JoyConError::ConnectionLost)?;
        Ok(device.write(data)?)
    }

    fn close(&self) {
        if let Ok(mut device) = self.device.lock() {
            if device.take().is_some() {
                debug!("HID device closed");
            }
        }
    }
}

/// Open the controller named by `identity`
pub fn open(identity: &DeviceIdentity) -> Result<HidTransport> {
    let api = HidApi::new().map_err(JoyConError::ConnectionFailed)?;

    let device = match identity.serial() {
        Some(serial) => api.open_serial(identity.vendor_id(), identity.product_id(), serial),
        None => api.open(identity.vendor_id(), identity.product_id()),
    }
    .map_err(JoyConError::ConnectionFailed)?;

    info!(
        "Connected to {} (serial: {})",
        identity.model(),
        identity.serial().unwrap_or("unknown")
    );

    Ok(HidTransport::new(device))
}
