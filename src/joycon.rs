//! Joy-Con session
//!
//! Ties the layers together in the only safe order: open the transport, run
//! every request/response exchange, then hand the read side to the polling
//! thread. After that the session can still send write-only subcommands.

use std::sync::Arc;

use tracing::{debug, info};

use crate::calibration::{Calibration, Colors};
use crate::config::DriverConfig;
use crate::connection::{self, DeviceIdentity, Side, Transport};
use crate::error::Result;
use crate::poller::{HookId, Hooks, PollState, Poller};
use crate::protocol::{CommandChannel, OutputChannel, FULL_STATE_TAG};
use crate::report::{ControllerStatus, InputReport};

/// Connected, calibrated and polling controller
pub struct JoyCon {
    identity: DeviceIdentity,
    calibration: Arc<Calibration>,
    transport: Arc<dyn Transport>,
    output: OutputChannel,
    hooks: Arc<Hooks>,
    poller: Poller,
    closed: bool,
}

impl JoyCon {
    /// Open the HID device for `identity` and run setup
    pub fn open(identity: DeviceIdentity, config: &DriverConfig) -> Result<Self> {
        let transport = connection::open(&identity)?;
        Self::with_transport(identity, Arc::new(transport), config)
    }

    /// Run setup over an already open transport and start polling.
    ///
    /// If any setup step fails the transport is closed and no polling
    /// thread is started.
    pub fn with_transport(
        identity: DeviceIdentity,
        transport: Arc<dyn Transport>,
        config: &DriverConfig,
    ) -> Result<Self> {
        let side = identity.side();
        let mut channel = CommandChannel::new(Arc::clone(&transport), config.reply_timeout());

        let calibration = match Self::setup(&mut channel, side, config) {
            Ok(calibration) => Arc::new(calibration),
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        let output = channel.into_output();
        let hooks = Arc::new(Hooks::default());
        let poller = Poller::start(
            Arc::clone(&transport),
            Arc::clone(&calibration),
            side,
            Arc::clone(&hooks),
            config.read_timeout(),
        );

        info!("{} ready", identity.model());

        Ok(Self {
            identity,
            calibration,
            transport,
            output,
            hooks,
            poller,
            closed: false,
        })
    }

    fn setup(
        channel: &mut CommandChannel,
        side: Side,
        config: &DriverConfig,
    ) -> Result<Calibration> {
        let calibration = Calibration::load(channel, side)?;

        if config.enable_imu {
            channel.enable_imu(config.sensor_settle())?;
        }
        channel.set_input_report_mode(FULL_STATE_TAG)?;

        Ok(calibration)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn is_left(&self) -> bool {
        self.identity.is_left()
    }

    pub fn is_right(&self) -> bool {
        self.identity.is_right()
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn colors(&self) -> Colors {
        self.calibration.colors
    }

    /// Most recent full-state report, undecoded
    pub fn latest_report(&self) -> Option<InputReport> {
        self.poller.latest_report()
    }

    /// Decode the most recent report. `None` until the first one arrives.
    pub fn status(&self) -> Option<ControllerStatus> {
        self.latest_report()
            .map(|report| report.decode(&self.calibration, self.identity.side()))
    }

    /// Run `hook` on the polling thread for every full-state report.
    ///
    /// Hooks run sequentially in registration order; a slow hook delays
    /// polling.
    pub fn register_update_hook<F>(&self, hook: F) -> HookId
    where
        F: Fn(&ControllerStatus) + Send + Sync + 'static,
    {
        self.hooks.register(Arc::new(hook))
    }

    pub fn unregister_update_hook(&self, id: HookId) -> bool {
        self.hooks.unregister(id)
    }

    pub fn poll_state(&self) -> PollState {
        self.poller.state()
    }

    /// Ask the controller to disconnect itself
    pub fn disconnect_device(&self) -> Result<()> {
        self.output.disconnect_device()
    }

    /// Stop polling and release the device. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.poller.request_stop();
        self.transport.close();
        self.poller.stop();
        self.closed = true;
        debug!("Joy-Con connection closed");
    }
}

impl Drop for JoyCon {
    fn drop(&mut self) {
        self.close();
    }
}
