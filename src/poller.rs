//! Background polling loop
//!
//! A single worker thread owns the read side of the transport once setup is
//! done. It drops every report that is not a 49-byte `0x30` full-state
//! report, publishes the rest as the latest snapshot and runs the registered
//! update hooks in registration order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::calibration::Calibration;
use crate::connection::{Side, Transport};
use crate::protocol::INPUT_REPORT_SIZE;
use crate::report::{ControllerStatus, InputReport};

/// Callback run by the polling thread for every full-state report
pub type UpdateHook = Arc<dyn Fn(&ControllerStatus) + Send + Sync>;

/// Handle returned by hook registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Registered update hooks
#[derive(Default)]
pub struct Hooks {
    entries: Mutex<Vec<(HookId, UpdateHook)>>,
    next_id: AtomicU64,
}

impl Hooks {
    // Every update is a single push or retain, so a poisoned list is still consistent
    fn entries(&self) -> MutexGuard<'_, Vec<(HookId, UpdateHook)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, hook: UpdateHook) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries().push((id, hook));
        id
    }

    /// Returns false if `id` was not registered
    pub fn unregister(&self, id: HookId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Hooks run without the lock held so they may register or unregister.
    fn snapshot(&self) -> Vec<UpdateHook> {
        self.entries()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect()
    }
}

/// Polling loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Running,
    Stopped,
}

struct Shared {
    latest: RwLock<Option<InputReport>>,
    hooks: Arc<Hooks>,
    running: AtomicBool,
}

/// Handle to the polling thread
pub struct Poller {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn the polling thread.
    ///
    /// `read_timeout` bounds how long a stop request can go unnoticed.
    pub fn start(
        transport: Arc<dyn Transport>,
        calibration: Arc<Calibration>,
        side: Side,
        hooks: Arc<Hooks>,
        read_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            latest: RwLock::new(None),
            hooks,
            running: AtomicBool::new(true),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || {
            poll_reports(
                transport.as_ref(),
                &worker_shared,
                &calibration,
                side,
                read_timeout,
            );
        });

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Copy of the most recent full-state report
    pub fn latest_report(&self) -> Option<InputReport> {
        self.shared.latest.read().ok().and_then(|latest| *latest)
    }

    pub fn state(&self) -> PollState {
        if self.shared.running.load(Ordering::SeqCst) {
            PollState::Running
        } else {
            PollState::Stopped
        }
    }

    /// Ask the loop to exit before its next read
    pub fn request_stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish. Idempotent.
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Polling thread panicked");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_reports(
    transport: &dyn Transport,
    shared: &Shared,
    calibration: &Calibration,
    side: Side,
    read_timeout: Duration,
) {
    let mut buf = [0u8; INPUT_REPORT_SIZE];

    while shared.running.load(Ordering::SeqCst) {
        let bytes_read = match transport.read(&mut buf, read_timeout) {
            Ok(n) => n,
            Err(e) => {
                // A read failing after a stop request is the expected way out
                if shared.running.load(Ordering::SeqCst) {
                    warn!("Joy-Con polling stopped: {}", e);
                }
                break;
            }
        };
        if bytes_read == 0 {
            continue;
        }

        let report = match InputReport::try_from(&buf[..bytes_read]) {
            Ok(report) => report,
            Err(_) => {
                trace!("Discarding report {:#04x} ({} bytes)", buf[0], bytes_read);
                continue;
            }
        };

        if let Ok(mut latest) = shared.latest.write() {
            *latest = Some(report);
        }

        let hooks = shared.hooks.snapshot();
        if hooks.is_empty() {
            continue;
        }
        let status = report.decode(calibration, side);
        for hook in hooks {
            hook(&status);
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    debug!("Polling loop exited");
}
