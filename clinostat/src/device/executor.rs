use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};

use crate::device::{Clinostat, DeviceMode};
use crate::errors::CommunicationError;
use crate::notify::{Headline, Notify, Severity};

struct Slot {
    /// Ticket currently allowed to touch the device.
    serving: u64,
    /// Tickets whose worker never started.
    abandoned: BTreeSet<u64>,
    device: Option<Clinostat>,
}

struct Shared {
    slot: Mutex<Slot>,
    turn: Condvar,
    next_ticket: AtomicU64,
    notifier: Arc<dyn Notify>,
}

/// Exclusive access to the device for one ticket. Dropping it hands the link
/// to the next ticket, unwinding included.
struct Turn<'a> {
    slot: MutexGuard<'a, Slot>,
    turn: &'a Condvar,
}
impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let slot = &mut *self.slot;
        slot.serving += 1;
        while slot.abandoned.remove(&slot.serving) {
            slot.serving += 1;
        }
        self.turn.notify_all();
    }
}

impl Shared {
    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn wait_turn(&self, ticket: u64) -> Turn<'_> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        while slot.serving != ticket {
            slot = self.turn.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
        Turn { slot, turn: &self.turn }
    }

    fn abandon(&self, ticket: u64) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.serving == ticket {
            drop(Turn { slot, turn: &self.turn });
        } else {
            slot.abandoned.insert(ticket);
        }
    }

    fn run<T, F>(&self, ticket: u64, job: F) -> Result<T, CommunicationError>
    where
        F: FnOnce(&mut Clinostat) -> Result<T, CommunicationError>,
    {
        let mut turn = self.wait_turn(ticket);
        debug!("Serial command {ticket} holds the link");
        let result = match turn.slot.device.as_mut() {
            Some(device) => match panic::catch_unwind(AssertUnwindSafe(|| job(device))) {
                Ok(result) => result,
                Err(_) => {
                    error!("Serial command {ticket} panicked");
                    Err(CommunicationError::Panicked)
                }
            },
            None => Err(CommunicationError::NotConnected),
        };
        if result.is_err() {
            if let Some(mut device) = turn.slot.device.take() {
                warn!("Dropping connection to {} after a failed command", device.port_name());
                device.disconnect();
            }
        }
        result
    }
}

/// Runs protocol calls on worker threads, one at a time and in the order they
/// were submitted, so no two commands ever share the wire.
///
/// A command that fails with a [`CommunicationError`] costs the connection: the
/// device is closed and dropped before the failure callback runs.
#[derive(Clone)]
pub struct CommandExecutor {
    shared: Arc<Shared>,
}

impl CommandExecutor {
    pub fn new(notifier: Arc<dyn Notify>) -> Self {
        CommandExecutor {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    serving: 0,
                    abandoned: BTreeSet::new(),
                    device: None,
                }),
                turn: Condvar::new(),
                next_ticket: AtomicU64::new(0),
                notifier,
            }),
        }
    }

    pub fn with_device(device: Clinostat, notifier: Arc<dyn Notify>) -> Self {
        let executor = Self::new(notifier);
        executor.attach(device);
        executor
    }

    /// Queues `job` behind every command submitted before it and runs it on a
    /// fresh thread. Exactly one of `on_success` or `on_failure` is called, after
    /// the link has been released.
    pub fn execute<T, F, S, E>(&self, job: F, on_success: S, on_failure: E) -> std::io::Result<JoinHandle<()>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Clinostat) -> Result<T, CommunicationError> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CommunicationError) + Send + 'static,
    {
        let ticket = self.shared.ticket();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("serial-command-{ticket}"))
            .spawn(move || match shared.run(ticket, job) {
                Ok(value) => on_success(value),
                Err(err) => {
                    shared.notifier.notify(Headline::Serial, Severity::Error, &err.to_string());
                    on_failure(err);
                }
            });
        match spawned {
            Ok(handle) => Ok(handle),
            Err(err) => {
                error!("Failed to spawn worker for serial command {ticket}: {err}");
                self.shared.abandon(ticket);
                Err(err)
            }
        }
    }

    // The methods below take a turn on the calling thread, so they block until
    // every command submitted earlier has finished.

    /// Installs `device`, closing the one attached before.
    pub fn attach(&self, device: Clinostat) {
        let mut turn = self.shared.wait_turn(self.shared.ticket());
        if let Some(mut previous) = turn.slot.device.replace(device) {
            previous.disconnect();
        }
    }

    /// Closes and drops the attached device. Returns whether there was one.
    pub fn detach(&self) -> bool {
        let mut turn = self.shared.wait_turn(self.shared.ticket());
        match turn.slot.device.take() {
            Some(mut device) => {
                device.disconnect();
                true
            }
            None => false,
        }
    }

    /// Drops the attached device without sending Disconnect, so the controller
    /// keeps running the last command. Returns whether there was one.
    pub fn release(&self) -> bool {
        let mut turn = self.shared.wait_turn(self.shared.ticket());
        match turn.slot.device.take() {
            Some(mut device) => {
                device.release();
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.wait_turn(self.shared.ticket()).slot.device.is_some()
    }

    pub fn mode(&self) -> Option<DeviceMode> {
        let turn = self.shared.wait_turn(self.shared.ticket());
        turn.slot.device.as_ref().map(Clinostat::mode)
    }
}
