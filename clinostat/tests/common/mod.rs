#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clinostat::{Clinostat, NullNotifier, SerialLink, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Sent(Vec<u8>),
    Received(u8),
}

#[derive(Default)]
struct Firmware {
    wire: Vec<WireEvent>,
    pending: VecDeque<u8>,
    running: bool,
    unplugged: bool,
}

impl Firmware {
    fn react(&mut self, frame: &[u8]) {
        let Some(&opcode) = frame.first() else {
            return;
        };
        match opcode {
            0x01 => {
                self.running = true;
                self.pending.push_back(0x03);
            }
            0x03 | 0x04 => {
                if self.running {
                    self.pending.extend([0x04, 0x05]);
                }
                self.running = false;
            }
            0x05 => {
                self.running = true;
                self.pending.push_back(0x03);
            }
            0x06 => self.pending.push_back(if self.running { 0x06 } else { 0x08 }),
            0x07 => self.pending.push_back(0x01),
            0x08 => self.running = false,
            0x09 => self.pending.push_back(0x09),
            _ => {}
        }
    }
}

/// Behaves like the controller firmware and logs every byte crossing the wire.
/// Each read is delayed so that concurrent callers get a chance to collide.
#[derive(Clone)]
pub struct SimulatedController {
    firmware: Arc<Mutex<Firmware>>,
    latency: Duration,
}

impl SimulatedController {
    pub fn new() -> Self {
        SimulatedController {
            firmware: Arc::default(),
            latency: Duration::from_millis(5),
        }
    }

    pub fn running() -> Self {
        let controller = Self::new();
        controller.firmware.lock().unwrap().running = true;
        controller
    }

    pub fn unplug(&self) {
        self.firmware.lock().unwrap().unplugged = true;
    }

    pub fn wire(&self) -> Vec<WireEvent> {
        self.firmware.lock().unwrap().wire.clone()
    }

    pub fn device(&self) -> Clinostat {
        Clinostat::new(SerialLink::from_transport("simulated", self.clone()), Arc::new(NullNotifier))
    }
}

impl Read for SimulatedController {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        thread::sleep(self.latency);
        let mut firmware = self.firmware.lock().unwrap();
        if firmware.unplugged {
            return Err(std::io::Error::other("device unplugged"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        match firmware.pending.pop_front() {
            Some(byte) => {
                firmware.wire.push(WireEvent::Received(byte));
                buf[0] = byte;
                Ok(1)
            }
            None => Err(ErrorKind::TimedOut.into()),
        }
    }
}

impl Write for SimulatedController {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut firmware = self.firmware.lock().unwrap();
        if firmware.unplugged {
            return Err(std::io::Error::other("device unplugged"));
        }
        firmware.wire.push(WireEvent::Sent(buf.to_vec()));
        firmware.react(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedController {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.firmware.lock().unwrap().pending.clear();
        Ok(())
    }
}
