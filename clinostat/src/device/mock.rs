use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use crate::device::link::Transport;

#[derive(Default)]
struct Script {
    replies: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    unplugged: bool,
}

/// In-memory stand-in for a serial port: hands out queued reply bytes and
/// records every write call. Reads on an empty queue time out.
#[derive(Clone, Default)]
pub(crate) struct ScriptedPort {
    script: Arc<Mutex<Script>>,
}

impl ScriptedPort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(&self, bytes: &[u8]) -> &Self {
        self.script.lock().unwrap().replies.extend(bytes);
        self
    }

    pub(crate) fn unplug(&self) {
        self.script.lock().unwrap().unplugged = true;
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.script.lock().unwrap().writes.clone()
    }

    pub(crate) fn pending_replies(&self) -> usize {
        self.script.lock().unwrap().replies.len()
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut script = self.script.lock().unwrap();
        if script.unplugged {
            return Err(std::io::Error::other("device unplugged"));
        }
        if script.replies.is_empty() {
            return Err(ErrorKind::TimedOut.into());
        }
        let n = buf.len().min(script.replies.len());
        for (slot, byte) in buf.iter_mut().zip(script.replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut script = self.script.lock().unwrap();
        if script.unplugged {
            return Err(std::io::Error::other("device unplugged"));
        }
        script.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedPort {}
