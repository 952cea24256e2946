//! Mock transport for hardware-free testing

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connector, Transport};
use crate::error::{Error, Result};

/// In-memory device.
///
/// Handles share one state: bytes injected through any handle are read by the open session,
/// and everything the session writes can be inspected from the test. Used as a [`Connector`],
/// every `open()` yields a session handle whose drop is tracked by [`MockTransport::open_sessions`].
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    is_session: bool,
}

#[derive(Default)]
struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    // Single-byte command -> canned reply appended to the read buffer
    replies: HashMap<u8, Vec<u8>>,
    open_sessions: usize,
    fail_open: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            is_session: false,
        }
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Queue `reply` whenever the single-byte command `code` is written
    pub fn reply_to(&self, code: u8, reply: &[u8]) {
        self.inner.lock().replies.insert(code, reply.to_vec());
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Make subsequent `open()` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.lock().fail_open = fail;
    }

    /// Sessions opened through [`Connector::open`] and not yet dropped
    pub fn open_sessions(&self) -> usize {
        self.inner.lock().open_sessions
    }
}

impl Clone for MockTransport {
    // Clones are plain handles, never sessions
    fn clone(&self) -> Self {
        MockTransport {
            inner: self.inner.clone(),
            is_session: false,
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.is_session {
            self.inner.lock().open_sessions -= 1;
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let available = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.write_buffer.extend_from_slice(data);
        if let [code] = data {
            if let Some(reply) = inner.replies.get(code).cloned() {
                inner.read_buffer.extend(reply);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().read_buffer.len())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inner.lock().read_buffer.clear();
        Ok(())
    }
}

impl Connector for MockTransport {
    fn open(&self) -> Result<Box<dyn Transport>> {
        let mut inner = self.inner.lock();
        if inner.fail_open {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock device unplugged",
            )));
        }
        inner.open_sessions += 1;
        Ok(Box::new(MockTransport {
            inner: self.inner.clone(),
            is_session: true,
        }))
    }

    fn describe(&self) -> String {
        "mock device".to_string()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
