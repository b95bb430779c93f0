//! Mock transport for testing

use super::Transport;
use crate::error::{Error, Result};
use crate::protocol::constants::FRAME_LEN;
use parking_lot::Mutex;
use std::sync::Arc;

/// Mock transport that records everything written to it
///
/// Clones share the same buffer, so a test keeps one handle and gives the
/// other to the dispatcher.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    write_buffer: Vec<u8>,
    fail_writes: bool,
    closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Written data split into 8-byte frames
    pub fn written_frames(&self) -> Vec<[u8; FRAME_LEN]> {
        self.inner
            .lock()
            .write_buffer
            .chunks_exact(FRAME_LEN)
            .map(|c| {
                let mut frame = [0u8; FRAME_LEN];
                frame.copy_from_slice(c);
                frame
            })
            .collect()
    }

    /// Make subsequent writes fail with a broken pipe
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes || inner.closed {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        inner.write_buffer.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {
        self.inner.lock().closed = true;
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }
}
