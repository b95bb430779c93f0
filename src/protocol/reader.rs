//! Byte-stream to frame resynchronization
//!
//! TCP delivers a byte stream, not discrete messages. The reader scans for the
//! marker byte, waits for a full 8 bytes, then validates. A frame that fails
//! validation only consumes its marker byte so the scan can pick up a real
//! marker that may be hidden inside the rejected bytes.
//!
//! Create one reader per connection; leftover bytes from a dropped connection
//! must never leak into the next one.

use super::constants::{FRAME_LEN, FRAME_MARKER, READ_CHUNK_SIZE, STREAM_BUFFER_SIZE};
use super::frame::Frame;
use super::ring_buffer::RingBuffer;
use crate::error::{Error, Result};
use std::io::Read;

/// Result of pulling one chunk from the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// n bytes were buffered
    Data(usize),
    /// Read timed out with nothing available
    Idle,
    /// Peer closed the stream (zero-length read)
    Closed,
}

/// Ring-buffer based frame reader
pub struct FrameReader {
    buffer: RingBuffer<STREAM_BUFFER_SIZE>,
    /// Frames dropped for failing validation
    rejected: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: RingBuffer::new(),
            rejected: 0,
        }
    }

    /// Read one chunk from the stream into the buffer
    pub fn fill_from<R: Read>(&mut self, stream: &mut R) -> Result<ReadStatus> {
        let mut temp_buf = [0u8; READ_CHUNK_SIZE];
        match stream.read(&mut temp_buf) {
            Ok(0) => Ok(ReadStatus::Closed),
            Ok(n) => {
                self.extend(&temp_buf[..n]);
                Ok(ReadStatus::Data(n))
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(ReadStatus::Idle)
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(ReadStatus::Idle),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Append raw bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        let kept = self.buffer.extend(bytes);
        if kept < bytes.len() {
            log::warn!(
                "Stream buffer full, dropped {} bytes",
                bytes.len() - kept
            );
        }
    }

    /// Extract the next valid frame, if one is complete
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let Some(marker_idx) = self.buffer.find_byte(FRAME_MARKER) else {
                // Nothing resembling a frame start, everything buffered is noise
                if !self.buffer.is_empty() {
                    log::trace!("Discarding {} bytes without marker", self.buffer.len());
                    self.buffer.clear();
                }
                return None;
            };

            if marker_idx > 0 {
                log::debug!("Skipping {} bytes to resync on marker", marker_idx);
                self.buffer.advance(marker_idx);
            }

            let raw: [u8; FRAME_LEN] = self.buffer.copy_array(0)?;

            match Frame::decode(&raw) {
                Ok(frame) => {
                    self.buffer.advance(FRAME_LEN);
                    return Some(frame);
                }
                Err(e) => {
                    log::warn!("Dropping frame {:02X?}: {}", raw, e);
                    self.rejected += 1;
                    // Only skip the marker - the length is not trustworthy
                    self.buffer.advance(1);
                }
            }
        }
    }

    /// Number of frames dropped for failing validation
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Bytes waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
