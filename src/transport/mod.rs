//! Transport layer for the controller command path
//!
//! The command dispatcher writes through this trait so it can be driven by a
//! real socket in production and by [`mock::MockTransport`] in tests.

use crate::error::Result;

pub mod mock;
mod tcp;
pub use tcp::TcpTransport;

/// Write side of a controller connection
pub trait Transport: Send {
    /// Write all bytes
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Close the underlying connection (best-effort)
    fn shutdown(&mut self) {}

    /// Human-readable peer description for logs
    fn peer(&self) -> String {
        "unknown".to_string()
    }
}
