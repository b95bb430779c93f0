//! TCP transport implementation

use super::Transport;
use crate::error::Result;
use std::io::Write;
use std::net::{Shutdown, TcpStream};

/// Write half of the controller socket
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap a cloned handle of the accepted stream
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY: {}", e);
        }
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> String {
        self.stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "disconnected".to_string())
    }
}
