//! Command dispatcher - single writer towards the controller
//!
//! Matches resolve from several threads (identification callers, the
//! deadline scheduler), so every write goes through one mutex. A failed send
//! is terminal for that slot: the item has moved past the point of control by
//! the time a retry could happen.

use crate::error::{Error, Result};
use crate::protocol::encode_sort_command;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Attached transport tagged with its connection id
struct Attached {
    id: u64,
    transport: Box<dyn Transport>,
}

/// Serialized writer for sort commands
#[derive(Default)]
pub struct CommandDispatcher {
    current: Mutex<Option<Attached>>,
    next_id: AtomicU64,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new controller connection, closing any previous one
    ///
    /// Returns the connection id to pass to [`Self::detach_connection`].
    pub fn attach(&self, transport: Box<dyn Transport>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut current = self.current.lock();
        if let Some(mut old) = current.take() {
            log::info!("Replacing controller connection {}", old.transport.peer());
            old.transport.shutdown();
        }
        log::debug!("Dispatcher attached to {} (conn {})", transport.peer(), id);
        *current = Some(Attached { id, transport });
        id
    }

    /// Detach the connection `id` if it is still the current one
    ///
    /// Returns false when a newer connection already replaced it.
    pub fn detach_connection(&self, id: u64) -> bool {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|a| a.id == id) {
            if let Some(mut old) = current.take() {
                old.transport.shutdown();
            }
            true
        } else {
            false
        }
    }

    /// Detach and close whatever connection is attached
    pub fn detach(&self) {
        if let Some(mut old) = self.current.lock().take() {
            log::debug!("Dispatcher detached from {}", old.transport.peer());
            old.transport.shutdown();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Encode and write a sort command, then flush
    pub fn send_sort_command(&self, slot: u16, chute: u8) -> Result<()> {
        let frame = encode_sort_command(slot, chute);
        let mut guard = self.current.lock();
        let transport = &mut guard.as_mut().ok_or(Error::NotConnected)?.transport;

        transport.write_all(&frame)?;
        transport.flush()?;

        log::debug!("Sort command sent: slot={} chute={}", slot, chute);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_send_without_connection() {
        let dispatcher = CommandDispatcher::new();
        assert!(matches!(
            dispatcher.send_sort_command(1, 2),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_send_writes_frame() {
        let dispatcher = CommandDispatcher::new();
        let mock = MockTransport::new();
        dispatcher.attach(Box::new(mock.clone()));

        dispatcher.send_sort_command(7, 5).unwrap();
        assert_eq!(
            mock.written_frames(),
            vec![[0xF9, 0x11, 0x00, 0x07, 0x00, 0x00, 0x05, 0xFF]]
        );
    }

    #[test]
    fn test_attach_closes_previous() {
        let dispatcher = CommandDispatcher::new();
        let first = MockTransport::new();
        let second = MockTransport::new();

        dispatcher.attach(Box::new(first.clone()));
        dispatcher.attach(Box::new(second.clone()));
        dispatcher.send_sort_command(3, 4).unwrap();

        assert!(first.is_closed());
        assert!(first.get_written().is_empty());
        assert_eq!(second.written_frames().len(), 1);
    }

    #[test]
    fn test_stale_detach_keeps_newer_connection() {
        let dispatcher = CommandDispatcher::new();
        let old_id = dispatcher.attach(Box::new(MockTransport::new()));
        let newer = MockTransport::new();
        let new_id = dispatcher.attach(Box::new(newer.clone()));

        assert!(!dispatcher.detach_connection(old_id));
        assert!(dispatcher.is_connected());
        assert!(dispatcher.detach_connection(new_id));
        assert!(newer.is_closed());
    }

    #[test]
    fn test_detach() {
        let dispatcher = CommandDispatcher::new();
        let mock = MockTransport::new();
        dispatcher.attach(Box::new(mock.clone()));
        dispatcher.detach();

        assert!(!dispatcher.is_connected());
        assert!(mock.is_closed());
    }
}
