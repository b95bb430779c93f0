//! Controller connection manager
//!
//! Owns the TCP listener the conveyor controller connects to. Only one
//! controller is served at a time: when a new client connects while another
//! is attached, the old stream is closed first and its disconnect is reported
//! before the new connect.
//!
//! # Lifecycle
//!
//! ```text
//!  Idle ──start()──▶ Listening ──accept──▶ Connected
//!                       ▲                      │
//!                       └────── disconnect ────┘
//!  any ──stop()──▶ Stopped
//! ```
//!
//! # Threads
//!
//! - `controller-accept`: non-blocking accept loop polling every 10ms
//! - `controller-rx`: one per connection, blocking reads with a 500ms timeout
//!   so the running flag is observed, frames handed to a [`FrameHandler`]
//!
//! A zero-length read or socket error closes the stream, detaches the
//! command dispatcher, publishes `connected = false` and leaves the accept
//! loop listening for the next controller.

mod router;

pub use router::ProtocolRouter;

use crate::dispatcher::CommandDispatcher;
use crate::error::{Error, Result};
use crate::protocol::constants::{ACCEPT_POLL_MS, SOCKET_READ_TIMEOUT_MS};
use crate::protocol::{Frame, FrameReader, ReadStatus};
use crate::transport::TcpTransport;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receives every valid frame from the controller
pub trait FrameHandler: Send + Sync {
    fn handle_frame(&self, frame: Frame);
}

/// Connection manager lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not started yet
    Idle,
    /// Bound and waiting for a controller
    Listening,
    /// A controller is attached
    Connected,
    /// Stopped; cannot be restarted
    Stopped,
}

/// Published on every connect/disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub connected: bool,
    pub peer: Option<SocketAddr>,
}

/// Currently attached controller
struct ActiveConnection {
    id: u64,
    peer: SocketAddr,
    /// Clone of the read stream, kept to force-close it
    stream: TcpStream,
}

/// State shared with the accept and receive threads
struct ServerShared {
    running: AtomicBool,
    state: Mutex<ServerState>,
    active: Mutex<Option<ActiveConnection>>,
    subscribers: Mutex<Vec<Sender<ConnectionEvent>>>,
    receivers: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Arc<CommandDispatcher>,
    handler: Arc<dyn FrameHandler>,
}

/// Single-controller TCP server
pub struct ConnectionManager {
    shared: Arc<ServerShared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ConnectionManager {
    pub fn new(dispatcher: Arc<CommandDispatcher>, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                running: AtomicBool::new(false),
                state: Mutex::new(ServerState::Idle),
                active: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                receivers: Mutex::new(Vec::new()),
                dispatcher,
                handler,
            }),
            accept_thread: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind the listener and start accepting controllers
    ///
    /// Fails with [`Error::Bind`] if the address is invalid or the port is
    /// taken. Port 0 picks a free port; see [`Self::local_addr`].
    pub fn start(&self, address: &str, port: u16) -> Result<SocketAddr> {
        {
            let state = self.shared.state.lock();
            if *state != ServerState::Idle {
                return Err(Error::InvalidState(format!(
                    "cannot start connection manager in state {:?}",
                    *state
                )));
            }
        }

        let bind_err = |source| Error::Bind {
            address: format!("{}:{}", address, port),
            source,
        };
        let listener = TcpListener::bind((address, port)).map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;
        if let Err(e) = listener.set_nonblocking(true) {
            log::warn!("Failed to set nonblocking mode: {}", e);
        }

        self.shared.running.store(true, Ordering::Relaxed);
        *self.shared.state.lock() = ServerState::Listening;
        *self.local_addr.lock() = Some(local);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("controller-accept".to_string())
            .spawn(move || accept_loop(listener, shared))
            .map_err(|source| {
                self.shared.running.store(false, Ordering::Relaxed);
                *self.shared.state.lock() = ServerState::Stopped;
                Error::ThreadSpawn {
                    name: "controller-accept",
                    source,
                }
            })?;
        *self.accept_thread.lock() = Some(handle);

        log::info!("Controller listener on {}", local);
        Ok(local)
    }

    /// Stop accepting, close the controller connection and join threads
    ///
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == ServerState::Stopped {
                return;
            }
            *state = ServerState::Stopped;
        }
        log::info!("Stopping connection manager...");
        self.shared.running.store(false, Ordering::Relaxed);

        if let Some(handle) = self.accept_thread.lock().take()
            && handle.join().is_err()
        {
            log::error!("Accept thread panicked");
        }

        self.shared.close_active();

        let receivers: Vec<_> = self.shared.receivers.lock().drain(..).collect();
        for handle in receivers {
            if handle.join().is_err() {
                log::error!("Receive thread panicked");
            }
        }

        log::info!("Connection manager stopped");
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.active.lock().is_some()
    }

    /// Address the listener is bound to (after `start`)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Subscribe to connect/disconnect events
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ServerShared {
    fn publish(&self, event: ConnectionEvent) {
        log::debug!("Connection state changed: {:?}", event);
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }

    /// Tear down connection `id` if it is still the active one
    fn finish_connection(&self, id: u64) {
        let peer = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(conn) if conn.id == id => {}
                // Replaced or already closed by stop()
                _ => return,
            }
            let Some(conn) = active.take() else {
                return;
            };
            let _ = conn.stream.shutdown(Shutdown::Both);
            self.dispatcher.detach_connection(id);
            conn.peer
        };

        {
            let mut state = self.state.lock();
            if *state == ServerState::Connected {
                *state = ServerState::Listening;
            }
        }
        log::info!("Controller disconnected: {}", peer);
        self.publish(ConnectionEvent {
            connected: false,
            peer: Some(peer),
        });
    }

    /// Close whatever connection is active (replacement or shutdown)
    fn close_active(&self) {
        let id = self.active.lock().as_ref().map(|c| c.id);
        if let Some(id) = id {
            self.finish_connection(id);
        }
    }

    fn on_accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        if self.active.lock().is_some() {
            log::warn!(
                "Controller {} connecting while another is attached, closing the old stream",
                peer
            );
            self.close_active();
        }

        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_millis(SOCKET_READ_TIMEOUT_MS)))?;
        let write_half = stream.try_clone()?;
        let kill_handle = stream.try_clone()?;

        let id = self.dispatcher.attach(Box::new(TcpTransport::new(write_half)));
        *self.active.lock() = Some(ActiveConnection {
            id,
            peer,
            stream: kill_handle,
        });
        {
            let mut state = self.state.lock();
            if *state == ServerState::Listening {
                *state = ServerState::Connected;
            }
        }

        log::info!("Controller connected: {}", peer);
        self.publish(ConnectionEvent {
            connected: true,
            peer: Some(peer),
        });

        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("controller-rx".to_string())
            .spawn(move || {
                receive_loop(stream, id, &shared);
                shared.finish_connection(id);
            });

        match handle {
            Ok(handle) => {
                let mut receivers = self.receivers.lock();
                receivers.retain(|h| !h.is_finished());
                receivers.push(handle);
                Ok(())
            }
            Err(source) => {
                self.finish_connection(id);
                Err(Error::ThreadSpawn {
                    name: "controller-rx",
                    source,
                })
            }
        }
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>) {
    while shared.running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = shared.on_accept(stream, peer) {
                    log::error!("Failed to set up controller connection {}: {}", peer, e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
        }
    }
    log::debug!("Accept loop exiting");
}

/// Read frames until the peer goes away, the connection is replaced or the
/// server stops
fn receive_loop(mut stream: TcpStream, id: u64, shared: &ServerShared) {
    // Fresh buffer per connection; stale partial frames never carry over
    let mut reader = FrameReader::new();

    while shared.running.load(Ordering::Relaxed) {
        if shared.active.lock().as_ref().map(|c| c.id) != Some(id) {
            log::debug!("Connection {} superseded, exiting", id);
            break;
        }

        match reader.fill_from(&mut stream) {
            Ok(ReadStatus::Data(n)) => {
                log::trace!("Read {} bytes from controller", n);
                while let Some(frame) = reader.next_frame() {
                    shared.handler.handle_frame(frame);
                }
            }
            Ok(ReadStatus::Idle) => {}
            Ok(ReadStatus::Closed) => {
                log::debug!("Controller closed the stream");
                break;
            }
            Err(e) => {
                log::warn!("Controller read failed: {}", e);
                break;
            }
        }
    }

    if reader.rejected() > 0 {
        log::info!(
            "Connection {} dropped {} malformed frames",
            id,
            reader.rejected()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FunctionCode;
    use std::io::{Read, Write};

    /// Records frames into a channel
    struct ChannelHandler(Sender<Frame>);

    impl FrameHandler for ChannelHandler {
        fn handle_frame(&self, frame: Frame) {
            let _ = self.0.send(frame);
        }
    }

    fn server() -> (ConnectionManager, Arc<CommandDispatcher>, Receiver<Frame>) {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let (tx, rx) = unbounded();
        let manager =
            ConnectionManager::new(Arc::clone(&dispatcher), Arc::new(ChannelHandler(tx)));
        (manager, dispatcher, rx)
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_bind_error_on_port_in_use() {
        let (first, _, _) = server();
        let addr = first.start("127.0.0.1", 0).unwrap();

        let (second, _, _) = server();
        assert!(matches!(
            second.start("127.0.0.1", addr.port()),
            Err(Error::Bind { .. })
        ));
    }

    #[test]
    fn test_bind_error_on_invalid_address() {
        let (manager, _, _) = server();
        assert!(matches!(
            manager.start("203.0.113.1", 0),
            Err(Error::Bind { .. })
        ));
        assert_eq!(manager.state(), ServerState::Idle);
    }

    #[test]
    fn test_frames_reach_handler_and_commands_reach_client() {
        let (manager, dispatcher, frames) = server();
        let events = manager.subscribe();
        let addr = manager.start("127.0.0.1", 0).unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        let event = events.recv_timeout(WAIT).unwrap();
        assert!(event.connected);
        assert_eq!(manager.state(), ServerState::Connected);

        // Garbage, then a trigger split over two writes
        client.write_all(&[0x00, 0x42, 0xF9, 0x10, 0x00]).unwrap();
        client.write_all(&[0x07, 0x00, 0x00, 0x00, 0xFF]).unwrap();
        let frame = frames.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.function, FunctionCode::SlotTrigger);
        assert_eq!(frame.slot, 7);

        dispatcher.send_sort_command(7, 5).unwrap();
        let mut buf = [0u8; 8];
        client.set_read_timeout(Some(WAIT)).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xF9, 0x11, 0x00, 0x07, 0x00, 0x00, 0x05, 0xFF]);
    }

    #[test]
    fn test_disconnect_resumes_listening() {
        let (manager, dispatcher, _frames) = server();
        let events = manager.subscribe();
        let addr = manager.start("127.0.0.1", 0).unwrap();

        let client = TcpStream::connect(addr).unwrap();
        assert!(events.recv_timeout(WAIT).unwrap().connected);
        drop(client);

        assert!(!events.recv_timeout(WAIT).unwrap().connected);
        assert_eq!(manager.state(), ServerState::Listening);
        assert!(!dispatcher.is_connected());

        let _again = TcpStream::connect(addr).unwrap();
        assert!(events.recv_timeout(WAIT).unwrap().connected);
    }

    #[test]
    fn test_new_client_replaces_old() {
        let (manager, _, frames) = server();
        let events = manager.subscribe();
        let addr = manager.start("127.0.0.1", 0).unwrap();

        let mut old = TcpStream::connect(addr).unwrap();
        assert!(events.recv_timeout(WAIT).unwrap().connected);

        let mut new = TcpStream::connect(addr).unwrap();
        assert!(!events.recv_timeout(WAIT).unwrap().connected);
        assert!(events.recv_timeout(WAIT).unwrap().connected);

        // Old stream has been closed by the server
        old.set_read_timeout(Some(WAIT)).unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(old.read(&mut buf), Ok(0) | Err(_)));

        new.write_all(&Frame::slot_trigger(11).to_bytes()).unwrap();
        assert_eq!(frames.recv_timeout(WAIT).unwrap().slot, 11);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (manager, _, _) = server();
        let addr = manager.start("127.0.0.1", 0).unwrap();
        let _client = TcpStream::connect(addr).unwrap();

        manager.stop();
        assert_eq!(manager.state(), ServerState::Stopped);
        manager.stop();
        assert!(manager.start("127.0.0.1", 0).is_err());
    }
}
