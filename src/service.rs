//! Sorting service - wires controller connection, engine and dispatcher
//!
//! ```text
//!  controller ──TCP──▶ ConnectionManager ──frames──▶ ProtocolRouter
//!      ▲                                              │        │
//!      │                                      SlotTrigger   Feedback
//!      │                                              ▼        ▼
//!  CommandDispatcher ◀──SortCommand── MatchEngine   FeedbackHandler
//!                                        ▲
//!  identification pipeline ──Package─────┘──▶ RecordSink
//! ```

use crate::config::ConfigProvider;
use crate::dispatcher::CommandDispatcher;
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::feedback::FeedbackHandler;
use crate::engine::{MatchEngine, MatchOutcome, StatsSnapshot};
use crate::error::Result;
use crate::package::{Package, RecordSink};
use crate::server::{ConnectionEvent, ConnectionManager, ProtocolRouter, ServerState};
use crossbeam_channel::Receiver;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Complete coordination engine for one controller
pub struct SortingService {
    engine: Arc<MatchEngine>,
    dispatcher: Arc<CommandDispatcher>,
    server: ConnectionManager,
    stopped: AtomicBool,
}

impl SortingService {
    pub fn new(config: Arc<dyn ConfigProvider>, sink: Arc<dyn RecordSink>) -> Result<Self> {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Arc<dyn ConfigProvider>,
        sink: Arc<dyn RecordSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let feedback = Arc::new(FeedbackHandler::new());
        let engine = Arc::new(MatchEngine::with_clock(
            config,
            Arc::clone(&dispatcher),
            sink,
            Arc::clone(&feedback),
            clock,
        )?);
        let router = Arc::new(ProtocolRouter::new(Arc::clone(&engine), feedback));
        let server = ConnectionManager::new(Arc::clone(&dispatcher), router);

        Ok(Self {
            engine,
            dispatcher,
            server,
            stopped: AtomicBool::new(false),
        })
    }

    /// Listen for the controller; bind failures are returned
    pub fn start(&self, address: &str, port: u16) -> Result<SocketAddr> {
        self.server.start(address, port)
    }

    /// Cancel every pending slot, stop receiving and close the socket
    ///
    /// The engine is shut down first, so no deadline can fire while the
    /// connection is torn down and triggers still in the socket are refused.
    /// Pending slots get no command. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.engine.shutdown();
        self.server.stop();
        self.dispatcher.detach();
        log::info!("Sorting service stopped ({} pending slots cancelled)", cancelled);
    }

    /// Entry point for the identification pipeline
    pub fn on_package_identified(&self, package: &mut Package) -> MatchOutcome {
        self.engine.on_package_identified(package)
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    /// Subscribe to controller connect/disconnect events
    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        self.server.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    pub fn state(&self) -> ServerState {
        self.server.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }
}

impl Drop for SortingService {
    fn drop(&mut self) {
        self.stop();
    }
}
