//! chute-link - slot/package coordination engine for conveyor sorters
//!
//! A conveyor controller reports, over one TCP connection, every slot that
//! passes its trigger sensor. An identification pipeline reports, on its own
//! schedule, every package it has scanned. This library pairs the two within
//! a configurable time window and tells the controller which chute each slot
//! goes to, falling back to an exception chute when no package shows up.
//!
//! - [`protocol`]: 8-byte frame codec and stream resynchronization
//! - [`server`]: single-controller TCP connection manager
//! - [`engine`]: match engine, binding validator, deadlines, feedback
//! - [`dispatcher`]: serialized sort command writer
//! - [`service`]: everything wired together

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod package;
pub mod protocol;
pub mod server;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use config::{AppConfig, ConfigProvider, EngineConfig};
pub use engine::{MatchEngine, MatchOutcome};
pub use error::{Error, Result};
pub use package::{Package, PackageStatus, RecordSink};
pub use service::SortingService;
