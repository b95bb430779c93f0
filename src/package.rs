//! Package records from the identification pipeline
//!
//! A [`Package`] is owned by the pipeline. The engine only fills in the slot,
//! processing time and status once a match is found, then hands a copy to a
//! [`RecordSink`].

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::time::SystemTime;

/// Matching status of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageStatus {
    /// Not yet tested against any slot
    #[default]
    Pending,
    /// Assigned to a slot and commanded to its chute
    Matched,
    /// Arrived after the window of at least one pending slot
    TimedOut,
    /// No pending slot accepted it
    Unmatched,
}

/// One identified item
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    /// Scanned barcode, empty when the scanner could not read one
    pub barcode: String,
    /// Destination chute decided upstream
    pub chute_number: u8,
    /// Slot the engine matched this package to
    pub slot_index: Option<u16>,
    /// Milliseconds between slot trigger and match
    pub processing_time_ms: u64,
    pub status: PackageStatus,
    pub weight_kg: Option<f64>,
    /// Wall-clock time the pipeline finished identification
    pub identified_at: SystemTime,
}

impl Package {
    pub fn new(barcode: impl Into<String>, chute_number: u8) -> Self {
        Self {
            barcode: barcode.into(),
            chute_number,
            slot_index: None,
            processing_time_ms: 0,
            status: PackageStatus::Pending,
            weight_kg: None,
            identified_at: SystemTime::now(),
        }
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.weight_kg = Some(weight_kg);
        self
    }

    /// Barcode for log lines (empty barcodes are still matched)
    pub fn barcode_label(&self) -> &str {
        if self.barcode.is_empty() {
            "<no-read>"
        } else {
            &self.barcode
        }
    }
}

/// Destination for matched packages
///
/// Called once per match, after the sort command was issued. Implementations
/// must not block.
pub trait RecordSink: Send + Sync {
    fn record_matched_package(&self, package: Package);
}

/// Sink that only logs
#[derive(Debug, Default)]
pub struct LogRecordSink;

impl RecordSink for LogRecordSink {
    fn record_matched_package(&self, package: Package) {
        log::info!(
            "Record: barcode={} slot={:?} chute={} processing={}ms",
            package.barcode_label(),
            package.slot_index,
            package.chute_number,
            package.processing_time_ms
        );
    }
}

/// Sink that forwards records over a bounded channel
///
/// Records are dropped (with a warning) when the consumer falls behind.
pub struct ChannelRecordSink {
    tx: Sender<Package>,
}

impl ChannelRecordSink {
    pub fn new(capacity: usize) -> (Self, Receiver<Package>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl RecordSink for ChannelRecordSink {
    fn record_matched_package(&self, package: Package) {
        match self.tx.try_send(package) {
            Ok(()) => {}
            Err(TrySendError::Full(p)) => {
                log::warn!("Record sink full, dropped record for {}", p.barcode_label());
            }
            Err(TrySendError::Disconnected(p)) => {
                log::debug!("Record sink closed, dropped record for {}", p.barcode_label());
            }
        }
    }
}
