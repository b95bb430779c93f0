//! Slot/package match engine
//!
//! Two independent inputs feed the engine:
//!
//! - **Slot triggers** from the controller receive loop: a slot passed the
//!   sensor. The engine records it as pending and arms a deadline.
//! - **Identifications** from the upstream pipeline: a package was scanned.
//!   The engine looks for the pending slot it belongs to.
//!
//! Neither input is ordered relative to the other. An identification may
//! match any pending slot whose trigger is between `min_wait_ms` and
//! `max_wait_ms` old, subject to the binding validator. Pending slots are
//! scanned earliest trigger first.
//!
//! ```text
//!   SlotTrigger ──▶ in flight? ──yes──▶ ignore (duplicate)
//!                      │no
//!                      ▼
//!                 PendingMatch + deadline
//!                      │
//!        ┌─────────────┴──────────────┐
//!        ▼                            ▼
//!  identification matched       deadline fired
//!  SortCommand(slot, chute)     SortCommand(slot, exception_chute)
//!        └─────────────┬──────────────┘
//!                      ▼
//!          entry, guard and binding released
//! ```
//!
//! Once a trigger is accepted the slot always gets a command: either the
//! matched chute or the exception chute.
//!
//! # Locking
//!
//! Pending table, in-flight set, bindings and the last-processed instant
//! share one mutex. Socket writes and record hand-off happen after the lock
//! is released; the dispatcher serializes writes on its own.
//!
//! [`MatchEngine::clear`] and [`MatchEngine::shutdown`] suspend the engine
//! under that mutex before cancelling deadlines, so a deadline that fires
//! while they run sends nothing.

pub mod binding;
pub mod clock;
pub mod feedback;
pub mod pending;
pub mod timer;

use crate::config::ConfigProvider;
use crate::dispatcher::CommandDispatcher;
use crate::error::{Error, Result};
use crate::package::{Package, PackageStatus, RecordSink};
use binding::BindingValidator;
use clock::{Clock, SystemClock};
use crossbeam_channel::{Receiver, bounded};
use feedback::FeedbackHandler;
use parking_lot::Mutex;
use pending::{PendingMatch, PendingTable};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use timer::{DeadlineHandle, DeadlineScheduler};

/// Result of offering an identification to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Package assigned to `slot`
    Matched { slot: u16, elapsed_ms: u64 },
    /// No slot was pending at all
    NoPending,
    /// Slots were pending but none accepted the package
    NoMatch,
}

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    triggers: AtomicU64,
    duplicate_triggers: AtomicU64,
    matched: AtomicU64,
    timeouts: AtomicU64,
    binding_conflicts: AtomicU64,
    unmatched: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub triggers: u64,
    pub duplicate_triggers: u64,
    pub matched: u64,
    /// Slots routed to the exception chute
    pub timeouts: u64,
    pub binding_conflicts: u64,
    pub unmatched: u64,
    pub send_failures: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            triggers: self.triggers.load(Ordering::Relaxed),
            duplicate_triggers: self.duplicate_triggers.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            binding_conflicts: self.binding_conflicts.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything guarded by the engine lock
#[derive(Default)]
struct MatchState {
    pending: PendingTable,
    in_flight: HashSet<u16>,
    bindings: BindingValidator,
    /// Latest trigger instant seen, for ordering anomaly warnings
    last_processed: Option<Instant>,
    /// Set while clearing and after shutdown; no triggers, matches or deadlines
    suspended: bool,
    stopped: bool,
}

/// Shared part of the engine, also reachable from the deadline thread
struct EngineCore {
    state: Mutex<MatchState>,
    config: Arc<dyn ConfigProvider>,
    dispatcher: Arc<CommandDispatcher>,
    sink: Arc<dyn RecordSink>,
    feedback: Arc<FeedbackHandler>,
    clock: Arc<dyn Clock>,
    stats: EngineStats,
}

/// The slot/package match engine
pub struct MatchEngine {
    core: Arc<EngineCore>,
    scheduler: DeadlineScheduler,
}

impl MatchEngine {
    /// Create an engine using the system clock
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        dispatcher: Arc<CommandDispatcher>,
        sink: Arc<dyn RecordSink>,
        feedback: Arc<FeedbackHandler>,
    ) -> Result<Self> {
        Self::with_clock(config, dispatcher, sink, feedback, Arc::new(SystemClock))
    }

    /// Create an engine with a custom clock for the matching window
    pub fn with_clock(
        config: Arc<dyn ConfigProvider>,
        dispatcher: Arc<CommandDispatcher>,
        sink: Arc<dyn RecordSink>,
        feedback: Arc<FeedbackHandler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let core = Arc::new(EngineCore {
            state: Mutex::new(MatchState::default()),
            config,
            dispatcher,
            sink,
            feedback,
            clock,
            stats: EngineStats::default(),
        });

        let weak: Weak<EngineCore> = Arc::downgrade(&core);
        let scheduler = DeadlineScheduler::spawn(Box::new(move |slot, handle| {
            if let Some(core) = weak.upgrade() {
                core.on_deadline(slot, handle);
            }
        }))?;

        Ok(Self { core, scheduler })
    }

    /// Handle a slot trigger from the controller
    ///
    /// Returns `DuplicateTrigger` (already logged) if the slot is in flight.
    pub fn on_slot_trigger(&self, slot: u16) -> Result<()> {
        let config = self.core.config.load_config();
        let now = self.core.clock.now();
        let mut state = self.core.state.lock();

        if state.suspended {
            log::warn!("Slot {} triggered while the engine is stopped, ignoring", slot);
            return Err(Error::InvalidState("engine stopped".to_string()));
        }

        if state.in_flight.contains(&slot) {
            EngineStats::bump(&self.core.stats.duplicate_triggers);
            let err = Error::DuplicateTrigger(slot);
            log::warn!("{}, ignoring", err);
            return Err(err);
        }

        if let Some(last) = state.last_processed
            && now < last
        {
            log::warn!(
                "Slot {} trigger is {:?} older than the previous trigger",
                slot,
                last - now
            );
        }
        state.last_processed = Some(state.last_processed.map_or(now, |last| last.max(now)));

        state.in_flight.insert(slot);
        let mut entry = PendingMatch::new(slot, now);
        entry.deadline = Some(
            self.scheduler
                .arm(slot, Duration::from_millis(config.max_wait_ms)),
        );
        state.pending.insert(entry);

        EngineStats::bump(&self.core.stats.triggers);
        log::debug!(
            "Slot {} triggered, waiting up to {}ms ({} pending)",
            slot,
            config.max_wait_ms,
            state.pending.len()
        );
        Ok(())
    }

    /// Offer an identified package to the pending slots
    ///
    /// On a match the package gets its slot, processing time and `Matched`
    /// status, the sort command is sent and a copy goes to the record sink.
    /// Only the pending-table scan runs under the lock.
    pub fn on_package_identified(&self, package: &mut Package) -> MatchOutcome {
        let config = self.core.config.load_config();
        let min_wait = Duration::from_millis(config.min_wait_ms);
        let max_wait = Duration::from_millis(config.max_wait_ms);
        let now = self.core.clock.now();

        let resolved = {
            let mut guard = self.core.state.lock();
            let MatchState {
                pending,
                in_flight,
                bindings,
                suspended,
                ..
            } = &mut *guard;

            if *suspended || pending.is_empty() {
                log::info!(
                    "Package {}: no pending slots, nothing to match",
                    package.barcode_label()
                );
                package.status = PackageStatus::Unmatched;
                EngineStats::bump(&self.core.stats.unmatched);
                return MatchOutcome::NoPending;
            }

            let mut found = None;
            for entry in pending.iter() {
                let elapsed = now.saturating_duration_since(entry.received_at);

                if elapsed < min_wait {
                    log::trace!(
                        "Slot {} too fresh for {} ({}ms)",
                        entry.slot,
                        package.barcode_label(),
                        elapsed.as_millis()
                    );
                    continue;
                }

                if elapsed > max_wait {
                    // Deadline thread reaps the entry itself
                    package.status = PackageStatus::TimedOut;
                    log::debug!(
                        "Slot {} expired for {} ({}ms > {}ms)",
                        entry.slot,
                        package.barcode_label(),
                        elapsed.as_millis(),
                        config.max_wait_ms
                    );
                    continue;
                }

                if !bindings.validate(entry.slot, &package.barcode) {
                    EngineStats::bump(&self.core.stats.binding_conflicts);
                    log::warn!(
                        "{} (bound to {:?}), skipping",
                        Error::BindingConflict {
                            slot: entry.slot,
                            barcode: package.barcode.clone(),
                        },
                        bindings.bound_barcode(entry.slot)
                    );
                    continue;
                }

                found = Some((entry.slot, elapsed));
                break;
            }

            found.and_then(|(slot, elapsed)| {
                let entry = pending.remove(slot)?;
                in_flight.remove(&slot);
                bindings.release(slot);
                Some((entry, elapsed))
            })
        };

        let Some((entry, elapsed)) = resolved else {
            if package.status != PackageStatus::TimedOut {
                package.status = PackageStatus::Unmatched;
            }
            EngineStats::bump(&self.core.stats.unmatched);
            log::info!(
                "Package {}: no match found ({:?})",
                package.barcode_label(),
                package.status
            );
            return MatchOutcome::NoMatch;
        };

        if let Some(handle) = entry.deadline {
            self.scheduler.cancel(handle);
        }

        let slot = entry.slot;
        let elapsed_ms = elapsed.as_millis() as u64;
        package.slot_index = Some(slot);
        package.processing_time_ms = elapsed_ms;
        package.status = PackageStatus::Matched;

        log::info!(
            "Matched {} to slot {} after {}ms -> chute {}",
            package.barcode_label(),
            slot,
            elapsed_ms,
            package.chute_number
        );
        self.core.send(slot, package.chute_number, package.barcode_label());
        self.core.sink.record_matched_package(package.clone());
        self.core.hand_over_completion(slot, entry);
        EngineStats::bump(&self.core.stats.matched);

        MatchOutcome::Matched { slot, elapsed_ms }
    }

    /// Pre-claim a pending slot for a barcode through the binding validator
    ///
    /// Only pending slots can be bound, so every binding is released together
    /// with its entry.
    pub fn bind(&self, slot: u16, barcode: &str) -> Result<()> {
        let mut state = self.core.state.lock();
        if !state.pending.contains(slot) {
            return Err(Error::InvalidState(format!(
                "cannot bind {:?} to slot {}: slot is not pending",
                barcode, slot
            )));
        }
        if state.bindings.validate(slot, barcode) {
            Ok(())
        } else {
            EngineStats::bump(&self.core.stats.binding_conflicts);
            Err(Error::BindingConflict {
                slot,
                barcode: barcode.to_string(),
            })
        }
    }

    /// Barcode currently bound to `slot`
    pub fn bound_barcode(&self, slot: u16) -> Option<String> {
        self.core
            .state
            .lock()
            .bindings
            .bound_barcode(slot)
            .map(str::to_string)
    }

    /// Attach a completion signal to a pending slot
    ///
    /// The receiver yields `true`/`false` when the controller acknowledges
    /// the sort for this slot. Returns `None` if the slot is not pending.
    pub fn register_completion(&self, slot: u16) -> Option<Receiver<bool>> {
        let mut state = self.core.state.lock();
        let entry = state.pending.get_mut(slot)?;
        let (tx, rx) = bounded(1);
        entry.completion = Some(tx);
        Some(rx)
    }

    pub fn pending_count(&self) -> usize {
        self.core.state.lock().pending.len()
    }

    pub fn is_in_flight(&self, slot: u16) -> bool {
        self.core.state.lock().in_flight.contains(&slot)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Drop all pending work without sending commands
    ///
    /// The engine accepts triggers again afterwards. Returns how many pending
    /// slots were dropped.
    pub fn clear(&self) -> usize {
        self.reset(false)
    }

    /// Drop all pending work without sending commands and refuse new triggers
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) -> usize {
        self.reset(true)
    }

    pub fn is_stopped(&self) -> bool {
        self.core.state.lock().stopped
    }

    fn reset(&self, stop: bool) -> usize {
        self.core.state.lock().suspended = true;
        // Waits for a callback that is already running; it sees `suspended`
        self.scheduler.cancel_all();

        let dropped = {
            let mut state = self.core.state.lock();
            let dropped = state.pending.drain();
            state.in_flight.clear();
            state.bindings.clear();
            state.last_processed = None;
            state.stopped |= stop;
            state.suspended = state.stopped;
            dropped
        };
        self.core.feedback.clear();

        for entry in &dropped {
            log::info!("Slot {} cancelled without command", entry.slot);
        }
        dropped.len()
    }
}

impl Drop for MatchEngine {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

impl EngineCore {
    /// Deadline expired: route the slot to the exception chute
    fn on_deadline(&self, slot: u16, handle: DeadlineHandle) {
        let config = self.config.load_config();

        let (entry, barcode) = {
            let mut state = self.state.lock();
            if state.suspended {
                log::debug!("Slot {} deadline dropped, engine suspended", slot);
                return;
            }
            let still_pending = state
                .pending
                .get(slot)
                .is_some_and(|e| e.deadline == Some(handle));
            if !still_pending {
                return;
            }
            let Some(entry) = state.pending.remove(slot) else {
                return;
            };
            let barcode = state.bindings.release(slot);
            state.in_flight.remove(&slot);
            (entry, barcode)
        };

        EngineStats::bump(&self.stats.timeouts);
        let waited = self
            .clock
            .now()
            .saturating_duration_since(entry.received_at);
        log::warn!(
            "{} after {}ms (bound barcode: {}), routing to exception chute {}",
            Error::MatchTimeout(slot),
            waited.as_millis(),
            barcode.as_deref().unwrap_or("none"),
            config.exception_chute
        );

        self.send(
            slot,
            config.exception_chute,
            barcode.as_deref().unwrap_or("none"),
        );
        self.hand_over_completion(slot, entry);
    }

    /// Send a sort command; failures are terminal for the slot
    fn send(&self, slot: u16, chute: u8, barcode: &str) {
        if let Err(e) = self.dispatcher.send_sort_command(slot, chute) {
            EngineStats::bump(&self.stats.send_failures);
            log::error!(
                "Sort command for slot {} (barcode {}) to chute {} lost: {}",
                slot,
                barcode,
                chute,
                e
            );
        }
    }

    fn hand_over_completion(&self, slot: u16, entry: PendingMatch) {
        if let Some(signal) = entry.completion {
            self.feedback.await_feedback(slot, signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SharedConfig, StaticConfig};
    use crate::package::ChannelRecordSink;
    use crate::transport::mock::MockTransport;
    use clock::ManualClock;

    struct Harness {
        engine: MatchEngine,
        clock: Arc<ManualClock>,
        mock: MockTransport,
        records: Receiver<Package>,
        feedback: Arc<FeedbackHandler>,
    }

    /// Engine with a manual clock and a deadline far enough out that it
    /// never fires during a test
    fn harness(min_wait_ms: u64) -> Harness {
        harness_with(Arc::new(StaticConfig(EngineConfig {
            min_wait_ms,
            max_wait_ms: 3000,
            exception_chute: 99,
        })))
    }

    fn harness_with(config: Arc<dyn ConfigProvider>) -> Harness {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let mock = MockTransport::new();
        dispatcher.attach(Box::new(mock.clone()));
        let (sink, records) = ChannelRecordSink::new(16);
        let feedback = Arc::new(FeedbackHandler::new());
        let clock = Arc::new(ManualClock::new());

        let engine = MatchEngine::with_clock(
            config,
            dispatcher,
            Arc::new(sink),
            Arc::clone(&feedback),
            clock.clone(),
        )
        .unwrap();

        Harness {
            engine,
            clock,
            mock,
            records,
            feedback,
        }
    }

    fn sort_frame(slot: u16, chute: u8) -> [u8; 8] {
        crate::protocol::encode_sort_command(slot, chute)
    }

    #[test]
    fn test_match_within_window() {
        let h = harness(1000);
        h.engine.on_slot_trigger(7).unwrap();
        h.clock.advance_ms(1500);

        let mut pkg = Package::new("ABC123", 5);
        let outcome = h.engine.on_package_identified(&mut pkg);

        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                slot: 7,
                elapsed_ms: 1500
            }
        );
        assert_eq!(pkg.slot_index, Some(7));
        assert_eq!(pkg.processing_time_ms, 1500);
        assert_eq!(pkg.status, PackageStatus::Matched);
        assert_eq!(h.mock.written_frames(), vec![sort_frame(7, 5)]);
        assert_eq!(h.engine.pending_count(), 0);
        assert!(!h.engine.is_in_flight(7));
        assert_eq!(h.records.try_recv().unwrap().slot_index, Some(7));
        assert_eq!(h.engine.bound_barcode(7), None);
    }

    #[test]
    fn test_too_early_is_skipped() {
        let h = harness(1000);
        h.engine.on_slot_trigger(7).unwrap();
        h.clock.advance_ms(500);

        let mut pkg = Package::new("ABC123", 5);
        assert_eq!(h.engine.on_package_identified(&mut pkg), MatchOutcome::NoMatch);
        assert_eq!(pkg.status, PackageStatus::Unmatched);
        assert!(h.mock.get_written().is_empty());
        assert_eq!(h.engine.pending_count(), 1);
    }

    #[test]
    fn test_late_identification_marks_timed_out() {
        let h = harness(1000);
        h.engine.on_slot_trigger(7).unwrap();
        h.clock.advance_ms(3500);

        let mut pkg = Package::new("ABC123", 5);
        assert_eq!(h.engine.on_package_identified(&mut pkg), MatchOutcome::NoMatch);
        assert_eq!(pkg.status, PackageStatus::TimedOut);
        assert_eq!(pkg.slot_index, None);
        // Entry stays for its own deadline to reap
        assert!(h.engine.is_in_flight(7));
    }

    #[test]
    fn test_window_edges_are_inclusive() {
        let h = harness(1000);
        h.engine.on_slot_trigger(1).unwrap();
        h.clock.advance_ms(1000);
        let mut pkg = Package::new("AT-MIN", 4);
        assert_eq!(
            h.engine.on_package_identified(&mut pkg),
            MatchOutcome::Matched {
                slot: 1,
                elapsed_ms: 1000
            }
        );

        h.engine.on_slot_trigger(2).unwrap();
        h.clock.advance_ms(3000);
        let mut pkg = Package::new("AT-MAX", 6);
        assert_eq!(
            h.engine.on_package_identified(&mut pkg),
            MatchOutcome::Matched {
                slot: 2,
                elapsed_ms: 3000
            }
        );
        assert_eq!(h.mock.written_frames(), vec![sort_frame(1, 4), sort_frame(2, 6)]);
    }

    #[test]
    fn test_late_identification_leaves_slot_to_its_deadline() {
        let h = harness_with(Arc::new(StaticConfig(EngineConfig {
            min_wait_ms: 0,
            max_wait_ms: 150,
            exception_chute: 99,
        })));
        h.engine.on_slot_trigger(7).unwrap();
        h.clock.advance_ms(200);

        let mut pkg = Package::new("LATE", 5);
        assert_eq!(h.engine.on_package_identified(&mut pkg), MatchOutcome::NoMatch);
        assert_eq!(pkg.status, PackageStatus::TimedOut);
        assert!(h.mock.get_written().is_empty());

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(h.mock.written_frames(), vec![sort_frame(7, 99)]);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(h.mock.written_frames(), vec![sort_frame(7, 99)]);
        assert_eq!(h.engine.stats().timeouts, 1);
        assert!(h.records.try_recv().is_err());
    }

    #[test]
    fn test_no_pending() {
        let h = harness(0);
        let mut pkg = Package::new("ABC123", 5);
        assert_eq!(h.engine.on_package_identified(&mut pkg), MatchOutcome::NoPending);
        assert_eq!(h.engine.stats().unmatched, 1);
    }

    #[test]
    fn test_duplicate_trigger_ignored() {
        let h = harness(0);
        h.engine.on_slot_trigger(4).unwrap();
        assert!(matches!(
            h.engine.on_slot_trigger(4),
            Err(Error::DuplicateTrigger(4))
        ));
        assert_eq!(h.engine.pending_count(), 1);
        assert_eq!(h.engine.stats().duplicate_triggers, 1);
    }

    #[test]
    fn test_earliest_trigger_wins() {
        let h = harness(1000);
        h.engine.on_slot_trigger(20).unwrap();
        h.clock.advance_ms(200);
        h.engine.on_slot_trigger(10).unwrap();
        h.clock.advance_ms(1300);

        let mut pkg = Package::new("P1", 3);
        let outcome = h.engine.on_package_identified(&mut pkg);
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                slot: 20,
                elapsed_ms: 1500
            }
        );
        assert_eq!(h.engine.pending_count(), 1);
    }

    #[test]
    fn test_binding_conflict_skips_slot() {
        let h = harness(1000);
        h.engine.on_slot_trigger(7).unwrap();
        h.engine.bind(7, "A").unwrap();
        h.clock.advance_ms(1500);

        let mut pkg = Package::new("B", 5);
        assert_eq!(h.engine.on_package_identified(&mut pkg), MatchOutcome::NoMatch);
        assert_eq!(h.engine.bound_barcode(7).as_deref(), Some("A"));
        assert_eq!(h.engine.stats().binding_conflicts, 1);
        assert!(h.mock.get_written().is_empty());

        // The rightful barcode still matches
        let mut pkg = Package::new("A", 6);
        assert!(matches!(
            h.engine.on_package_identified(&mut pkg),
            MatchOutcome::Matched { slot: 7, .. }
        ));
    }

    #[test]
    fn test_bind_requires_pending_slot() {
        let h = harness(1000);
        assert!(matches!(h.engine.bind(5, "A"), Err(Error::InvalidState(_))));
        assert_eq!(h.engine.bound_barcode(5), None);

        // "A" is still free to match the slot it really occupies
        h.engine.on_slot_trigger(7).unwrap();
        h.clock.advance_ms(1500);
        let mut pkg = Package::new("A", 3);
        assert!(matches!(
            h.engine.on_package_identified(&mut pkg),
            MatchOutcome::Matched { slot: 7, .. }
        ));
        assert_eq!(h.mock.written_frames(), vec![sort_frame(7, 3)]);
    }

    #[test]
    fn test_binding_conflict_falls_through_to_next_slot() {
        let h = harness(1000);
        h.engine.on_slot_trigger(1).unwrap();
        h.engine.on_slot_trigger(2).unwrap();
        h.engine.bind(1, "OTHER").unwrap();
        h.clock.advance_ms(1200);

        let mut pkg = Package::new("MINE", 8);
        assert!(matches!(
            h.engine.on_package_identified(&mut pkg),
            MatchOutcome::Matched { slot: 2, .. }
        ));
        assert_eq!(h.mock.written_frames(), vec![sort_frame(2, 8)]);
    }

    #[test]
    fn test_empty_barcode_still_matches() {
        let h = harness(0);
        h.engine.on_slot_trigger(3).unwrap();
        let mut pkg = Package::new("", 12);
        assert!(matches!(
            h.engine.on_package_identified(&mut pkg),
            MatchOutcome::Matched { slot: 3, .. }
        ));
    }

    #[test]
    fn test_send_failure_still_resolves_slot() {
        let h = harness(0);
        h.mock.set_fail_writes(true);
        h.engine.on_slot_trigger(9).unwrap();

        let mut pkg = Package::new("X", 1);
        assert!(matches!(
            h.engine.on_package_identified(&mut pkg),
            MatchOutcome::Matched { slot: 9, .. }
        ));
        assert_eq!(h.engine.stats().send_failures, 1);
        assert!(!h.engine.is_in_flight(9));
    }

    #[test]
    fn test_completion_moves_to_feedback_on_match() {
        let h = harness(0);
        h.engine.on_slot_trigger(5).unwrap();
        let done = h.engine.register_completion(5).unwrap();
        assert!(h.engine.register_completion(6).is_none());

        let mut pkg = Package::new("X", 2);
        h.engine.on_package_identified(&mut pkg);
        assert_eq!(h.feedback.awaiting_count(), 1);

        h.feedback.on_feedback(5, 0, 2);
        assert_eq!(done.try_recv(), Ok(true));
    }

    #[test]
    fn test_deadline_routes_to_exception_chute() {
        let config = Arc::new(SharedConfig::new(EngineConfig {
            min_wait_ms: 0,
            max_wait_ms: 50,
            exception_chute: 99,
        }));
        let h = harness_with(config);
        h.engine.on_slot_trigger(7).unwrap();

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(h.mock.written_frames(), vec![sort_frame(7, 99)]);
        assert_eq!(h.engine.pending_count(), 0);
        assert_eq!(h.engine.stats().timeouts, 1);
        assert!(h.records.try_recv().is_err());

        // Slot is free again
        h.engine.on_slot_trigger(7).unwrap();
    }

    #[test]
    fn test_exception_chute_read_at_expiry() {
        let config = Arc::new(SharedConfig::new(EngineConfig {
            min_wait_ms: 0,
            max_wait_ms: 80,
            exception_chute: 99,
        }));
        let h = harness_with(config.clone());
        h.engine.on_slot_trigger(3).unwrap();
        config
            .update(EngineConfig {
                min_wait_ms: 0,
                max_wait_ms: 80,
                exception_chute: 42,
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(h.mock.written_frames(), vec![sort_frame(3, 42)]);
    }

    #[test]
    fn test_clear_cancels_without_commands() {
        let config = Arc::new(StaticConfig(EngineConfig {
            min_wait_ms: 0,
            max_wait_ms: 60,
            exception_chute: 99,
        }));
        let h = harness_with(config);
        h.engine.on_slot_trigger(1).unwrap();
        h.engine.on_slot_trigger(2).unwrap();
        h.engine.bind(1, "A").unwrap();

        assert_eq!(h.engine.clear(), 2);
        std::thread::sleep(Duration::from_millis(250));

        assert!(h.mock.get_written().is_empty());
        assert_eq!(h.engine.pending_count(), 0);
        assert_eq!(h.engine.bound_barcode(1), None);
        assert_eq!(h.engine.stats().timeouts, 0);
    }

    #[test]
    fn test_clear_accepts_new_triggers() {
        let h = harness(0);
        h.engine.on_slot_trigger(1).unwrap();
        assert_eq!(h.engine.clear(), 1);

        assert!(!h.engine.is_stopped());
        h.engine.on_slot_trigger(1).unwrap();
        assert_eq!(h.engine.pending_count(), 1);
    }

    #[test]
    fn test_shutdown_just_before_deadline_sends_nothing() {
        let h = harness_with(Arc::new(StaticConfig(EngineConfig {
            min_wait_ms: 0,
            max_wait_ms: 100,
            exception_chute: 99,
        })));
        h.engine.on_slot_trigger(3).unwrap();
        std::thread::sleep(Duration::from_millis(85));

        assert_eq!(h.engine.shutdown(), 1);
        std::thread::sleep(Duration::from_millis(200));
        assert!(h.mock.get_written().is_empty());
        assert_eq!(h.engine.stats().timeouts, 0);

        assert!(h.engine.is_stopped());
        assert!(matches!(
            h.engine.on_slot_trigger(4),
            Err(Error::InvalidState(_))
        ));
        let mut pkg = Package::new("X", 1);
        assert_eq!(h.engine.on_package_identified(&mut pkg), MatchOutcome::NoPending);
        assert_eq!(h.engine.shutdown(), 0);
        h.engine.clear();
        assert!(h.engine.is_stopped());
    }
}
