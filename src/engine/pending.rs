//! Pending slot triggers, kept in trigger order
//!
//! Scans walk the table earliest-trigger first, so when several slots are
//! eligible for one identification the oldest one wins.

use super::timer::DeadlineHandle;
use crossbeam_channel::Sender;
use std::time::Instant;

/// A slot that passed the trigger and is waiting for its identification
#[derive(Debug)]
pub struct PendingMatch {
    pub slot: u16,
    pub received_at: Instant,
    /// Deadline timer, set right after the entry is armed
    pub deadline: Option<DeadlineHandle>,
    /// Optional completion signal resolved by controller feedback
    pub completion: Option<Sender<bool>>,
}

impl PendingMatch {
    pub fn new(slot: u16, received_at: Instant) -> Self {
        Self {
            slot,
            received_at,
            deadline: None,
            completion: None,
        }
    }
}

/// Pending entries ordered by `received_at` (ties keep insertion order)
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Vec<PendingMatch>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry at its trigger-time position
    pub fn insert(&mut self, entry: PendingMatch) {
        let pos = self
            .entries
            .partition_point(|e| e.received_at <= entry.received_at);
        self.entries.insert(pos, entry);
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.entries.iter().any(|e| e.slot == slot)
    }

    pub fn get(&self, slot: u16) -> Option<&PendingMatch> {
        self.entries.iter().find(|e| e.slot == slot)
    }

    pub fn get_mut(&mut self, slot: u16) -> Option<&mut PendingMatch> {
        self.entries.iter_mut().find(|e| e.slot == slot)
    }

    pub fn remove(&mut self, slot: u16) -> Option<PendingMatch> {
        let idx = self.entries.iter().position(|e| e.slot == slot)?;
        Some(self.entries.remove(idx))
    }

    /// Entries earliest trigger first
    pub fn iter(&self) -> impl Iterator<Item = &PendingMatch> {
        self.entries.iter()
    }

    /// Remove and return every entry
    pub fn drain(&mut self) -> Vec<PendingMatch> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_iteration_follows_trigger_time() {
        let t0 = Instant::now();
        let mut table = PendingTable::new();
        table.insert(PendingMatch::new(3, t0 + Duration::from_millis(20)));
        table.insert(PendingMatch::new(1, t0));
        table.insert(PendingMatch::new(2, t0 + Duration::from_millis(10)));

        let order: Vec<u16> = table.iter().map(|e| e.slot).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let t0 = Instant::now();
        let mut table = PendingTable::new();
        table.insert(PendingMatch::new(9, t0));
        table.insert(PendingMatch::new(4, t0));

        let order: Vec<u16> = table.iter().map(|e| e.slot).collect();
        assert_eq!(order, vec![9, 4]);
    }

    #[test]
    fn test_remove_and_drain() {
        let t0 = Instant::now();
        let mut table = PendingTable::new();
        table.insert(PendingMatch::new(1, t0));
        table.insert(PendingMatch::new(2, t0));

        assert_eq!(table.remove(1).map(|e| e.slot), Some(1));
        assert!(table.remove(1).is_none());
        assert!(table.contains(2));
        assert_eq!(table.drain().len(), 1);
        assert!(table.is_empty());
    }
}
