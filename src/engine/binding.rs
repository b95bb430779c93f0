//! Slot/barcode binding validator
//!
//! Identification and slot triggers come from independent subsystems with
//! independent clocks. The validator keeps a strict 1:1 relation between a
//! slot and the barcode occupying it so a mis-timed identification cannot be
//! assigned to the wrong slot.
//!
//! The validator itself is not synchronized: the match engine calls it while
//! holding its state lock, which covers the whole check-then-bind sequence.

use std::collections::HashMap;

/// 1:1 mapping between slot numbers and barcodes
#[derive(Debug, Default)]
pub struct BindingValidator {
    by_slot: HashMap<u16, String>,
    by_barcode: HashMap<String, u16>,
}

impl BindingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a slot/barcode pair, binding it if both sides are free
    ///
    /// 1. Slot already bound: accept only the same barcode.
    /// 2. Barcode already bound to another slot: reject.
    /// 3. Otherwise bind and accept.
    ///
    /// An empty barcode (no-read) is always accepted and never bound.
    pub fn validate(&mut self, slot: u16, barcode: &str) -> bool {
        if barcode.is_empty() {
            return true;
        }

        if let Some(bound) = self.by_slot.get(&slot) {
            return bound == barcode;
        }

        if let Some(&other_slot) = self.by_barcode.get(barcode) {
            log::debug!(
                "Barcode {} already bound to slot {}, refusing slot {}",
                barcode,
                other_slot,
                slot
            );
            return false;
        }

        self.by_slot.insert(slot, barcode.to_string());
        self.by_barcode.insert(barcode.to_string(), slot);
        true
    }

    /// Remove the binding for a slot, returning the barcode it held
    pub fn release(&mut self, slot: u16) -> Option<String> {
        let barcode = self.by_slot.remove(&slot)?;
        self.by_barcode.remove(&barcode);
        Some(barcode)
    }

    pub fn bound_barcode(&self, slot: u16) -> Option<&str> {
        self.by_slot.get(&slot).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.by_slot.clear();
        self.by_barcode.clear();
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }
}
