//! Feedback handler for controller sort acknowledgements

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Completion signals waiting for controller feedback, keyed by slot
#[derive(Default)]
pub struct FeedbackHandler {
    awaiting: Mutex<HashMap<u16, Sender<bool>>>,
}

impl FeedbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a completion signal until feedback for `slot` arrives
    pub fn await_feedback(&self, slot: u16, signal: Sender<bool>) {
        if self.awaiting.lock().insert(slot, signal).is_some() {
            log::debug!("Slot {}: previous completion signal replaced", slot);
        }
    }

    /// Handle a feedback frame
    ///
    /// Resolves the registered signal with `error_code == 0`. Returns whether
    /// a signal was resolved. A non-zero error code is only a warning: the
    /// item has already been sorted physically.
    pub fn on_feedback(&self, slot: u16, error_code: u8, chute: u8) -> bool {
        let success = error_code == 0;
        if success {
            log::info!("Feedback: slot {} sorted to chute {}", slot, chute);
        } else {
            log::warn!(
                "Feedback: slot {} chute {} reported error code {}",
                slot,
                chute,
                error_code
            );
        }

        let Some(signal) = self.awaiting.lock().remove(&slot) else {
            return false;
        };
        // Receiver may have given up waiting
        let _ = signal.try_send(success);
        true
    }

    pub fn awaiting_count(&self) -> usize {
        self.awaiting.lock().len()
    }

    /// Drop every outstanding signal (receivers observe disconnection)
    pub fn clear(&self) {
        self.awaiting.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_success_resolves_true() {
        let handler = FeedbackHandler::new();
        let (tx, rx) = bounded(1);
        handler.await_feedback(7, tx);

        assert!(handler.on_feedback(7, 0, 5));
        assert_eq!(rx.try_recv(), Ok(true));
        assert_eq!(handler.awaiting_count(), 0);
    }

    #[test]
    fn test_error_code_resolves_false() {
        let handler = FeedbackHandler::new();
        let (tx, rx) = bounded(1);
        handler.await_feedback(7, tx);

        assert!(handler.on_feedback(7, 3, 5));
        assert_eq!(rx.try_recv(), Ok(false));
    }

    #[test]
    fn test_unregistered_slot_is_logged_only() {
        let handler = FeedbackHandler::new();
        assert!(!handler.on_feedback(1, 0, 1));
    }

    #[test]
    fn test_clear_disconnects_waiters() {
        let handler = FeedbackHandler::new();
        let (tx, rx) = bounded(1);
        handler.await_feedback(2, tx);
        handler.clear();

        assert!(rx.recv().is_err());
    }
}
