//! Routes controller frames to the engine and the feedback handler

use super::FrameHandler;
use crate::engine::MatchEngine;
use crate::engine::feedback::FeedbackHandler;
use crate::protocol::{Frame, FunctionCode};
use std::sync::Arc;

/// Protocol dispatcher for inbound frames
pub struct ProtocolRouter {
    engine: Arc<MatchEngine>,
    feedback: Arc<FeedbackHandler>,
}

impl ProtocolRouter {
    pub fn new(engine: Arc<MatchEngine>, feedback: Arc<FeedbackHandler>) -> Self {
        Self { engine, feedback }
    }
}

impl FrameHandler for ProtocolRouter {
    fn handle_frame(&self, frame: Frame) {
        match frame.function {
            FunctionCode::SlotTrigger => {
                // Duplicates and triggers after shutdown are logged by the engine
                let _ = self.engine.on_slot_trigger(frame.slot);
            }
            FunctionCode::Feedback => {
                self.feedback
                    .on_feedback(frame.slot, frame.error_code, frame.chute);
            }
            FunctionCode::SortCommand => {
                log::warn!(
                    "Controller echoed a sort command for slot {}, ignoring",
                    frame.slot
                );
            }
            FunctionCode::Unknown(code) => {
                log::warn!(
                    "Unknown function code 0x{:02X} for slot {}, dropping",
                    code,
                    frame.slot
                );
            }
        }
    }
}
