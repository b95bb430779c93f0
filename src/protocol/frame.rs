//! Fixed-length frame codec for the sort controller
//!
//! Every frame is exactly 8 bytes:
//!
//! ```text
//! ┌──────┬──────┬───────────┬──────┬───────┬───────┬──────┐
//! │ 0xF9 │  FN  │ SLOT (BE) │ RSVD │ ERROR │ CHUTE │ 0xFF │
//! │  [0] │  [1] │   [2..3]  │  [4] │  [5]  │  [6]  │  [7] │
//! └──────┴──────┴───────────┴──────┴───────┴───────┴──────┘
//! ```
//!
//! There is no length prefix. Frame boundaries are recovered from the marker
//! byte and the fixed length (see [`super::reader::FrameReader`]).

use super::constants::*;
use crate::error::{Error, Result};

/// Function code carried in byte 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// Slot passed the trigger sensor (controller -> engine)
    SlotTrigger,
    /// Route slot to chute (engine -> controller)
    SortCommand,
    /// Sort action acknowledgement (controller -> engine)
    Feedback,
    /// Code not defined by the protocol
    Unknown(u8),
}

impl FunctionCode {
    #[inline]
    pub fn from_byte(b: u8) -> Self {
        match b {
            FN_SLOT_TRIGGER => Self::SlotTrigger,
            FN_SORT_COMMAND => Self::SortCommand,
            FN_FEEDBACK => Self::Feedback,
            other => Self::Unknown(other),
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::SlotTrigger => FN_SLOT_TRIGGER,
            Self::SortCommand => FN_SORT_COMMAND,
            Self::Feedback => FN_FEEDBACK,
            Self::Unknown(b) => b,
        }
    }
}

/// Decoded 8-byte frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub function: FunctionCode,
    pub slot: u16,
    /// Byte 4, unused by all current function codes
    pub reserved: u8,
    /// Byte 5, meaningful for feedback only (0 = success)
    pub error_code: u8,
    /// Byte 6, target chute for commands and feedback
    pub chute: u8,
}

impl Frame {
    /// Decode and validate a frame
    ///
    /// Fails on wrong length, wrong marker or wrong checksum. Never panics.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FRAME_LEN {
            return Err(Error::MalformedFrame(format!(
                "expected {} bytes, got {}",
                FRAME_LEN,
                buf.len()
            )));
        }
        if buf[0] != FRAME_MARKER {
            return Err(Error::MalformedFrame(format!(
                "bad marker 0x{:02X}",
                buf[0]
            )));
        }
        if buf[OFFSET_CHECKSUM] != FRAME_CHECKSUM {
            return Err(Error::MalformedFrame(format!(
                "bad checksum 0x{:02X}",
                buf[OFFSET_CHECKSUM]
            )));
        }

        Ok(Self {
            function: FunctionCode::from_byte(buf[OFFSET_FUNCTION]),
            slot: u16::from_be_bytes([buf[OFFSET_SLOT], buf[OFFSET_SLOT + 1]]),
            reserved: buf[4],
            error_code: buf[OFFSET_ERROR_CODE],
            chute: buf[OFFSET_CHUTE],
        })
    }

    /// Encode this frame with marker and checksum filled in
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut data = [0u8; FRAME_LEN];
        data[0] = FRAME_MARKER;
        data[OFFSET_FUNCTION] = self.function.as_byte();
        data[OFFSET_SLOT..OFFSET_SLOT + 2].copy_from_slice(&self.slot.to_be_bytes());
        data[4] = self.reserved;
        data[OFFSET_ERROR_CODE] = self.error_code;
        data[OFFSET_CHUTE] = self.chute;
        data[OFFSET_CHECKSUM] = FRAME_CHECKSUM;
        data
    }

    /// Slot trigger as the controller sends it
    pub const fn slot_trigger(slot: u16) -> Self {
        Self {
            function: FunctionCode::SlotTrigger,
            slot,
            reserved: 0,
            error_code: 0,
            chute: 0,
        }
    }

    /// Feedback as the controller sends it
    pub const fn feedback(slot: u16, error_code: u8, chute: u8) -> Self {
        Self {
            function: FunctionCode::Feedback,
            slot,
            reserved: 0,
            error_code,
            chute,
        }
    }
}

/// Build a sort command frame (pure)
///
/// The checksum byte is always written; the controller's inbound validation
/// is not relied upon either way.
pub fn encode_sort_command(slot: u16, chute: u8) -> [u8; FRAME_LEN] {
    let mut data = [0u8; FRAME_LEN];
    data[0] = FRAME_MARKER;
    data[OFFSET_FUNCTION] = FN_SORT_COMMAND;
    data[OFFSET_SLOT..OFFSET_SLOT + 2].copy_from_slice(&slot.to_be_bytes());
    data[OFFSET_CHUTE] = chute;
    data[OFFSET_CHECKSUM] = FRAME_CHECKSUM;
    data
}
