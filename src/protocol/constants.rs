//! Constants for the sort controller wire protocol

// Frame delimiters
pub const FRAME_MARKER: u8 = 0xF9;
pub const FRAME_CHECKSUM: u8 = 0xFF;

// Function codes
pub const FN_SLOT_TRIGGER: u8 = 0x10; // Controller -> engine: slot passed trigger
pub const FN_SORT_COMMAND: u8 = 0x11; // Engine -> controller: route slot to chute
pub const FN_FEEDBACK: u8 = 0x12; // Controller -> engine: sort action result

// Frame layout
pub const FRAME_LEN: usize = 8;
pub const OFFSET_FUNCTION: usize = 1;
pub const OFFSET_SLOT: usize = 2; // u16 big-endian
pub const OFFSET_ERROR_CODE: usize = 5; // Feedback only
pub const OFFSET_CHUTE: usize = 6; // Command and feedback
pub const OFFSET_CHECKSUM: usize = 7;

// Stream handling
pub const READ_CHUNK_SIZE: usize = 256;
pub const STREAM_BUFFER_SIZE: usize = 1024;
pub const SOCKET_READ_TIMEOUT_MS: u64 = 500;
pub const ACCEPT_POLL_MS: u64 = 10;
