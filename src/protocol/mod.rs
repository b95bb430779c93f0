//! Sort controller wire protocol
//!
//! - [`frame`]: 8-byte frame codec
//! - [`reader`]: marker-based resynchronization over a byte stream
//! - [`constants`]: markers, function codes and offsets

pub mod constants;
pub mod frame;
pub mod reader;
mod ring_buffer;

pub use frame::{Frame, FunctionCode, encode_sort_command};
pub use reader::{FrameReader, ReadStatus};
