//! Lanproxy Protocol Definitions
//!
//! This crate defines the frame format spoken between the lanproxy client and
//! the proxy server, plus the length-prefixed codec that turns a byte stream
//! into frames.
//!
//! ```text
//!  4 bytes   body length (u32, big-endian)
//!  1 byte    message type
//!  8 bytes   serial number (u64, big-endian)
//!  1 byte    uri length
//!  N bytes   uri
//!  M bytes   data
//! ```

pub mod codec;
pub mod frame;

pub use codec::{CodecError, FrameCodec};
pub use frame::{Frame, MessageType};

/// Size of the body length prefix
pub const LEN_SIZE: usize = 4;

/// Size of the message type field
pub const TYPE_SIZE: usize = 1;

/// Size of the serial number field
pub const SERIAL_NUMBER_SIZE: usize = 8;

/// Size of the uri length field
pub const URI_LENGTH_SIZE: usize = 1;

/// Smallest valid body: type + serial number + uri length
pub const MIN_BODY_LENGTH: usize = TYPE_SIZE + SERIAL_NUMBER_SIZE + URI_LENGTH_SIZE;

/// Longest uri a frame can carry
pub const MAX_URI_LENGTH: usize = u8::MAX as usize;

/// Maximum body length accepted by the decoder (2MB)
pub const MAX_FRAME_LENGTH: usize = 2 * 1024 * 1024;

/// Default proxy server port
pub const DEFAULT_SERVER_PORT: u16 = 4900;
