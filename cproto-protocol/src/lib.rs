//! # cproto-protocol
//!
//! Wire protocol implementation for cproto, the binary RPC protocol spoken
//! by the database server.
//!
//! This crate provides:
//! - Length-prefixed binary framing with a fixed 16-byte header
//! - Call and response body layouts
//! - The `Variant`/`Args` value encoding used for call arguments and results
//! - Command codes, server status codes and protocol errors

pub mod args;
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;

pub use args::{Args, Variant};
pub use codec::{parse_response, CallBody, Decoder, Encoder, ResponseBody, Status};
pub use command::CmdCode;
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, FRAME_HEADER_SIZE, MAGIC};

/// Protocol version written into every outgoing frame.
pub const PROTOCOL_VERSION: u16 = 0x102;

/// Oldest peer protocol version this implementation accepts.
pub const MIN_COMPAT_VERSION: u16 = 0x101;

/// Default port of the database's cproto listener.
pub const DEFAULT_PORT: u16 = 6534;

/// Maximum frame body size (16 MiB).
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;
