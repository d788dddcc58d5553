//! Binary frame format for cproto.
//!
//! Frame layout (16 bytes header + body), all integers little-endian:
//!
//! ```text
//! +---------+---------+---------+----------+---------+
//! | magic   | version | command | body_len | seq     |
//! | 4 bytes | 2 bytes | 2 bytes | 4 bytes  | 4 bytes |
//! +---------+---------+---------+----------+---------+
//! | body                                             |
//! | body_len bytes                                   |
//! +--------------------------------------------------+
//! ```
//!
//! The low 10 bits of `version` hold the protocol version; bit 10 marks a
//! compressed body, which this implementation rejects.

use crate::command::CmdCode;
use crate::error::ProtocolError;
use crate::{MAX_BODY_SIZE, MIN_COMPAT_VERSION, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic number identifying cproto frames.
pub const MAGIC: u32 = 0xEEDD_1132;

/// Size of the fixed frame header in bytes (4+2+2+4+4 = 16).
pub const FRAME_HEADER_SIZE: usize = 16;

const VERSION_MASK: u16 = 0x03FF;
const COMPRESSED_BIT: u16 = 1 << 10;

/// A parsed cproto frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Command this frame belongs to (responses echo the call's command).
    pub command: CmdCode,
    /// Sequence number correlating a response with its call.
    pub seq: u32,
    /// Peer protocol version.
    pub version: u16,
    /// Frame body.
    pub body: Bytes,
}

impl Frame {
    /// Creates a new frame with the current protocol version.
    pub fn new(command: CmdCode, seq: u32, body: Bytes) -> Self {
        Self {
            command,
            seq,
            version: PROTOCOL_VERSION,
            body,
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.body.len());
        put_header(&mut buf, self.command, self.seq, self.body.len())?;
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// Nothing is consumed unless a whole frame is available.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &buf[..FRAME_HEADER_SIZE];
        let magic = header.get_u32_le();
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic {
                expected: MAGIC,
                actual: magic,
            });
        }

        let version_bits = header.get_u16_le();
        let version = version_bits & VERSION_MASK;
        if version < MIN_COMPAT_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        if version_bits & COMPRESSED_BIT != 0 {
            return Err(ProtocolError::CompressionUnsupported);
        }

        let command = CmdCode::from_u16(header.get_u16_le())?;

        let body_len = header.get_u32_le();
        if body_len > MAX_BODY_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: MAX_BODY_SIZE,
            });
        }
        let seq = header.get_u32_le();

        let total_len = FRAME_HEADER_SIZE + body_len as usize;
        if buf.len() < total_len {
            buf.reserve(total_len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let body = buf.split_to(body_len as usize).freeze();

        Ok(Some(Self {
            command,
            seq,
            version,
            body,
        }))
    }
}

/// Writes a frame header for a body of `body_len` bytes.
pub(crate) fn put_header(
    buf: &mut BytesMut,
    command: CmdCode,
    seq: u32,
    body_len: usize,
) -> Result<(), ProtocolError> {
    let body_len = u32::try_from(body_len)
        .ok()
        .filter(|len| *len <= MAX_BODY_SIZE)
        .ok_or(ProtocolError::FrameTooLarge {
            size: u32::try_from(body_len).unwrap_or(u32::MAX),
            max: MAX_BODY_SIZE,
        })?;

    buf.put_u32_le(MAGIC);
    buf.put_u16_le(PROTOCOL_VERSION);
    buf.put_u16_le(command.as_u16());
    buf.put_u32_le(body_len);
    buf.put_u32_le(seq);
    Ok(())
}
