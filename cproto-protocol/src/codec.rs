//! Encoder and decoder for cproto call and response frames.
//!
//! Call body:     `args` followed by a context `args` holding the execution
//!                timeout in milliseconds (`Int64`, 0 = none).
//! Response body: status `args` `[Int code, String message]` followed by the
//!                encoded result `args`.

use crate::args::{Args, Variant};
use crate::command::CmdCode;
use crate::error::{ErrorCode, ProtocolError};
use crate::frame::{put_header, Frame, FRAME_HEADER_SIZE};
use bytes::{BufMut, BytesMut};

/// Encodes calls and responses into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a call frame in a single pass.
    pub fn encode_call(
        command: CmdCode,
        seq: u32,
        args: &Args,
        exec_timeout_ms: i64,
    ) -> Result<BytesMut, ProtocolError> {
        let mut body = BytesMut::with_capacity(64);
        args.encode(&mut body);
        Args::from(vec![Variant::Int64(exec_timeout_ms)]).encode(&mut body);
        Self::frame(command, seq, body)
    }

    /// Encodes a response frame. Used by peers and test servers.
    pub fn encode_response(
        command: CmdCode,
        seq: u32,
        status: &Status,
        result: &Args,
    ) -> Result<BytesMut, ProtocolError> {
        let mut body = BytesMut::with_capacity(64);
        status.encode(&mut body);
        result.encode(&mut body);
        Self::frame(command, seq, body)
    }

    fn frame(command: CmdCode, seq: u32, body: BytesMut) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
        put_header(&mut buf, command, seq, body.len())?;
        buf.put_slice(&body);
        Ok(buf)
    }
}

/// Status prefix of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: ErrorCode,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: ErrorCode::Ok,
            message: String::new(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    fn encode(&self, buf: &mut BytesMut) {
        Args::from(vec![
            Variant::Int(self.code.code() as i32),
            Variant::String(self.message.clone()),
        ])
        .encode(buf);
    }
}

/// A response body split into its status and the still-encoded result.
#[derive(Debug)]
pub struct ResponseBody<'a> {
    pub status: Status,
    /// Encoded result `Args`, borrowed from the frame body.
    pub result: &'a [u8],
}

/// Splits a response body into status and result payload.
pub fn parse_response(body: &[u8]) -> Result<ResponseBody<'_>, ProtocolError> {
    let mut cursor = body;
    let status = Args::decode(&mut cursor)?;
    let code = status
        .first()
        .and_then(Variant::as_i64)
        .ok_or(ProtocolError::NotEnoughArgs {
            expected: 1,
            actual: 0,
        })?;
    let code = ErrorCode::from_code(code).ok_or(ProtocolError::UnknownStatus(code))?;
    let message = match status.get(1) {
        Some(Variant::String(s)) => s.clone(),
        Some(Variant::Bytes(_)) => return Err(ProtocolError::InvalidUtf8),
        _ => String::new(),
    };
    Ok(ResponseBody {
        status: Status { code, message },
        result: cursor,
    })
}

/// A decoded call body. Used by peers and test servers.
#[derive(Debug, Clone, PartialEq)]
pub struct CallBody {
    pub args: Args,
    pub exec_timeout_ms: i64,
}

impl CallBody {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = body;
        let args = Args::decode(&mut cursor)?;
        let exec_timeout_ms = if cursor.is_empty() {
            0
        } else {
            Args::decode(&mut cursor)?
                .first()
                .and_then(Variant::as_i64)
                .unwrap_or(0)
        };
        Ok(Self {
            args,
            exec_timeout_ms,
        })
    }
}

/// Reassembles frames from a byte stream.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
