//! Call answers.

use crate::error::ClientError;
use bytes::Bytes;
use cproto_protocol::Args;

/// Result payload bytes of a completed call.
///
/// Completions run on the I/O thread and receive a payload that borrows the
/// receive buffer of the current read cycle. Anything that has to outlive the
/// completion must be promoted with [`Answer::into_owned`].
#[derive(Debug, Clone)]
pub enum Payload<'a> {
    Borrowed(&'a [u8]),
    Owned(Bytes),
}

/// The successful outcome of a call: its still-encoded result values.
#[derive(Debug, Clone)]
pub struct Answer<'a> {
    payload: Payload<'a>,
}

impl<'a> Answer<'a> {
    /// Wraps a payload borrowed from the receive buffer.
    pub fn borrowed(data: &'a [u8]) -> Self {
        Self {
            payload: Payload::Borrowed(data),
        }
    }

    pub fn owned(data: Bytes) -> Answer<'static> {
        Answer {
            payload: Payload::Owned(data),
        }
    }

    pub fn empty() -> Answer<'static> {
        Answer::owned(Bytes::new())
    }

    /// Raw encoded result bytes.
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::Borrowed(data) => data,
            Payload::Owned(data) => data,
        }
    }

    pub fn payload(&self) -> &Payload<'a> {
        &self.payload
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.payload, Payload::Owned(_))
    }

    /// Detaches the answer from the receive buffer, copying a borrowed
    /// payload exactly once. Owned answers are moved through unchanged.
    pub fn into_owned(self) -> Answer<'static> {
        match self.payload {
            Payload::Borrowed(data) => Answer::owned(Bytes::copy_from_slice(data)),
            Payload::Owned(data) => Answer::owned(data),
        }
    }

    /// Decodes the result values, requiring at least `min_args` of them.
    ///
    /// An empty payload decodes as an empty list.
    pub fn args(&self, min_args: usize) -> Result<Args, ClientError> {
        let mut data = self.data();
        let args = if data.is_empty() {
            Args::new()
        } else {
            Args::decode(&mut data)?
        };
        Ok(args.require(min_args)?)
    }
}
