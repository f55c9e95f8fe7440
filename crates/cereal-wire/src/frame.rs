use crate::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 0x0FFF;
pub const MAX_CONTEXT: u16 = 0x0FFF;

/// A signed request frame.
///
/// ```text
/// byte 0        version
/// bytes 1..4    24-bit word: high 12 bits subject context, low 12 bits payload length
/// bytes 4..4+n  payload
/// rest          signature
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub context: u16,
    pub payload: Bytes,
    pub signature: Bytes,
}

impl Frame {
    /// An unsigned frame at the current protocol version.
    pub fn new(context: u16, payload: Bytes) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            context,
            payload,
            signature: Bytes::new(),
        }
    }

    pub fn with_signature(mut self, signature: impl Into<Bytes>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn decode(mut data: Bytes) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN,
                available: data.len(),
            });
        }

        let version = data.get_u8();
        let word = data.get_uint(3) as u32;
        let context = (word >> 12) as u16;
        let len = (word & MAX_PAYLOAD_LEN as u32) as usize;

        if data.len() < len {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN + len,
                available: HEADER_LEN + data.len(),
            });
        }

        let payload = data.split_to(len);
        Ok(Self {
            version,
            context,
            payload,
            signature: data,
        })
    }

    pub fn encode(&self) -> Result<Bytes, FrameError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }
        if self.context > MAX_CONTEXT {
            return Err(FrameError::ContextOutOfRange(self.context));
        }

        let word = ((self.context as u64) << 12) | self.payload.len() as u64;
        let mut out =
            BytesMut::with_capacity(HEADER_LEN + self.payload.len() + self.signature.len());
        out.put_u8(self.version);
        out.put_uint(word, 3);
        out.put_slice(&self.payload);
        out.put_slice(&self.signature);
        Ok(out.freeze())
    }
}
