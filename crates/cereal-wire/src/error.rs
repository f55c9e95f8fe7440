use thiserror::Error;

/// Everything that can go wrong between raw bytes and a lock request.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame truncated: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("payload of {0} bytes exceeds the 4095 byte limit")]
    PayloadTooLarge(usize),

    #[error("subject context {0:#x} does not fit in 12 bits")]
    ContextOutOfRange(u16),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("unknown operation {0}")]
    UnknownOperation(u8),

    #[error("unknown response status {0}")]
    UnknownStatus(u8),

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
