use thiserror::Error;

/// Unified error type for applications built on Cereal.
///
/// Aggregates errors from the sub-crates into a single type for
/// application-level error handling.
#[derive(Error, Debug)]
pub enum CerealError {
    /// The lock server refused or could not serve a request.
    #[error("Lock error: {0}")]
    Lock(#[from] cereal_core::LockError),

    /// A frame could not be decoded, authenticated or delivered.
    #[cfg(feature = "wire")]
    #[error("Wire error: {0}")]
    Frame(#[from] cereal_wire::FrameError),

    /// Standard IO error.
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use cereal_core::LockError;

    #[test]
    fn test_conversions() {
        let err: CerealError = LockError::Disposed {
            system: "cereal.test".into(),
        }
        .into();
        assert!(matches!(err, CerealError::Lock(_)));
        assert_eq!(err.to_string(), "Lock error: cereal.test has been shut down");

        let err: CerealError = std::io::Error::other("boom").into();
        assert!(matches!(err, CerealError::IO(_)));
    }

    #[cfg(feature = "wire")]
    #[test]
    fn test_frame_errors_convert() {
        let err: CerealError = cereal_wire::FrameError::InvalidSignature.into();
        assert!(matches!(err, CerealError::Frame(_)));
    }
}
