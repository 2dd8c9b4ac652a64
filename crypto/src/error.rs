//! Crypto layer error types.

use thiserror::Error;

/// Errors that can occur in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The pairing check did not hold for the given message and key.
    #[error("signature verification failed")]
    VerificationFailed,

    /// A point or scalar could not be decoded from its byte representation.
    #[error("malformed encoding: {0}")]
    Encoding(String),

    /// A byte buffer had the wrong length for the expected object.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}
