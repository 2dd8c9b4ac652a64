//! Aggregation core error types.

use thiserror::Error;

use crate::identity::NodeId;

/// Errors surfaced by the aggregation core.
///
/// Ingress errors (`MalformedPacket`, `UnknownOrigin`, `LevelOutOfRange`) are
/// logged and dropped at the network boundary. `InvalidSignature` is logged
/// and dropped inside signature processing. Length mismatches inside the
/// store are invariant violations and abort the offending task instead.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The packet could not be decoded.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// The packet's origin does not exist in the registry.
    #[error("unknown origin {0}")]
    UnknownOrigin(NodeId),

    /// A level outside [1, max_level] was requested.
    #[error("level {level} out of range (max {max})")]
    LevelOutOfRange { level: usize, max: usize },

    /// Two bitsets of different lengths were combined.
    #[error("bitset length mismatch: expected {expected}, got {actual}")]
    BitsetLengthMismatch { expected: usize, actual: usize },

    /// The pairing check failed for an incoming aggregate.
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] crypto::CryptoError),

    /// The candidate set at this level has no members.
    #[error("level {0} has no candidates")]
    LevelEmpty(usize),

    /// Every candidate at this level has already been picked.
    #[error("level {0} is saturated")]
    LevelSaturated(usize),

    /// The processing pipeline has been stopped.
    #[error("signature store stopped")]
    StoreStopped,
}
