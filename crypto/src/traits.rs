//! Capability traits consumed by the aggregation core.
//!
//! The core never touches curve arithmetic directly: it signs once at
//! startup, combines signatures and public keys while merging contributions,
//! and runs one verification per selected incoming aggregate. Everything
//! else (key generation, pairings, encodings) lives behind these traits.

use std::fmt::Debug;

use crate::error::CryptoError;

/// An aggregatable signature.
///
/// Combining two signatures over the same message yields the signature of
/// the union of their signer sets. Callers are responsible for never
/// combining signatures whose signer sets overlap.
pub trait Signature: Clone + Debug + Send + Sync + Sized + 'static {
    /// Aggregate `other` into `self`, returning the combined signature.
    fn combine(&self, other: &Self) -> Self;

    /// Serialize to the scheme's fixed-size canonical byte representation.
    fn marshal(&self) -> Vec<u8>;

    /// Deserialize from the scheme's canonical byte representation.
    fn unmarshal(bytes: &[u8]) -> Result<Self, CryptoError>;
}

/// An aggregatable public key.
pub trait PublicKey: Clone + Debug + Send + Sync + 'static {
    type Sig: Signature;

    /// Aggregate `other` into `self`, returning the combined key.
    fn combine(&self, other: &Self) -> Self;

    /// Verify `signature` over `message` against this (possibly aggregated)
    /// key.
    fn verify(&self, message: &[u8], signature: &Self::Sig) -> Result<(), CryptoError>;
}

/// A signing key.
pub trait SecretKey: Clone + Send + Sync + 'static {
    type Pub: PublicKey;

    /// Derive the public key for this secret key.
    fn public_key(&self) -> Self::Pub;

    /// Sign a message.
    fn sign(&self, message: &[u8]) -> Result<<Self::Pub as PublicKey>::Sig, CryptoError>;
}

/// A complete signature scheme, tying the three key types together.
///
/// `SIGNATURE_LEN` is the exact byte length of a marshalled signature. Wire
/// payloads carry the signature bytes followed by the contributor bitset, so
/// unmarshalling splits the buffer at this offset.
pub trait Scheme: Send + Sync + 'static {
    type Secret: SecretKey<Pub = Self::Public>;
    type Public: PublicKey<Sig = Self::Sig>;
    type Sig: Signature;

    const SIGNATURE_LEN: usize;
}
