//! Cryptographic primitives for the multi-signature aggregation protocol.
//!
//! The aggregation core is written against the capability traits in
//! [`traits`] (signature, public key, secret key, scheme). The production
//! implementation is BLS over the BLS12-381 pairing-friendly curve in
//! [`bls`]; test code substitutes cheap fake schemes through the same traits.

pub mod bls;
pub mod error;
pub mod traits;

pub use bls::{Bls12381, BlsPublicKey, BlsSecretKey, BlsSignature};
pub use error::CryptoError;
pub use traits::{PublicKey, Scheme, SecretKey, Signature};
