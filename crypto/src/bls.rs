//! BLS signatures over the BLS12-381 pairing-friendly curve.
//!
//! Signatures live in G1 (48 bytes compressed), public keys in G2. Both are
//! aggregatable by point addition, which is what makes the scheme suitable
//! for large-scale multi-signature aggregation: verifying an aggregate costs
//! one pairing check against the sum of the contributors' public keys.
//!
//! Keys are assumed to carry a proof of possession established at
//! registration time; rogue-key defenses are outside this crate.

use ark_bls12_381::{Bls12_381, Fr, G1Affine, G1Projective, G2Projective};
use ark_ec::{CurveGroup, PrimeGroup, pairing::Pairing};
use ark_ff::{PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::{CryptoRng, Rng, SeedableRng, rngs::StdRng};

use crate::error::CryptoError;
use crate::traits::{PublicKey, Scheme, SecretKey, Signature};

/// Compressed size of a G1 point, and therefore of a marshalled signature.
pub const SIGNATURE_BYTES: usize = 48;

/// Marker type selecting the BLS12-381 scheme.
pub struct Bls12381;

impl Scheme for Bls12381 {
    type Secret = BlsSecretKey;
    type Public = BlsPublicKey;
    type Sig = BlsSignature;

    const SIGNATURE_LEN: usize = SIGNATURE_BYTES;
}

#[derive(Clone)]
pub struct BlsSecretKey(Fr);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsPublicKey(G2Projective);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsSignature(G1Projective);

/// Hash a message to a point on G1.
fn hash_to_g1(message: &[u8]) -> G1Projective {
    let hash = blake3::hash(message);
    let scalar = Fr::from_le_bytes_mod_order(hash.as_bytes());
    G1Projective::generator() * scalar
}

impl BlsSecretKey {
    /// Generate a new random secret key.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self(Fr::rand(rng))
    }

    /// Derive a secret key deterministically from a seed.
    ///
    /// Local clusters use this so every node can reconstruct the full
    /// registry of public keys without a key-distribution step.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self(Fr::rand(&mut rng))
    }
}

impl SecretKey for BlsSecretKey {
    type Pub = BlsPublicKey;

    fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(G2Projective::generator() * self.0)
    }

    fn sign(&self, message: &[u8]) -> Result<BlsSignature, CryptoError> {
        Ok(BlsSignature(hash_to_g1(message) * self.0))
    }
}

impl PublicKey for BlsPublicKey {
    type Sig = BlsSignature;

    fn combine(&self, other: &Self) -> Self {
        Self(self.0 + other.0)
    }

    fn verify(&self, message: &[u8], signature: &BlsSignature) -> Result<(), CryptoError> {
        // e(sig, g2) == e(H(m), pk)
        let left = Bls12_381::pairing(signature.0, G2Projective::generator());
        let right = Bls12_381::pairing(hash_to_g1(message), self.0);
        if left == right {
            Ok(())
        } else {
            Err(CryptoError::VerificationFailed)
        }
    }
}

impl Signature for BlsSignature {
    fn combine(&self, other: &Self) -> Self {
        Self(self.0 + other.0)
    }

    fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SIGNATURE_BYTES);
        self.0
            .into_affine()
            .serialize_compressed(&mut buf)
            .expect("serializing a G1 point to a Vec cannot fail");
        buf
    }

    fn unmarshal(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIGNATURE_BYTES {
            return Err(CryptoError::Length {
                expected: SIGNATURE_BYTES,
                actual: bytes.len(),
            });
        }
        let point = G1Affine::deserialize_compressed(bytes)
            .map_err(|e| CryptoError::Encoding(format!("{e:?}")))?;
        Ok(Self(point.into()))
    }
}
