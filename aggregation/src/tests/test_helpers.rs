//! Shared fixtures: a cheap fake signature scheme, registries of fake
//! identities, and multi-signature builders.

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use crypto::{CryptoError, PublicKey, Scheme, SecretKey, Signature};
use slog::{Drain, Level, Logger, o};

use crate::bitset::Bitset;
use crate::identity::{ArrayRegistry, Identity};
use crate::multisig::MultiSignature;

/// Marshalled size of a [`FakeSig`].
pub const SIG_LEN: usize = 8;

/// A signature whose only content is whether it verifies. Combining keeps
/// validity iff both sides are valid, mirroring how a forged contribution
/// poisons a real aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeSig {
    valid: bool,
}

impl FakeSig {
    pub fn valid() -> Self {
        Self { valid: true }
    }

    pub fn invalid() -> Self {
        Self { valid: false }
    }
}

impl Signature for FakeSig {
    fn combine(&self, other: &Self) -> Self {
        Self {
            valid: self.valid && other.valid,
        }
    }

    fn marshal(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SIG_LEN];
        buf[0] = self.valid as u8;
        buf
    }

    fn unmarshal(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIG_LEN {
            return Err(CryptoError::Length {
                expected: SIG_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            valid: bytes[0] == 1,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakePub;

impl PublicKey for FakePub {
    type Sig = FakeSig;

    fn combine(&self, _other: &Self) -> Self {
        FakePub
    }

    fn verify(&self, _message: &[u8], signature: &FakeSig) -> Result<(), CryptoError> {
        if signature.valid {
            Ok(())
        } else {
            Err(CryptoError::VerificationFailed)
        }
    }
}

#[derive(Clone, Debug)]
pub struct FakeSecret;

impl SecretKey for FakeSecret {
    type Pub = FakePub;

    fn public_key(&self) -> FakePub {
        FakePub
    }

    fn sign(&self, _message: &[u8]) -> Result<FakeSig, CryptoError> {
        Ok(FakeSig::valid())
    }
}

pub struct FakeScheme;

impl Scheme for FakeScheme {
    type Secret = FakeSecret;
    type Public = FakePub;
    type Sig = FakeSig;

    const SIGNATURE_LEN: usize = SIG_LEN;
}

/// Registry of `n` fake identities with loopback addresses.
pub fn fake_registry(n: usize) -> Arc<ArrayRegistry<FakePub>> {
    let ids = (0..n)
        .map(|i| Identity::new(i as i32, format!("127.0.0.1:{}", 30000 + i), FakePub))
        .collect();
    Arc::new(ArrayRegistry::new(ids).expect("dense fake ids"))
}

/// A valid multi-signature with the given bits set.
pub fn ms_with_bits(len: usize, bits: &[usize]) -> MultiSignature<FakeSig> {
    let mut bitset = Bitset::new(len);
    for &i in bits {
        bitset.set(i, true);
    }
    MultiSignature::new(bitset, FakeSig::valid())
}

/// Terminal logger honouring `RUST_LOG`, for debugging end-to-end runs.
pub fn test_logger() -> Logger {
    let level = env::var("RUST_LOG")
        .ok()
        .and_then(|value| Level::from_str(&value).ok())
        .unwrap_or(Level::Warning);
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .build()
        .fuse()
        .filter_level(level)
        .fuse();
    Logger::root(drain, o!())
}

/// Logger that discards everything.
pub fn quiet_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
