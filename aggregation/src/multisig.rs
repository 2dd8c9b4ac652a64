//! Multi-signatures: an aggregated signature plus the bitset naming its
//! contributors.

use std::fmt;

use crypto::Signature;

use crate::bitset::Bitset;
use crate::error::AggregationError;
use crate::identity::NodeId;

/// An aggregated signature together with the bitset identifying exactly
/// which members of a candidate set contributed to it.
///
/// The bitset length equals the size of the candidate set the signature
/// pertains to (or the registry size for a full signature). The aggregated
/// signature always corresponds exactly to the set bits.
#[derive(Clone)]
pub struct MultiSignature<S: Signature> {
    pub bitset: Bitset,
    pub signature: S,
}

impl<S: Signature> MultiSignature<S> {
    pub fn new(bitset: Bitset, signature: S) -> Self {
        Self { bitset, signature }
    }

    /// A multi-signature with a single contributor at `index` in a candidate
    /// set of `len` members.
    pub fn individual(len: usize, index: usize, signature: S) -> Self {
        let mut bitset = Bitset::new(len);
        bitset.set(index, true);
        Self { bitset, signature }
    }

    /// Number of contributors.
    pub fn cardinality(&self) -> usize {
        self.bitset.cardinality()
    }

    /// True if exactly one participant contributed.
    pub fn is_individual(&self) -> bool {
        self.cardinality() == 1
    }

    /// Serialize as signature bytes followed by bitset bytes.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = self.signature.marshal();
        buf.extend_from_slice(&self.bitset.marshal());
        buf
    }

    /// Deserialize from `buf`, splitting at the scheme's fixed signature
    /// length. Fails if the trailing bitset is inconsistent.
    pub fn unmarshal(buf: &[u8], signature_len: usize) -> Result<Self, AggregationError> {
        if buf.len() < signature_len {
            return Err(AggregationError::MalformedPacket(format!(
                "multi-signature payload of {} bytes shorter than signature ({signature_len})",
                buf.len(),
            )));
        }
        let signature = S::unmarshal(&buf[..signature_len])?;
        let bitset = Bitset::unmarshal(&buf[signature_len..])?;
        Ok(Self { bitset, signature })
    }
}

impl<S: Signature> fmt::Debug for MultiSignature<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiSignature({:?})", self.bitset)
    }
}

/// A multi-signature tagged with the level it was aggregated at. Input to
/// the partitioner's combine operations.
#[derive(Clone, Debug)]
pub struct LevelSig<S: Signature> {
    pub level: u8,
    pub ms: MultiSignature<S>,
}

/// An inbound multi-signature awaiting verification: who sent it, for which
/// level, and the parsed payload. Created at packet ingress and dropped once
/// a verdict is recorded.
#[derive(Clone, Debug)]
pub struct IncomingSig<S: Signature> {
    pub origin: NodeId,
    pub level: u8,
    pub ms: MultiSignature<S>,
}

impl<S: Signature> IncomingSig<S> {
    pub fn is_individual(&self) -> bool {
        self.ms.is_individual()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_helpers::{FakeSig, SIG_LEN};

    #[test]
    fn individual_has_cardinality_one() {
        let ms = MultiSignature::individual(8, 3, FakeSig::valid());
        assert!(ms.is_individual());
        assert_eq!(ms.bitset.next_set_bit(0), Some(3));
    }

    #[test]
    fn marshal_roundtrip() {
        let ms = MultiSignature::individual(65, 64, FakeSig::valid());
        let bytes = ms.marshal();
        let back: MultiSignature<FakeSig> = MultiSignature::unmarshal(&bytes, SIG_LEN).unwrap();
        assert_eq!(back.bitset, ms.bitset);
        assert_eq!(back.cardinality(), 1);
    }

    #[test]
    fn unmarshal_rejects_truncation() {
        let ms = MultiSignature::individual(8, 0, FakeSig::valid());
        let bytes = ms.marshal();
        for cut in [0, SIG_LEN - 1, bytes.len() - 1] {
            assert!(MultiSignature::<FakeSig>::unmarshal(&bytes[..cut], SIG_LEN).is_err());
        }
    }
}
