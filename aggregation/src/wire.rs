//! Datagram wire framing for aggregation packets.
//!
//! A packet is the only message the protocol exchanges. Layout, bit-exact:
//!
//! ```text
//! origin        int32, big-endian
//! level         uint8
//! multi_sig_len uint32, big-endian
//! multi_sig     multi_sig_len bytes (signature bytes ++ bitset bytes)
//! ```

use bytes::{Buf, BufMut};

use crate::error::AggregationError;
use crate::identity::NodeId;

/// Upper bound on the multi-signature payload; anything larger is rejected
/// before allocation.
const MAX_MULTISIG_LEN: usize = 1 << 20;

/// One aggregation message on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Identifier of the sending participant.
    pub origin: NodeId,
    /// Level this aggregate belongs to, from the receiver's point of view.
    pub level: u8,
    /// Marshalled [`MultiSignature`](crate::multisig::MultiSignature).
    pub multi_sig: Vec<u8>,
}

impl Packet {
    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 1 + 4 + self.multi_sig.len());
        buf.put_i32(self.origin);
        buf.put_u8(self.level);
        buf.put_u32(self.multi_sig.len() as u32);
        buf.extend_from_slice(&self.multi_sig);
        buf
    }

    /// Decode a packet, consuming the whole buffer.
    pub fn decode(mut buf: &[u8]) -> Result<Self, AggregationError> {
        if buf.len() < 9 {
            return Err(AggregationError::MalformedPacket(format!(
                "frame of {} bytes shorter than header",
                buf.len()
            )));
        }
        let origin = buf.get_i32();
        let level = buf.get_u8();
        let len = buf.get_u32() as usize;
        if len > MAX_MULTISIG_LEN {
            return Err(AggregationError::MalformedPacket(format!(
                "multi-signature length {len} exceeds limit"
            )));
        }
        if buf.len() != len {
            return Err(AggregationError::MalformedPacket(format!(
                "multi-signature length {len} does not match remaining {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            origin,
            level,
            multi_sig: buf.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let p = Packet {
            origin: 513,
            level: 7,
            multi_sig: vec![0xAA; 56],
        };
        let bytes = p.encode();
        assert_eq!(Packet::decode(&bytes).unwrap(), p);
    }

    #[test]
    fn header_is_big_endian() {
        let p = Packet {
            origin: 1,
            level: 2,
            multi_sig: vec![9],
        };
        let bytes = p.encode();
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[5..9], &[0, 0, 0, 1]);
        assert_eq!(bytes[9], 9);
    }

    #[test]
    fn rejects_truncated_and_oversized() {
        let p = Packet {
            origin: 0,
            level: 1,
            multi_sig: vec![1, 2, 3],
        };
        let bytes = p.encode();
        assert!(Packet::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(Packet::decode(&bytes[..5]).is_err());

        let mut huge = Vec::new();
        huge.put_i32(0);
        huge.put_u8(1);
        huge.put_u32((MAX_MULTISIG_LEN + 1) as u32);
        assert!(Packet::decode(&huge).is_err());
    }
}
