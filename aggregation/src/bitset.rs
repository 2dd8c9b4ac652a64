//! Fixed-length dense bitset tracking which participants contributed to an
//! aggregate signature.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::AggregationError;

const WORD_BITS: usize = 64;

/// A fixed-length bitset packed into 64-bit words.
///
/// The length is set at construction and never changes; operations over two
/// bitsets require equal lengths. Bits beyond the logical length are always
/// zero.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitset {
    len: usize,
    words: Vec<u64>,
}

impl Bitset {
    /// Create an all-zero bitset of `len` bits.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(WORD_BITS)],
        }
    }

    /// Number of addressable bits.
    pub fn bit_length(&self) -> usize {
        self.len
    }

    /// Read bit `i`. Panics if `i` is out of range.
    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len, "bit {i} out of range for bitset of {}", self.len);
        self.words[i / WORD_BITS] >> (i % WORD_BITS) & 1 == 1
    }

    /// Write bit `i`. Panics if `i` is out of range.
    pub fn set(&mut self, i: usize, bit: bool) {
        assert!(i < self.len, "bit {i} out of range for bitset of {}", self.len);
        let mask = 1u64 << (i % WORD_BITS);
        if bit {
            self.words[i / WORD_BITS] |= mask;
        } else {
            self.words[i / WORD_BITS] &= !mask;
        }
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Bitwise union, as a fresh bitset.
    pub fn union(&self, other: &Self) -> Result<Self, AggregationError> {
        self.check_len(other)?;
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a | b)
            .collect();
        Ok(Self { len: self.len, words })
    }

    /// Bitwise intersection, as a fresh bitset.
    pub fn intersection(&self, other: &Self) -> Result<Self, AggregationError> {
        self.check_len(other)?;
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a & b)
            .collect();
        Ok(Self { len: self.len, words })
    }

    /// True if every bit set in `other` is also set in `self`. Bitsets of
    /// different lengths are never supersets of each other.
    pub fn is_superset_of(&self, other: &Self) -> bool {
        self.len == other.len
            && self
                .words
                .iter()
                .zip(&other.words)
                .all(|(a, b)| a & b == *b)
    }

    /// Index of the first set bit at or after `from`, if any.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let mut word_idx = from / WORD_BITS;
        // Mask off bits below `from` in the first word.
        let mut word = self.words[word_idx] & (u64::MAX << (from % WORD_BITS));
        loop {
            if word != 0 {
                let i = word_idx * WORD_BITS + word.trailing_zeros() as usize;
                return (i < self.len).then_some(i);
            }
            word_idx += 1;
            if word_idx >= self.words.len() {
                return None;
            }
            word = self.words[word_idx];
        }
    }

    /// Iterate over the indices of all set bits in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = 0;
        std::iter::from_fn(move || {
            let i = self.next_set_bit(next)?;
            next = i + 1;
            Some(i)
        })
    }

    /// Serialize as a little-endian u32 bit length followed by the words in
    /// little-endian byte order.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.words.len() * 8);
        buf.put_u32_le(self.len as u32);
        for word in &self.words {
            buf.put_u64_le(*word);
        }
        buf
    }

    /// Deserialize a bitset, consuming the whole buffer.
    ///
    /// Fails if the buffer length does not match the encoded bit length
    /// exactly, or if bits beyond the logical length are set.
    pub fn unmarshal(mut buf: &[u8]) -> Result<Self, AggregationError> {
        if buf.len() < 4 {
            return Err(AggregationError::MalformedPacket(
                "bitset shorter than its length prefix".into(),
            ));
        }
        let len = buf.get_u32_le() as usize;
        let n_words = len.div_ceil(WORD_BITS);
        if buf.len() != n_words * 8 {
            return Err(AggregationError::BitsetLengthMismatch {
                expected: n_words * 8,
                actual: buf.len(),
            });
        }
        let words: Vec<u64> = (0..n_words).map(|_| buf.get_u64_le()).collect();
        let bs = Self { len, words };
        if let Some(last) = bs.words.last() {
            let tail_bits = len % WORD_BITS;
            if tail_bits != 0 && last >> tail_bits != 0 {
                return Err(AggregationError::MalformedPacket(
                    "bitset has bits set beyond its length".into(),
                ));
            }
        }
        Ok(bs)
    }

    fn check_len(&self, other: &Self) -> Result<(), AggregationError> {
        if self.len != other.len {
            return Err(AggregationError::BitsetLengthMismatch {
                expected: self.len,
                actual: other.len,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Bitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{{", self.cardinality(), self.len)?;
        for (n, i) in self.iter_set().enumerate() {
            if n > 0 {
                write!(f, ",")?;
            }
            write!(f, "{i}")?;
        }
        write!(f, "}}")
    }
}
