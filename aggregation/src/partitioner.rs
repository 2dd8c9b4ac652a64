//! Binomial-tree partitioning of the participant set.
//!
//! From each node's point of view the registry splits into log2(N) disjoint
//! candidate sets, one per level: the candidate set at level l is the set of
//! identifiers sharing the top (log2(N) - l) bits with the own identifier
//! but differing in bit l-1. Level 1 is the closest single peer; the top
//! level is the far half of the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crypto::Scheme;
use crypto::Signature;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::bitset::Bitset;
use crate::error::AggregationError;
use crate::identity::{Identity, Registry};
use crate::multisig::{LevelSig, MultiSignature};

/// Ceiling of log2, with log2(1) = 0.
pub(crate) fn log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

fn is_set(id: usize, bit: isize) -> bool {
    bit >= 0 && (id >> bit) & 1 == 1
}

/// Partitioning strategy: candidate sets per level, rotation through them,
/// and assembly of per-level signatures into wider bitsets.
pub trait Partitioner<S: Scheme>: Send + Sync {
    /// Highest level, equal to log2 of the registry size.
    fn max_level(&self) -> usize;

    /// Cardinality of the candidate set at `level`.
    fn size(&self, level: usize) -> Result<usize, AggregationError>;

    /// The ordered candidate set at `level`.
    fn identities_at(&self, level: usize) -> Result<Vec<Identity<S::Public>>, AggregationError>;

    /// Up to `count` identities at `level`, advancing a per-level cursor.
    /// Fails with `LevelEmpty` when the set has no members and with
    /// `LevelSaturated` once every member has been picked.
    fn pick_next_at(
        &self,
        level: usize,
        count: usize,
    ) -> Result<Vec<Identity<S::Public>>, AggregationError>;

    /// Combine level-tagged signatures into one multi-signature whose bitset
    /// spans the union of candidate sets for levels below `level` (plus the
    /// own node). Returns `None` for empty input.
    fn combine(
        &self,
        sigs: &[LevelSig<S::Sig>],
        level: usize,
    ) -> Result<Option<LevelSig<S::Sig>>, AggregationError>;

    /// Combine level-tagged signatures into a multi-signature over the full
    /// registry. Returns `None` for empty input.
    fn combine_full(
        &self,
        sigs: &[LevelSig<S::Sig>],
    ) -> Result<Option<MultiSignature<S::Sig>>, AggregationError>;
}

/// Partitioner splitting the registry by iteratively halving along the bits
/// of the own identifier, highest bit first.
pub struct BinomialPartitioner<S: Scheme> {
    id: usize,
    bitsize: usize,
    size: usize,
    reg: Arc<dyn Registry<S::Public>>,
    /// Rotation cursor per level: the next registry index to pick.
    picked: Mutex<HashMap<usize, usize>>,
}

impl<S: Scheme> BinomialPartitioner<S> {
    pub fn new(id: usize, reg: Arc<dyn Registry<S::Public>>) -> Self {
        let size = reg.size();
        Self {
            id,
            bitsize: log2(size),
            size,
            reg,
            picked: Mutex::new(HashMap::new()),
        }
    }

    /// The half-open range [min, max) of registry indices forming the
    /// candidate set at `level`.
    ///
    /// Walks the bits of the own id from highest to lowest, narrowing the
    /// range to the half the own id lies in, and at the final bit (the one
    /// `level` addresses) inverts the choice to land in the opposite half.
    fn range_level(&self, level: usize) -> Result<(usize, usize), AggregationError> {
        if level > self.bitsize {
            return Err(AggregationError::LevelOutOfRange {
                level,
                max: self.bitsize,
            });
        }
        let mut min = 0usize;
        let mut max = self.size;
        let max_idx = level as isize - 1;
        let mut idx = self.bitsize as isize - 1;
        while idx >= max_idx && min <= max {
            let middle = (min + max) / 2;
            if is_set(self.id, idx) {
                if idx == max_idx {
                    max = middle;
                } else {
                    min = middle;
                }
            } else if idx == max_idx {
                min = middle;
            } else {
                max = middle;
            }
            if max == min || max == 1 || min == self.size {
                break;
            }
            idx -= 1;
        }
        Ok((min, max))
    }

    /// The opposite of [`range_level`](Self::range_level): the half the own
    /// id *is* in at the given depth. This is the range a peer at `level`
    /// expects a combined signature to cover, and it equals the union of the
    /// candidate sets of all lower levels plus the own id.
    fn range_level_inverse(&self, level: usize) -> Result<(usize, usize), AggregationError> {
        if level > self.bitsize + 1 {
            return Err(AggregationError::LevelOutOfRange {
                level,
                max: self.bitsize + 1,
            });
        }
        let mut min = 0usize;
        let mut max = self.size;
        let max_idx = level as isize - 1;
        let mut idx = self.bitsize as isize - 1;
        while idx >= max_idx && min <= max {
            let middle = (min + max) / 2;
            if is_set(self.id, idx) {
                min = middle;
            } else {
                max = middle;
            }
            if max == min || max == 1 || min == self.size {
                break;
            }
            idx -= 1;
        }
        Ok((min, max))
    }

    /// Lay each signature's bits into `bitset` at its level offset and fold
    /// the scheme signatures together. Panics if two signatures claim the
    /// same slot, which would break the bitset/signature correspondence.
    fn fold_into(
        &self,
        sigs: &[LevelSig<S::Sig>],
        bitset: &mut Bitset,
        global_min: usize,
    ) -> Result<S::Sig, AggregationError> {
        let mut combined: Option<S::Sig> = None;
        for s in sigs {
            let (min, _) = self.range_level(s.level as usize)?;
            let offset = min - global_min;
            for i in s.ms.bitset.iter_set() {
                assert!(
                    !bitset.get(offset + i),
                    "overlapping contributions while combining level {}",
                    s.level
                );
                bitset.set(offset + i, true);
            }
            combined = Some(match combined {
                None => s.ms.signature.clone(),
                Some(acc) => acc.combine(&s.ms.signature),
            });
        }
        Ok(combined.expect("fold_into requires at least one signature"))
    }
}

impl<S: Scheme> Partitioner<S> for BinomialPartitioner<S> {
    fn max_level(&self) -> usize {
        self.bitsize
    }

    fn size(&self, level: usize) -> Result<usize, AggregationError> {
        let (min, max) = self.range_level(level)?;
        Ok(max - min)
    }

    fn identities_at(&self, level: usize) -> Result<Vec<Identity<S::Public>>, AggregationError> {
        let (min, max) = self.range_level(level)?;
        self.reg
            .identities(min, max)
            .map(|ids| ids.to_vec())
            .ok_or(AggregationError::LevelEmpty(level))
    }

    fn pick_next_at(
        &self,
        level: usize,
        count: usize,
    ) -> Result<Vec<Identity<S::Public>>, AggregationError> {
        let (min, max) = self.range_level(level)?;
        if min == max {
            return Err(AggregationError::LevelEmpty(level));
        }
        let mut picked = self.picked.lock().unwrap();
        let min_picked = picked.get(&level).copied().unwrap_or(min);
        if min_picked >= max {
            return Err(AggregationError::LevelSaturated(level));
        }
        let up_to = (min_picked + count).min(max);
        let ids = self
            .reg
            .identities(min_picked, up_to)
            .map(|ids| ids.to_vec())
            .ok_or(AggregationError::LevelEmpty(level))?;
        picked.insert(level, up_to);
        Ok(ids)
    }

    fn combine(
        &self,
        sigs: &[LevelSig<S::Sig>],
        level: usize,
    ) -> Result<Option<LevelSig<S::Sig>>, AggregationError> {
        if sigs.is_empty() {
            return Ok(None);
        }
        for s in sigs {
            if s.level as usize > level {
                return Err(AggregationError::LevelOutOfRange {
                    level: s.level as usize,
                    max: level,
                });
            }
        }
        let (global_min, global_max) = self.range_level_inverse(level)?;
        let mut bitset = Bitset::new(global_max - global_min);
        let signature = self.fold_into(sigs, &mut bitset, global_min)?;
        Ok(Some(LevelSig {
            level: level as u8,
            ms: MultiSignature::new(bitset, signature),
        }))
    }

    fn combine_full(
        &self,
        sigs: &[LevelSig<S::Sig>],
    ) -> Result<Option<MultiSignature<S::Sig>>, AggregationError> {
        if sigs.is_empty() {
            return Ok(None);
        }
        let mut bitset = Bitset::new(self.size);
        let signature = self.fold_into(sigs, &mut bitset, 0)?;
        Ok(Some(MultiSignature::new(bitset, signature)))
    }
}

/// [`BinomialPartitioner`] with per-level randomised pick order.
///
/// Each level draws a seed at construction; `pick_next_at` walks a
/// deterministic permutation of the candidate set derived from that seed,
/// with the same cursor semantics as the balanced variant. Spreading the
/// contact order decorrelates which peers get hit first across the network.
pub struct RandomizedPartitioner<S: Scheme> {
    inner: BinomialPartitioner<S>,
    seeds: HashMap<usize, u64>,
    /// Cursor per level into the permutation (not into the registry).
    picked: Mutex<HashMap<usize, usize>>,
}

impl<S: Scheme> RandomizedPartitioner<S> {
    /// `seed` fixes the permutations for reproducible runs; `None` draws
    /// from the thread RNG.
    pub fn new(id: usize, reg: Arc<dyn Registry<S::Public>>, seed: Option<u64>) -> Self {
        let inner = BinomialPartitioner::new(id, reg);
        let mut rng = StdRng::seed_from_u64(seed.unwrap_or_else(|| rand::thread_rng().r#gen()));
        let seeds = (1..=inner.max_level())
            .map(|level| (level, rng.r#gen()))
            .collect();
        Self {
            inner,
            seeds,
            picked: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Scheme> Partitioner<S> for RandomizedPartitioner<S> {
    fn max_level(&self) -> usize {
        self.inner.max_level()
    }

    fn size(&self, level: usize) -> Result<usize, AggregationError> {
        self.inner.size(level)
    }

    fn identities_at(&self, level: usize) -> Result<Vec<Identity<S::Public>>, AggregationError> {
        self.inner.identities_at(level)
    }

    fn pick_next_at(
        &self,
        level: usize,
        count: usize,
    ) -> Result<Vec<Identity<S::Public>>, AggregationError> {
        let (min, max) = self.inner.range_level(level)?;
        let cardinality = max - min;
        if cardinality == 0 {
            return Err(AggregationError::LevelEmpty(level));
        }
        let seed = *self
            .seeds
            .get(&level)
            .expect("seed exists for every valid level");

        let mut picked = self.picked.lock().unwrap();
        let min_picked = picked.get(&level).copied().unwrap_or(0);
        if min_picked >= cardinality {
            return Err(AggregationError::LevelSaturated(level));
        }
        let up_to = (min_picked + count).min(cardinality);

        let mut perm: Vec<usize> = (0..cardinality).collect();
        perm.shuffle(&mut StdRng::seed_from_u64(seed));

        let ids = perm[min_picked..up_to]
            .iter()
            .filter_map(|&p| self.inner.reg.identity(min + p).cloned())
            .collect();
        picked.insert(level, up_to);
        Ok(ids)
    }

    fn combine(
        &self,
        sigs: &[LevelSig<S::Sig>],
        level: usize,
    ) -> Result<Option<LevelSig<S::Sig>>, AggregationError> {
        self.inner.combine(sigs, level)
    }

    fn combine_full(
        &self,
        sigs: &[LevelSig<S::Sig>],
    ) -> Result<Option<MultiSignature<S::Sig>>, AggregationError> {
        self.inner.combine_full(sigs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_helpers::{FakeScheme, FakeSig, fake_registry};

    fn partitioner(id: usize, n: usize) -> BinomialPartitioner<FakeScheme> {
        BinomialPartitioner::new(id, fake_registry(n))
    }

    #[test]
    fn candidate_sets_partition_the_registry() {
        let n = 16;
        for id in 0..n {
            let part = partitioner(id, n);
            assert_eq!(part.max_level(), 4);
            let mut seen = vec![false; n];
            seen[id] = true;
            for level in 1..=part.max_level() {
                let ids = part.identities_at(level).unwrap();
                assert_eq!(ids.len(), 1 << (level - 1), "id {id} level {level}");
                assert_eq!(ids.len(), part.size(level).unwrap());
                for identity in &ids {
                    let idx = identity.id() as usize;
                    assert!(!seen[idx], "id {idx} appears twice for node {id}");
                    seen[idx] = true;
                }
            }
            assert!(seen.iter().all(|&s| s), "node {id} missed part of [0,N)");
        }
    }

    #[test]
    fn level_zero_is_the_own_singleton() {
        let part = partitioner(5, 8);
        let ids = part.identities_at(0).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].id(), 5);
    }

    #[test]
    fn rejects_out_of_range_levels() {
        let part = partitioner(0, 8);
        assert!(part.size(4).is_err());
        assert!(part.identities_at(7).is_err());
    }

    #[test]
    fn pick_next_advances_and_saturates() {
        let part = partitioner(1, 8);
        // Level 3 holds the four ids 4..8.
        let first = part.pick_next_at(3, 3).unwrap();
        assert_eq!(first.iter().map(|i| i.id()).collect::<Vec<_>>(), [4, 5, 6]);
        let second = part.pick_next_at(3, 3).unwrap();
        assert_eq!(second.iter().map(|i| i.id()).collect::<Vec<_>>(), [7]);
        assert!(matches!(
            part.pick_next_at(3, 1),
            Err(AggregationError::LevelSaturated(3))
        ));
    }

    #[test]
    fn combine_places_levels_at_their_offsets() {
        let part = partitioner(1, 8);
        // Level 1 = {0}, level 2 = {2,3}; the inverse range of level 3 is [0,4).
        let sigs = vec![
            LevelSig {
                level: 1,
                ms: MultiSignature::individual(1, 0, FakeSig::valid()),
            },
            LevelSig {
                level: 2,
                ms: MultiSignature::individual(2, 1, FakeSig::valid()),
            },
        ];
        let combined = part.combine(&sigs, 3).unwrap().unwrap();
        assert_eq!(combined.level, 3);
        assert_eq!(combined.ms.bitset.bit_length(), 4);
        assert_eq!(combined.ms.bitset.iter_set().collect::<Vec<_>>(), [0, 3]);
    }

    #[test]
    fn combine_rejects_levels_above_target() {
        let part = partitioner(1, 8);
        let sigs = vec![LevelSig {
            level: 3,
            ms: MultiSignature::individual(4, 0, FakeSig::valid()),
        }];
        assert!(part.combine(&sigs, 2).is_err());
        assert!(part.combine(&[], 2).unwrap().is_none());
    }

    #[test]
    fn combine_full_spans_the_registry() {
        let part = partitioner(1, 8);
        let sigs = vec![
            LevelSig {
                level: 0,
                ms: MultiSignature::individual(1, 0, FakeSig::valid()),
            },
            LevelSig {
                level: 3,
                ms: MultiSignature::individual(4, 2, FakeSig::valid()),
            },
        ];
        let full = part.combine_full(&sigs).unwrap().unwrap();
        assert_eq!(full.bitset.bit_length(), 8);
        // Own id 1 at its registry slot, and local index 2 of level 3 ([4,8)) at 6.
        assert_eq!(full.bitset.iter_set().collect::<Vec<_>>(), [1, 6]);
    }

    #[test]
    fn randomized_is_deterministic_per_seed() {
        let reg = fake_registry(16);
        let a = RandomizedPartitioner::<FakeScheme>::new(3, reg.clone(), Some(99));
        let b = RandomizedPartitioner::<FakeScheme>::new(3, reg.clone(), Some(99));
        let got_a = a.pick_next_at(4, 8).unwrap();
        let got_b = b.pick_next_at(4, 8).unwrap();
        assert_eq!(
            got_a.iter().map(|i| i.id()).collect::<Vec<_>>(),
            got_b.iter().map(|i| i.id()).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn randomized_covers_the_candidate_set() {
        let reg = fake_registry(16);
        let part = RandomizedPartitioner::<FakeScheme>::new(3, reg, Some(7));
        let mut got: Vec<_> = part
            .pick_next_at(4, 16)
            .unwrap()
            .iter()
            .map(|i| i.id())
            .collect();
        got.sort_unstable();
        assert_eq!(got, (8..16).collect::<Vec<_>>());
        assert!(matches!(
            part.pick_next_at(4, 1),
            Err(AggregationError::LevelSaturated(4))
        ));
    }
}
