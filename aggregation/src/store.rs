//! Signature store: per-level best aggregates and verified individual
//! contributions.
//!
//! The store merges newly verified multi-signatures with the best one held
//! so far at each level. Individual (cardinality-1) contributions are
//! indexed separately so that replacing an aggregate never loses a
//! previously verified singleton. It also scores unverified candidates,
//! which is what lets signature processing verify the most valuable
//! aggregate first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crypto::{Scheme, Signature};

use crate::bitset::Bitset;
use crate::multisig::{IncomingSig, LevelSig, MultiSignature};
use crate::partitioner::Partitioner;

/// Score for a candidate that would complete its level outright. Low levels
/// win ties because they unblock wider combines.
const SCORE_COMPLETE: usize = 1_000_000;

/// Base score for a candidate that adds contributions without completing
/// the level.
const SCORE_ADDING: usize = 30_000;

/// The store shared between the orchestrator, the evaluator, and anyone
/// reading bests. One mutex guards all operations.
pub type SharedStore<S> = Arc<Mutex<ReplaceStore<S>>>;

/// Verified individual contributions at one level.
struct Individuals<Sig: Signature> {
    /// Which candidate-set-local indices have a verified singleton.
    mask: Bitset,
    /// The singleton multi-signature for each set bit of `mask`.
    sigs: HashMap<usize, MultiSignature<Sig>>,
}

impl<Sig: Signature> Individuals<Sig> {
    fn new(size: usize) -> Self {
        Self {
            mask: Bitset::new(size),
            sigs: HashMap::new(),
        }
    }
}

/// Store keeping, per level, the best multi-signature seen so far, replacing
/// or merging as better ones arrive.
pub struct ReplaceStore<S: Scheme> {
    part: Arc<dyn Partitioner<S>>,
    best: HashMap<u8, MultiSignature<S::Sig>>,
    individuals: HashMap<u8, Individuals<S::Sig>>,
    highest: u8,
}

impl<S: Scheme> ReplaceStore<S> {
    pub fn new(part: Arc<dyn Partitioner<S>>) -> Self {
        Self {
            part,
            best: HashMap::new(),
            individuals: HashMap::new(),
            highest: 0,
        }
    }

    fn level_size(&self, level: u8) -> usize {
        self.part
            .size(level as usize)
            .expect("stored signatures are validated against level bounds at ingress")
    }

    /// Integrate a verified multi-signature at `level`.
    ///
    /// Returns the resulting best for the level and whether the call changed
    /// it. Disjoint aggregates merge; overlapping ones replace the best only
    /// when strictly larger. Either way, verified individuals missing from
    /// the outcome are folded back in.
    pub fn store(
        &mut self,
        level: u8,
        ms: MultiSignature<S::Sig>,
    ) -> (MultiSignature<S::Sig>, bool) {
        let size = self.level_size(level);
        assert_eq!(
            ms.bitset.bit_length(),
            size,
            "multi-signature bitset does not match candidate set at level {level}"
        );

        if ms.is_individual() {
            let index = ms
                .bitset
                .next_set_bit(0)
                .expect("individual has exactly one set bit");
            let ind = self
                .individuals
                .entry(level)
                .or_insert_with(|| Individuals::new(size));
            ind.mask.set(index, true);
            ind.sigs.insert(index, ms.clone());
        }

        let merged = match self.best.get(&level) {
            None => Some(ms),
            Some(best) => {
                let union = ms
                    .bitset
                    .union(&best.bitset)
                    .expect("bests at one level share a bit length");
                if union.cardinality() == ms.cardinality() + best.cardinality() {
                    // Disjoint: the combination is strictly better than both.
                    let signature = ms.signature.combine(&best.signature);
                    Some(MultiSignature::new(union, signature))
                } else if ms.cardinality() > best.cardinality() {
                    Some(ms)
                } else {
                    None
                }
            }
        };

        let Some(mut new_best) = merged else {
            let best = self.best[&level].clone();
            return (best, false);
        };

        // Fold verified singletons the new best is missing, so replacements
        // never lose them. The signature is combined before the bit flips:
        // the bitset must at all times describe the aggregate exactly.
        if let Some(ind) = self.individuals.get(&level) {
            for index in ind.mask.iter_set() {
                if !new_best.bitset.get(index) {
                    let singleton = &ind.sigs[&index];
                    new_best.signature = new_best.signature.combine(&singleton.signature);
                    new_best.bitset.set(index, true);
                }
            }
        }

        self.best.insert(level, new_best.clone());
        if level > self.highest {
            self.highest = level;
        }
        (new_best, true)
    }

    /// The best multi-signature at `level`, if any.
    pub fn best(&self, level: u8) -> Option<&MultiSignature<S::Sig>> {
        self.best.get(&level)
    }

    /// Highest level a signature has been stored at.
    pub fn highest(&self) -> u8 {
        self.highest
    }

    /// The per-level bests of levels `0..=level` merged into one
    /// multi-signature, laid out the way peers one level up expect it.
    pub fn combined(&self, level: u8) -> Option<MultiSignature<S::Sig>> {
        let max_level = self.part.max_level();
        let up_to = (level as usize + 1).min(max_level);
        let sigs = self.collect_bests(level);
        self.part
            .combine(&sigs, up_to)
            .expect("per-level bests always combine")
            .map(|ls| ls.ms)
    }

    /// All per-level bests merged into a multi-signature over the full
    /// registry.
    pub fn full_signature(&self) -> Option<MultiSignature<S::Sig>> {
        let sigs = self.collect_bests(self.part.max_level() as u8);
        self.part
            .combine_full(&sigs)
            .expect("per-level bests always combine")
    }

    fn collect_bests(&self, up_to: u8) -> Vec<LevelSig<S::Sig>> {
        (0..=up_to)
            .filter_map(|level| {
                self.best.get(&level).map(|ms| LevelSig {
                    level,
                    ms: ms.clone(),
                })
            })
            .collect()
    }

    /// Priority of verifying `incoming`, 0 meaning it can be dropped.
    ///
    /// The constants only enforce the total order: completing a level
    /// outranks adding contributions, which outranks keeping an individual
    /// around for recovery after a replacement.
    pub fn evaluate(&self, incoming: &IncomingSig<S::Sig>) -> usize {
        let level = incoming.level;
        let size = self.level_size(level);
        let best = self.best.get(&level);

        if let Some(best) = best {
            if best.cardinality() == size {
                return 0;
            }
        }

        let individuals = self.individuals.get(&level).map(|ind| &ind.mask);
        if incoming.is_individual() {
            let index = incoming
                .ms
                .bitset
                .next_set_bit(0)
                .expect("individual has exactly one set bit");
            if individuals.is_some_and(|mask| mask.get(index)) {
                return 0;
            }
        } else if best.is_some_and(|b| b.bitset.is_superset_of(&incoming.ms.bitset)) {
            return 0;
        }

        let with_individuals = match individuals {
            Some(mask) => incoming
                .ms
                .bitset
                .union(mask)
                .expect("individual mask matches candidate set size"),
            None => incoming.ms.bitset.clone(),
        };
        let total = with_individuals.cardinality() as isize;

        let (added, existing) = match best {
            None => (total, 0),
            Some(best) => {
                let overlap = incoming
                    .ms
                    .bitset
                    .intersection(&best.bitset)
                    .expect("bests at one level share a bit length")
                    .cardinality();
                if overlap > 0 {
                    // Would replace rather than merge.
                    (total - best.cardinality() as isize, 0)
                } else {
                    (total, best.cardinality() as isize)
                }
            }
        };

        if added <= 0 {
            // Individuals are kept around: they repair bests after a
            // replacement drops a contributor.
            return if incoming.is_individual() { 1 } else { 0 };
        }
        if (added + existing) as usize == size {
            return SCORE_COMPLETE - level as usize;
        }
        SCORE_ADDING - level as usize * 100 + added as usize
    }
}
