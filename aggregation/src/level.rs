//! Per-level send state.
//!
//! A level tracks whether it has started (by timeout or by completing
//! early), the best aggregate size seen for it, and how many of its
//! candidates have been contacted. The orchestrator drives these through
//! the periodic tick and the verified-signature handlers.

use crypto::Scheme;

use crate::identity::Identity;
use crate::multisig::MultiSignature;
use crate::partitioner::Partitioner;

/// Send state for one level of the binomial tree.
pub struct Level<S: Scheme> {
    /// Level id, starting at 1. Level 0 is the node itself and has no state.
    pub id: usize,
    nodes: Vec<Identity<S::Public>>,
    /// Whether the periodic update may transmit for this level.
    pub started: bool,
    /// Whether the level's own candidate set is fully aggregated.
    pub completed: bool,
    /// Whether every candidate has been contacted since the last
    /// improvement.
    pub finished: bool,
    pos: usize,
    sent: usize,
    current_best_size: usize,
}

impl<S: Scheme> Level<S> {
    pub fn new(id: usize, nodes: Vec<Identity<S::Public>>) -> Self {
        assert!(id >= 1, "level ids start at 1");
        // The first level needs nothing beyond the own signature, so it is
        // ready from the start.
        let first = id == 1;
        Self {
            id,
            nodes,
            started: first,
            completed: first,
            finished: false,
            pos: 0,
            sent: 0,
            current_best_size: 0,
        }
    }

    /// Number of candidates at this level.
    pub fn candidate_count(&self) -> usize {
        self.nodes.len()
    }

    /// The next `count` candidates, rotating through the set. Marks the
    /// level finished once every candidate has been contacted.
    pub fn pick_next(&mut self, count: usize) -> Vec<Identity<S::Public>> {
        let take = count.min(self.nodes.len());
        let mut picked = Vec::with_capacity(take);
        for _ in 0..take {
            picked.push(self.nodes[self.pos].clone());
            self.pos = (self.pos + 1) % self.nodes.len();
        }
        self.sent += take;
        if self.sent >= self.nodes.len() {
            self.finished = true;
        }
        picked
    }

    /// Record a new best aggregate for this level.
    ///
    /// An improvement reopens sending: the sent counter and the finished
    /// flag reset so the better aggregate reaches peers that already got the
    /// old one. Returns whether this update completed the level, which
    /// triggers an immediate fan-out burst. A full signature from an upper
    /// level can exceed the candidate count, hence the >= comparisons.
    pub fn update_best(&mut self, ms: &MultiSignature<S::Sig>) -> bool {
        if self.completed || self.current_best_size >= ms.cardinality() {
            return false;
        }
        self.current_best_size = ms.cardinality();
        self.finished = false;
        self.sent = 0;

        if self.current_best_size >= self.nodes.len() {
            // Completing a level starts it immediately instead of waiting
            // for its timeout.
            self.started = true;
            self.completed = true;
            return true;
        }
        false
    }
}

/// Build the level table for one node from its partitioner.
pub fn create_levels<S: Scheme>(part: &dyn Partitioner<S>) -> Vec<Level<S>> {
    (1..=part.max_level())
        .map(|id| {
            // Draining the partitioner's cursor here keeps the randomised
            // variant's permutation as the level's contact order.
            let count = part.size(id).unwrap_or(0);
            let nodes = part.pick_next_at(id, count).unwrap_or_default();
            Level::new(id, nodes)
        })
        .collect()
}
