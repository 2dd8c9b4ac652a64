//! Protocol configuration knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::partitioner::log2;

/// How candidate sets are ordered when picking peers to contact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionerStrategy {
    /// Registry order.
    #[default]
    Balanced,
    /// Per-level seeded permutation of the candidate set.
    Randomized,
}

/// Which verification pipeline to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Verify the highest-scoring pending aggregate first.
    #[default]
    Priority,
    /// Verify everything in arrival order; baseline for comparisons.
    Fifo,
}

/// Tuning knobs of one aggregation instance.
///
/// # Example TOML
///
/// ```toml
/// candidate_count = 4
/// update_period = { secs = 0, nanos = 50000000 }
/// level_timeout = { secs = 0, nanos = 50000000 }
/// contribution_threshold = 11
/// partitioner = "balanced"
/// processing = "priority"
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of peers contacted per send burst.
    pub candidate_count: usize,

    /// Interval of the periodic update tick.
    #[serde(default = "default_update_period")]
    pub update_period: Duration,

    /// Unit of wait before force-starting a level: level l starts after
    /// l * level_timeout.
    #[serde(default = "default_level_timeout")]
    pub level_timeout: Duration,

    /// Contribution count at which the full signature is emitted.
    pub contribution_threshold: usize,

    /// Candidate ordering strategy.
    #[serde(default)]
    pub partitioner: PartitionerStrategy,

    /// Verification pipeline.
    #[serde(default)]
    pub processing: ProcessingMode,
}

fn default_update_period() -> Duration {
    Duration::from_millis(50)
}

fn default_level_timeout() -> Duration {
    Duration::from_millis(50)
}

impl Config {
    /// Defaults for a registry of `n` participants: one burst per candidate
    /// set depth, 50ms tick and level timeout, two-thirds threshold.
    pub fn default_for(n: usize) -> Self {
        Self {
            candidate_count: log2(n).max(1),
            update_period: default_update_period(),
            level_timeout: default_level_timeout(),
            contribution_threshold: (2 * n).div_ceil(3),
            partitioner: PartitionerStrategy::default(),
            processing: ProcessingMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scale_with_registry_size() {
        let cfg = Config::default_for(1024);
        assert_eq!(cfg.candidate_count, 10);
        assert_eq!(cfg.contribution_threshold, 683);
        assert_eq!(cfg.update_period, Duration::from_millis(50));
    }

    #[test]
    fn threshold_rounds_up() {
        assert_eq!(Config::default_for(8).contribution_threshold, 6);
        assert_eq!(Config::default_for(9).contribution_threshold, 6);
        assert_eq!(Config::default_for(10).contribution_threshold, 7);
    }
}
