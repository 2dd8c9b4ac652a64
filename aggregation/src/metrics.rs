//! Aggregation metrics for Prometheus-style monitoring.
//!
//! Non-generic struct holding pre-registered metric handles from the
//! `metrics` crate. Works without an installed recorder (no-op fallback),
//! so tests need no setup.

use metrics::{Counter, Gauge, Histogram, counter, gauge, histogram};

/// All aggregation-related metric handles.
///
/// Constructed once per node and cloned into the processing worker and the
/// orchestrator.
#[derive(Clone)]
pub struct AggregationMetrics {
    // -- Ingress --
    pub packets_received_total: Counter,
    pub packets_dropped_total: Counter,

    // -- Signature processing --
    pub sigs_checked_total: Counter,
    pub sigs_suppressed_total: Counter,
    pub sigs_verified_total: Counter,
    pub sigs_invalid_total: Counter,
    pub pending_queue_size: Gauge,
    pub verification_duration_seconds: Histogram,

    // -- Store / progress --
    pub highest_level: Gauge,
    pub full_cardinality: Gauge,
    pub final_emissions_total: Counter,

    // -- Outbound --
    pub packets_sent_total: Counter,
}

impl AggregationMetrics {
    pub fn new() -> Self {
        Self {
            packets_received_total: counter!("aggregation.packets_received_total"),
            packets_dropped_total: counter!("aggregation.packets_dropped_total"),

            sigs_checked_total: counter!("aggregation.sigs_checked_total"),
            sigs_suppressed_total: counter!("aggregation.sigs_suppressed_total"),
            sigs_verified_total: counter!("aggregation.sigs_verified_total"),
            sigs_invalid_total: counter!("aggregation.sigs_invalid_total"),
            pending_queue_size: gauge!("aggregation.pending_queue_size"),
            verification_duration_seconds: histogram!("aggregation.verification_duration_seconds"),

            highest_level: gauge!("aggregation.highest_level"),
            full_cardinality: gauge!("aggregation.full_cardinality"),
            final_emissions_total: counter!("aggregation.final_emissions_total"),

            packets_sent_total: counter!("aggregation.packets_sent_total"),
        }
    }
}

impl Default for AggregationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
