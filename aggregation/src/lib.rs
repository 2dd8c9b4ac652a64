//! Large-scale Byzantine-fault-tolerant multi-signature aggregation.
//!
//! A set of N participants, each holding one share of an aggregatable
//! signature scheme, collectively produces a single signature over a common
//! message together with a bitset naming exactly who contributed. The
//! protocol scales to thousands of participants by organising communication
//! into log2(N) levels of a binomial tree and by verifying only the most
//! valuable incoming aggregates.
//!
//! The crate is transport- and scheme-agnostic: it consumes a
//! [`Network`](network::Network), a [`Registry`](identity::Registry) and a
//! [`Scheme`](crypto::Scheme) and never opens sockets or touches curve
//! arithmetic itself.

pub mod aggregator;
pub mod bitset;
pub mod config;
pub mod error;
pub mod identity;
pub mod level;
pub mod metrics;
pub mod multisig;
pub mod network;
pub mod partitioner;
pub mod processing;
pub mod store;
pub mod wire;

#[cfg(test)]
mod tests;

pub use aggregator::Aggregator;
pub use bitset::Bitset;
pub use config::{Config, PartitionerStrategy, ProcessingMode};
pub use error::AggregationError;
pub use identity::{ArrayRegistry, Identity, NodeId, Registry};
pub use multisig::{IncomingSig, LevelSig, MultiSignature};
pub use network::{Network, PacketListener};
pub use partitioner::{BinomialPartitioner, Partitioner, RandomizedPartitioner};
pub use wire::Packet;
