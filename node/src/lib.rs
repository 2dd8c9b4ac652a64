//! Node assembly for the aggregation protocol: configuration loading, the
//! UDP datagram transport, and the glue turning a config file into a
//! running aggregator.

pub mod config;
pub mod network;
pub mod node;

pub use config::{NetworkConfig, NodeConfig};
pub use network::UdpNetwork;
pub use node::AggregatorNode;
