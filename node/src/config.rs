//! Node configuration types.
//!
//! A node config names this node's index, the addresses of every
//! participant, and optionally overrides the protocol knobs. Loaded from a
//! TOML file merged with `AGG_NODE_`-prefixed environment variables.

use std::net::SocketAddr;
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

/// Transport configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local address to bind the UDP socket to.
    pub listen_addr: SocketAddr,

    /// Addresses of all participants, indexed by node id. Includes this
    /// node's own external address.
    pub peers: Vec<SocketAddr>,
}

/// Complete configuration of one aggregation node.
///
/// # Example TOML
///
/// ```toml
/// index = 2
/// message = "epoch 81 checkpoint"
/// key_seed = 7
///
/// [network]
/// listen_addr = "0.0.0.0:9802"
/// peers = ["10.0.0.1:9800", "10.0.0.2:9801", "10.0.0.3:9802", "10.0.0.4:9803"]
///
/// [protocol]
/// candidate_count = 2
/// contribution_threshold = 3
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Index of this node in the registry.
    pub index: i32,

    /// Message every participant signs.
    #[serde(default = "default_message")]
    pub message: String,

    /// Shared seed all participants derive their keys from. Local-cluster
    /// convenience: it lets every node reconstruct the full registry of
    /// public keys without a distribution step.
    #[serde(default)]
    pub key_seed: u64,

    /// Transport configuration.
    pub network: NetworkConfig,

    /// Protocol knobs. Defaults derive from the peer count when omitted.
    #[serde(default)]
    pub protocol: Option<aggregation::Config>,
}

fn default_message() -> String {
    "aggregate".to_string()
}

impl NodeConfig {
    /// Load configuration from a TOML file, then merge `AGG_NODE_`-prefixed
    /// environment variables on top.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("AGG_NODE_").split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// The effective protocol config for this node.
    pub fn protocol_config(&self) -> aggregation::Config {
        self.protocol
            .clone()
            .unwrap_or_else(|| aggregation::Config::default_for(self.network.peers.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_a_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            file,
            r#"
index = 1
message = "checkpoint"

[network]
listen_addr = "127.0.0.1:9801"
peers = ["127.0.0.1:9800", "127.0.0.1:9801"]

[protocol]
candidate_count = 1
contribution_threshold = 2
"#
        )
        .unwrap();

        let cfg = NodeConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg.index, 1);
        assert_eq!(cfg.message, "checkpoint");
        assert_eq!(cfg.network.peers.len(), 2);
        assert_eq!(cfg.protocol_config().contribution_threshold, 2);
    }

    #[test]
    fn protocol_defaults_derive_from_peer_count() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            file,
            r#"
index = 0

[network]
listen_addr = "127.0.0.1:9800"
peers = ["127.0.0.1:9800", "127.0.0.1:9801", "127.0.0.1:9802", "127.0.0.1:9803",
         "127.0.0.1:9804", "127.0.0.1:9805", "127.0.0.1:9806", "127.0.0.1:9807"]
"#
        )
        .unwrap();

        let cfg = NodeConfig::from_path(file.path()).unwrap();
        let protocol = cfg.protocol_config();
        assert_eq!(protocol.candidate_count, 3);
        assert_eq!(protocol.contribution_threshold, 6);
        assert_eq!(cfg.message, "aggregate");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(NodeConfig::from_path("/nonexistent/agg.toml").is_err());
    }
}
