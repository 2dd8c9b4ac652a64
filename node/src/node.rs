//! Assembly of one running aggregation node.
//!
//! Derives the registry from the configuration, binds the transport, signs
//! the message, and hands everything to the protocol core.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aggregation::{
    Aggregator, ArrayRegistry, Identity, MultiSignature, Network, NodeId, Registry,
};
use anyhow::{Context, Result, ensure};
use crypto::{Bls12381, BlsSecretKey, BlsSignature, SecretKey};
use slog::{Logger, info};

use crate::config::NodeConfig;
use crate::network::UdpNetwork;

/// One aggregation participant: transport plus protocol instance.
pub struct AggregatorNode {
    aggregator: Arc<Aggregator<Bls12381>>,
    network: Arc<UdpNetwork>,
    participants: usize,
    logger: Logger,
}

impl AggregatorNode {
    /// Build a node from its configuration.
    ///
    /// All participants derive their keys from the shared seed, so the full
    /// registry of public keys is reconstructed locally.
    pub fn from_config(cfg: &NodeConfig, logger: Logger) -> Result<Self> {
        let n = cfg.network.peers.len();
        ensure!(n >= 2, "a cluster needs at least two participants");
        ensure!(
            cfg.index >= 0 && (cfg.index as usize) < n,
            "node index {} outside the {n} configured peers",
            cfg.index
        );

        let keys: Vec<BlsSecretKey> = (0..n as u64)
            .map(|i| BlsSecretKey::from_seed(cfg.key_seed.wrapping_add(i)))
            .collect();
        let identities = cfg
            .network
            .peers
            .iter()
            .enumerate()
            .map(|(i, addr)| Identity::new(i as NodeId, addr.to_string(), keys[i].public_key()))
            .collect();
        let registry = Arc::new(ArrayRegistry::new(identities)?);

        let network = UdpNetwork::bind(cfg.network.listen_addr, logger.clone())?;
        let message = cfg.message.clone().into_bytes();
        let signature = keys[cfg.index as usize]
            .sign(&message)
            .context("signing the aggregation message")?;
        let own = registry
            .identity(cfg.index as usize)
            .cloned()
            .context("own identity missing from the registry")?;

        let aggregator = Aggregator::new(
            Arc::clone(&network) as Arc<dyn Network<Bls12381>>,
            registry,
            own,
            message,
            signature,
            cfg.protocol_config(),
            logger.clone(),
        );

        Ok(Self {
            aggregator,
            network,
            participants: n,
            logger,
        })
    }

    /// Start aggregating.
    pub fn start(&self) {
        self.aggregator.start();
    }

    /// Wait up to `timeout` for final signatures, returning the best one
    /// observed. Returns early once the aggregate covers every participant.
    pub fn wait_final(&self, timeout: Duration) -> Option<MultiSignature<BlsSignature>> {
        let out = self.aggregator.final_signatures();
        let deadline = Instant::now() + timeout;
        let mut best: Option<MultiSignature<BlsSignature>> = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return best;
            }
            match out.recv_timeout(remaining) {
                Ok(ms) => {
                    let complete = ms.cardinality() == self.participants;
                    best = Some(ms);
                    if complete {
                        return best;
                    }
                }
                Err(_) => return best,
            }
        }
    }

    /// Stop the protocol and the transport, logging processing counters.
    pub fn shutdown(&self) {
        self.aggregator.stop();
        self.network.shutdown();
        let stats = self.aggregator.processing_stats();
        info!(self.logger, "node shut down";
            "sigs_checked" => stats.checked,
            "sigs_suppressed" => stats.suppressed,
            "avg_queue_size" => stats.avg_queue_size,
        );
    }
}
