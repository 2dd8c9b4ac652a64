//! Aggregation node binary.
//!
//! Two modes: run a single node from a TOML config file, or spin up an
//! in-process localhost cluster and report the time to a full aggregate.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use node::config::{NetworkConfig, NodeConfig};
use node::node::AggregatorNode;
use slog::{Drain, Level, Logger, info, o};

#[derive(Parser, Debug)]
#[command(name = "agg-node", about = "Multi-signature aggregation node")]
struct Args {
    /// Path to a node configuration file.
    #[arg(long, conflicts_with = "cluster")]
    config: Option<PathBuf>,

    /// Run an in-process cluster of this many nodes on localhost.
    #[arg(long)]
    cluster: Option<usize>,

    /// First UDP port of the localhost cluster.
    #[arg(long, default_value_t = 9800)]
    base_port: u16,

    /// Message to aggregate a signature over.
    #[arg(long, default_value = "aggregate")]
    message: String,

    /// Seconds to wait for the contribution threshold.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn create_logger() -> Logger {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| Level::from_str(&value).ok())
        .unwrap_or(Level::Info);
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .build()
        .fuse()
        .filter_level(level)
        .fuse();
    Logger::root(drain, o!())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logger = create_logger();
    let timeout = Duration::from_secs(args.timeout);

    match (&args.config, args.cluster) {
        (Some(path), None) => run_single(path, timeout, &logger),
        (None, Some(n)) => run_cluster(n, &args, timeout, &logger),
        _ => bail!("pass either --config <file> or --cluster <n>"),
    }
}

fn run_single(path: &PathBuf, timeout: Duration, logger: &Logger) -> Result<()> {
    let cfg = NodeConfig::from_path(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    let node = AggregatorNode::from_config(&cfg, logger.clone())?;
    node.start();

    match node.wait_final(timeout) {
        Some(ms) => info!(logger, "aggregation finished";
            "contributions" => ms.cardinality(),
            "participants" => ms.bitset.bit_length(),
        ),
        None => info!(logger, "threshold not reached before the timeout"),
    }
    node.shutdown();
    Ok(())
}

fn run_cluster(n: usize, args: &Args, timeout: Duration, logger: &Logger) -> Result<()> {
    if n < 2 {
        bail!("a cluster needs at least two nodes");
    }
    let peers: Vec<_> = (0..n)
        .map(|i| {
            format!("127.0.0.1:{}", args.base_port + i as u16)
                .parse()
                .expect("localhost addresses parse")
        })
        .collect();

    info!(logger, "starting localhost cluster"; "nodes" => n);
    let started = Instant::now();
    let nodes: Vec<_> = (0..n)
        .map(|i| {
            let cfg = NodeConfig {
                index: i as i32,
                message: args.message.clone(),
                key_seed: 0,
                network: NetworkConfig {
                    listen_addr: peers[i],
                    peers: peers.clone(),
                },
                protocol: None,
            };
            AggregatorNode::from_config(&cfg, logger.clone())
                .with_context(|| format!("building node {i}"))
        })
        .collect::<Result<_>>()?;

    for node in &nodes {
        node.start();
    }

    match nodes[0].wait_final(timeout) {
        Some(ms) => info!(logger, "cluster aggregation finished";
            "contributions" => ms.cardinality(),
            "participants" => n,
            "elapsed_ms" => started.elapsed().as_millis() as u64,
        ),
        None => info!(logger, "cluster did not reach the threshold";
            "waited_ms" => timeout.as_millis() as u64,
        ),
    }

    for node in &nodes {
        node.shutdown();
    }
    Ok(())
}
