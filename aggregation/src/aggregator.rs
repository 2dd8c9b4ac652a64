//! The aggregation orchestrator.
//!
//! One [`Aggregator`] runs the protocol for one node: it seeds the store
//! with the node's own signature, ingests packets from the network, feeds
//! them through signature processing, applies verified aggregates to the
//! store, drives per-level timeouts and transmissions, and emits final
//! signatures once the contribution threshold is reached.
//!
//! Three threads cooperate: the transport's ingress callback, the
//! processing worker, and the periodic ticker; a fourth consumes verified
//! signatures. Level state is guarded by the orchestrator lock, the store
//! by its own; the orchestrator lock is always taken first when both are
//! held.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use crypto::Scheme;
use slog::{Logger, debug, info, o, warn};

use crate::config::{Config, PartitionerStrategy, ProcessingMode};
use crate::error::AggregationError;
use crate::identity::{Identity, Registry};
use crate::level::{Level, create_levels};
use crate::metrics::AggregationMetrics;
use crate::multisig::{IncomingSig, MultiSignature};
use crate::network::{Network, PacketListener};
use crate::partitioner::{BinomialPartitioner, Partitioner, RandomizedPartitioner};
use crate::processing::{
    FifoProcessing, PriorityProcessing, SignatureProcessing, StatsSnapshot, StoreEvaluator,
};
use crate::store::{ReplaceStore, SharedStore};
use crate::wire::Packet;

/// Capacity of the final-signature output channel.
const FINAL_CHANNEL_CAP: usize = 1000;

/// State guarded by the orchestrator lock: level progression, the best
/// final signature emitted so far, and lifecycle flags.
struct Inner<S: Scheme> {
    levels: Vec<Level<S>>,
    best: Option<MultiSignature<S::Sig>>,
    started: bool,
    done: bool,
    start_time: Instant,
    out_tx: Option<Sender<MultiSignature<S::Sig>>>,
    tick_shutdown: Option<Sender<()>>,
}

/// Orchestrator for one node's participation in the aggregation.
pub struct Aggregator<S: Scheme> {
    cfg: Config,
    net: Arc<dyn Network<S>>,
    reg: Arc<dyn Registry<S::Public>>,
    part: Arc<dyn Partitioner<S>>,
    own: Identity<S::Public>,
    store: SharedStore<S>,
    processing: Mutex<Box<dyn SignatureProcessing<S>>>,
    inner: Mutex<Inner<S>>,
    out_rx: Receiver<MultiSignature<S::Sig>>,
    metrics: AggregationMetrics,
    logger: Logger,
}

impl<S: Scheme> Aggregator<S> {
    /// Build an aggregator for `own`, signing `message` with the caller's
    /// already-produced `signature`, and register it as the network's
    /// packet listener.
    pub fn new(
        net: Arc<dyn Network<S>>,
        reg: Arc<dyn Registry<S::Public>>,
        own: Identity<S::Public>,
        message: Vec<u8>,
        signature: S::Sig,
        cfg: Config,
        logger: Logger,
    ) -> Arc<Self> {
        let logger = logger.new(o!("node" => own.id()));
        let part: Arc<dyn Partitioner<S>> = match cfg.partitioner {
            PartitionerStrategy::Balanced => {
                Arc::new(BinomialPartitioner::new(own.id() as usize, Arc::clone(&reg)))
            }
            PartitionerStrategy::Randomized => Arc::new(RandomizedPartitioner::new(
                own.id() as usize,
                Arc::clone(&reg),
                None,
            )),
        };
        let metrics = AggregationMetrics::new();

        let store: SharedStore<S> = Arc::new(Mutex::new(ReplaceStore::new(Arc::clone(&part))));
        store
            .lock()
            .unwrap()
            .store(0, MultiSignature::individual(1, 0, signature));

        let processing: Box<dyn SignatureProcessing<S>> = match cfg.processing {
            ProcessingMode::Priority => Box::new(PriorityProcessing::new(
                Arc::clone(&part),
                Arc::new(StoreEvaluator::new(Arc::clone(&store))),
                message.clone(),
                metrics.clone(),
                logger.clone(),
            )),
            ProcessingMode::Fifo => Box::new(FifoProcessing::new(
                Arc::clone(&store),
                Arc::clone(&part),
                message.clone(),
                metrics.clone(),
                logger.clone(),
            )),
        };

        let levels = create_levels(&*part);
        let (out_tx, out_rx) = bounded(FINAL_CHANNEL_CAP);

        let aggregator = Arc::new(Self {
            cfg,
            net: Arc::clone(&net),
            reg,
            part,
            own,
            store,
            processing: Mutex::new(processing),
            inner: Mutex::new(Inner {
                levels,
                best: None,
                started: false,
                done: false,
                start_time: Instant::now(),
                out_tx: Some(out_tx),
                tick_shutdown: None,
            }),
            out_rx,
            metrics,
            logger,
        });
        net.register_listener(aggregator.clone() as Arc<dyn PacketListener>);
        aggregator
    }

    /// Start the protocol: spawn the processing worker, the
    /// verified-signature consumer, and the periodic ticker, then push the
    /// first update toward level 1.
    pub fn start(self: &Arc<Self>) {
        let (tick_tx, tick_rx) = bounded(0);
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.started || inner.done {
                return;
            }
            inner.started = true;
            inner.start_time = Instant::now();
            inner.tick_shutdown = Some(tick_tx);
        }
        info!(self.logger, "starting aggregation";
            "participants" => self.reg.size(),
            "levels" => self.part.max_level(),
            "threshold" => self.cfg.contribution_threshold,
        );

        self.processing.lock().unwrap().start();

        let consumer = Arc::clone(self);
        thread::Builder::new()
            .name("agg-verified".into())
            .spawn(move || consumer.consume_verified())
            .expect("spawning the verified-signature consumer");

        let ticker = Arc::clone(self);
        thread::Builder::new()
            .name("agg-ticker".into())
            .spawn(move || ticker.run_ticker(tick_rx))
            .expect("spawning the update ticker");

        self.periodic_update();
    }

    /// Stop everything. Idempotent; the final-signature channel closes once
    /// pending emissions are drained.
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.done {
                return;
            }
            inner.done = true;
            inner.tick_shutdown.take();
            inner.out_tx.take();
        }
        self.processing.lock().unwrap().stop();
        let stats = self.processing.lock().unwrap().stats();
        info!(self.logger, "aggregation stopped";
            "sigs_checked" => stats.checked,
            "sigs_suppressed" => stats.suppressed,
        );
    }

    /// Channel carrying final multi-signatures: each emission meets the
    /// contribution threshold and is strictly larger than the previous one.
    pub fn final_signatures(&self) -> Receiver<MultiSignature<S::Sig>> {
        self.out_rx.clone()
    }

    /// Counters from the verification pipeline.
    pub fn processing_stats(&self) -> StatsSnapshot {
        self.processing.lock().unwrap().stats()
    }

    fn run_ticker(self: Arc<Self>, shutdown: Receiver<()>) {
        loop {
            match shutdown.recv_timeout(self.cfg.update_period) {
                Err(RecvTimeoutError::Timeout) => self.periodic_update(),
                _ => return,
            }
        }
    }

    /// One tick: start levels whose timeout has elapsed and push the
    /// current combined aggregate one peer further on every started level.
    fn periodic_update(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.done {
            return;
        }
        let elapsed = inner.start_time.elapsed();
        for lvl in inner.levels.iter_mut() {
            if !lvl.started && elapsed >= self.cfg.level_timeout * lvl.id as u32 {
                debug!(self.logger, "level started by timeout"; "level" => lvl.id);
                lvl.started = true;
            }
            self.send_update(lvl, 1);
        }
    }

    /// Send the combined signature of everything below `lvl` to its next
    /// `count` candidates.
    fn send_update(&self, lvl: &mut Level<S>, count: usize) {
        if !lvl.started || lvl.finished {
            return;
        }
        let combined = self
            .store
            .lock()
            .unwrap()
            .combined(lvl.id as u8 - 1)
            .expect("the store is seeded with the own signature at level 0");
        let nodes = lvl.pick_next(count);
        if nodes.is_empty() {
            return;
        }
        debug!(self.logger, "sending level update";
            "level" => lvl.id,
            "cardinality" => combined.cardinality(),
            "peers" => nodes.len(),
        );
        let packet = Packet {
            origin: self.own.id(),
            level: lvl.id as u8,
            multi_sig: combined.marshal(),
        };
        self.net.send(&nodes, &packet);
        self.metrics.packets_sent_total.increment(nodes.len() as u64);
    }

    /// Consume verified signatures until processing shuts down, applying
    /// each to the store and running the level/final handlers under the
    /// orchestrator lock.
    fn consume_verified(self: Arc<Self>) {
        let verified = self.processing.lock().unwrap().verified();
        for incoming in verified.iter() {
            debug!(self.logger, "verified signature";
                "origin" => incoming.origin,
                "level" => incoming.level,
                "cardinality" => incoming.ms.cardinality(),
            );
            {
                let mut store = self.store.lock().unwrap();
                store.store(incoming.level, incoming.ms.clone());
                self.metrics.highest_level.set(store.highest() as f64);
            }
            let mut inner = self.inner.lock().unwrap();
            self.check_completed_level(&mut inner);
            self.check_final_signature(&mut inner);
        }
    }

    /// Walk levels from the top down, stopping at the first completed one:
    /// every level whose best just reached full size gets an immediate
    /// fan-out burst instead of waiting for the ticker.
    fn check_completed_level(&self, inner: &mut Inner<S>) {
        let mut bursts = Vec::new();
        {
            let store = self.store.lock().unwrap();
            for lvl in inner.levels.iter_mut().skip(1).rev() {
                if lvl.completed {
                    break;
                }
                let Some(best) = store.best(lvl.id as u8) else {
                    continue;
                };
                if lvl.update_best(best) {
                    bursts.push(lvl.id);
                }
            }
        }
        for id in bursts {
            info!(self.logger, "level completed"; "level" => id);
            let count = self.cfg.candidate_count;
            self.send_update(&mut inner.levels[id - 1], count);
        }
    }

    /// Emit the full signature if it reaches the threshold and improves on
    /// the best emitted so far.
    fn check_final_signature(&self, inner: &mut Inner<S>) {
        let Some(full) = self.store.lock().unwrap().full_signature() else {
            return;
        };
        self.metrics.full_cardinality.set(full.cardinality() as f64);
        if full.cardinality() < self.cfg.contribution_threshold {
            return;
        }
        let improved = inner
            .best
            .as_ref()
            .is_none_or(|best| full.cardinality() > best.cardinality());
        if !improved {
            return;
        }
        if let Some(out) = &inner.out_tx {
            match out.try_send(full.clone()) {
                Ok(()) => {
                    self.metrics.final_emissions_total.increment(1);
                    info!(self.logger, "emitting final signature";
                        "cardinality" => full.cardinality(),
                    );
                }
                Err(_) => warn!(self.logger, "final-signature channel full, emission dropped"),
            }
        }
        inner.best = Some(full);
    }

    /// Validate and decode one inbound packet.
    fn parse_packet(&self, packet: &Packet) -> Result<IncomingSig<S::Sig>, AggregationError> {
        if packet.origin < 0 || packet.origin as usize >= self.reg.size() {
            return Err(AggregationError::UnknownOrigin(packet.origin));
        }
        let level = packet.level as usize;
        if level < 1 || level > self.part.max_level() {
            return Err(AggregationError::LevelOutOfRange {
                level,
                max: self.part.max_level(),
            });
        }
        let ms = MultiSignature::unmarshal(&packet.multi_sig, S::SIGNATURE_LEN)?;
        // The store and the evaluator index bitsets against the candidate
        // set, so the length has to be right before anything scores it.
        let size = self.part.size(level)?;
        if ms.bitset.bit_length() != size {
            return Err(AggregationError::BitsetLengthMismatch {
                expected: size,
                actual: ms.bitset.bit_length(),
            });
        }
        Ok(IncomingSig {
            origin: packet.origin,
            level: packet.level,
            ms,
        })
    }
}

impl<S: Scheme> PacketListener for Aggregator<S> {
    fn new_packet(&self, packet: Packet) {
        self.metrics.packets_received_total.increment(1);
        let inner = self.inner.lock().unwrap();
        if inner.done {
            return;
        }
        match self.parse_packet(&packet) {
            Ok(incoming) => {
                if let Err(err) = self.processing.lock().unwrap().add(incoming) {
                    debug!(self.logger, "dropping packet"; "error" => %err);
                }
            }
            Err(err) => {
                self.metrics.packets_dropped_total.increment(1);
                warn!(self.logger, "dropping malformed packet";
                    "origin" => packet.origin,
                    "level" => packet.level,
                    "error" => %err,
                );
            }
        }
    }
}
