//! Asynchronous verification of incoming multi-signatures.
//!
//! Pairing checks dominate the protocol's CPU cost, so incoming aggregates
//! are not verified in arrival order: a single worker repeatedly scores
//! everything pending, drops what the store would reject anyway, and
//! verifies only the single most valuable candidate. Late-arriving better
//! aggregates therefore preempt older mediocre ones that have not been
//! verified yet, and the queue prunes itself as the store improves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender, bounded};
use crypto::{PublicKey, Scheme};
use slog::{Logger, debug, warn};

use crate::error::AggregationError;
use crate::metrics::AggregationMetrics;
use crate::multisig::IncomingSig;
use crate::partitioner::Partitioner;
use crate::store::SharedStore;

/// Capacity of the verified-output channel.
const VERIFIED_CHANNEL_CAP: usize = 1000;

/// Capacity of the FIFO baseline's channels.
const FIFO_CHANNEL_CAP: usize = 100;

/// Scores an unverified incoming signature. 0 means it can be discarded
/// outright; higher means more worth verifying.
pub trait Evaluator<S: Scheme>: Send + Sync + 'static {
    fn evaluate(&self, incoming: &IncomingSig<S::Sig>) -> usize;
}

/// Scores every signature 1, yielding verify-everything-in-FIFO-order
/// behaviour. Used as a baseline against the store-backed evaluator.
pub struct ConstEvaluator;

impl<S: Scheme> Evaluator<S> for ConstEvaluator {
    fn evaluate(&self, _incoming: &IncomingSig<S::Sig>) -> usize {
        1
    }
}

/// Scores through [`ReplaceStore::evaluate`](crate::store::ReplaceStore::evaluate),
/// under the store's own lock.
pub struct StoreEvaluator<S: Scheme> {
    store: SharedStore<S>,
}

impl<S: Scheme> StoreEvaluator<S> {
    pub fn new(store: SharedStore<S>) -> Self {
        Self { store }
    }
}

impl<S: Scheme> Evaluator<S> for StoreEvaluator<S> {
    fn evaluate(&self, incoming: &IncomingSig<S::Sig>) -> usize {
        self.store.lock().unwrap().evaluate(incoming)
    }
}

/// Verify an incoming aggregate: aggregate the public keys named by its
/// bitset and run the scheme's check.
pub(crate) fn verify_multisig<S: Scheme>(
    part: &dyn Partitioner<S>,
    message: &[u8],
    incoming: &IncomingSig<S::Sig>,
) -> Result<(), AggregationError> {
    let ids = part.identities_at(incoming.level as usize)?;
    if incoming.ms.bitset.bit_length() != ids.len() {
        return Err(AggregationError::BitsetLengthMismatch {
            expected: ids.len(),
            actual: incoming.ms.bitset.bit_length(),
        });
    }
    let mut key: Option<S::Public> = None;
    for i in incoming.ms.bitset.iter_set() {
        let pk = ids[i].public_key();
        key = Some(match key {
            None => pk.clone(),
            Some(acc) => acc.combine(pk),
        });
    }
    let Some(key) = key else {
        return Err(AggregationError::MalformedPacket(
            "aggregate with empty bitset".into(),
        ));
    };
    key.verify(message, &incoming.ms.signature)?;
    Ok(())
}

/// Counters describing processing activity, shared with the worker thread.
#[derive(Default)]
pub struct ProcessingStats {
    checked: AtomicU64,
    queue_size: AtomicU64,
    suppressed: AtomicU64,
    verify_nanos: AtomicU64,
}

/// Point-in-time view of [`ProcessingStats`].
#[derive(Clone, Copy, Debug)]
pub struct StatsSnapshot {
    /// Signatures handed to the scheme's verify.
    pub checked: u64,
    /// Signatures dropped by evaluation instead of verified.
    pub suppressed: u64,
    /// Mean pending-queue length at selection time.
    pub avg_queue_size: f64,
    /// Mean wall time of one verification, in nanoseconds.
    pub avg_verify_nanos: f64,
}

impl ProcessingStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let checked = self.checked.load(Ordering::Relaxed);
        let div = checked.max(1) as f64;
        StatsSnapshot {
            checked,
            suppressed: self.suppressed.load(Ordering::Relaxed),
            avg_queue_size: self.queue_size.load(Ordering::Relaxed) as f64 / div,
            avg_verify_nanos: self.verify_nanos.load(Ordering::Relaxed) as f64 / div,
        }
    }
}

/// Hands incoming signatures to a verification strategy and surfaces the
/// verified ones on a bounded channel.
pub trait SignatureProcessing<S: Scheme>: Send {
    /// Spawn the worker.
    fn start(&mut self);

    /// Stop the worker. The verified channel closes once the worker exits.
    fn stop(&mut self);

    /// Queue a signature for verification.
    fn add(&self, incoming: IncomingSig<S::Sig>) -> Result<(), AggregationError>;

    /// The channel carrying verified signatures.
    fn verified(&self) -> Receiver<IncomingSig<S::Sig>>;

    /// Activity counters.
    fn stats(&self) -> StatsSnapshot;
}

struct Pending<S: Scheme> {
    todos: Vec<IncomingSig<S::Sig>>,
    stopped: bool,
}

struct Queue<S: Scheme> {
    pending: Mutex<Pending<S>>,
    cond: Condvar,
}

/// Processing that always verifies the highest-scoring pending signature
/// next and prunes zero-scored ones while selecting.
pub struct PriorityProcessing<S: Scheme> {
    queue: Arc<Queue<S>>,
    part: Arc<dyn Partitioner<S>>,
    evaluator: Arc<dyn Evaluator<S>>,
    message: Vec<u8>,
    out_tx: Option<Sender<IncomingSig<S::Sig>>>,
    out_rx: Receiver<IncomingSig<S::Sig>>,
    stats: Arc<ProcessingStats>,
    metrics: AggregationMetrics,
    logger: Logger,
}

impl<S: Scheme> PriorityProcessing<S> {
    pub fn new(
        part: Arc<dyn Partitioner<S>>,
        evaluator: Arc<dyn Evaluator<S>>,
        message: Vec<u8>,
        metrics: AggregationMetrics,
        logger: Logger,
    ) -> Self {
        let (out_tx, out_rx) = bounded(VERIFIED_CHANNEL_CAP);
        Self {
            queue: Arc::new(Queue {
                pending: Mutex::new(Pending {
                    todos: Vec::new(),
                    stopped: false,
                }),
                cond: Condvar::new(),
            }),
            part,
            evaluator,
            message,
            out_tx: Some(out_tx),
            out_rx,
            stats: Arc::new(ProcessingStats::default()),
            metrics,
            logger,
        }
    }

    /// Block until something is pending, then score the whole list once:
    /// zero scores are dropped, the single best is extracted, the rest is
    /// written back. Returns `None` on shutdown.
    fn select_best(
        queue: &Queue<S>,
        evaluator: &dyn Evaluator<S>,
        stats: &ProcessingStats,
        metrics: &AggregationMetrics,
    ) -> Option<Option<IncomingSig<S::Sig>>> {
        let mut pending = queue.pending.lock().unwrap();
        while pending.todos.is_empty() && !pending.stopped {
            pending = queue.cond.wait(pending).unwrap();
        }
        if pending.stopped {
            return None;
        }

        let previous_len = pending.todos.len();
        let mut best: Option<(usize, IncomingSig<S::Sig>)> = None;
        let mut kept = Vec::new();
        for incoming in pending.todos.drain(..) {
            let score = evaluator.evaluate(&incoming);
            if score == 0 {
                continue;
            }
            // Ties keep the earlier arrival as best.
            let improves = best.as_ref().is_none_or(|(best_score, _)| score > *best_score);
            if improves {
                if let Some((_, previous)) = best.take() {
                    kept.push(previous);
                }
                best = Some((score, incoming));
            } else {
                kept.push(incoming);
            }
        }
        let new_len = kept.len();
        pending.todos = kept;

        let mut suppressed = (previous_len - new_len) as u64;
        if best.is_some() {
            suppressed -= 1;
            stats.checked.fetch_add(1, Ordering::Relaxed);
            stats.queue_size.fetch_add(new_len as u64, Ordering::Relaxed);
            metrics.sigs_checked_total.increment(1);
        }
        stats.suppressed.fetch_add(suppressed, Ordering::Relaxed);
        metrics.sigs_suppressed_total.increment(suppressed);
        metrics.pending_queue_size.set(new_len as f64);

        Some(best.map(|(_, incoming)| incoming))
    }

    fn worker_loop(
        queue: Arc<Queue<S>>,
        part: Arc<dyn Partitioner<S>>,
        evaluator: Arc<dyn Evaluator<S>>,
        message: Vec<u8>,
        out: Sender<IncomingSig<S::Sig>>,
        stats: Arc<ProcessingStats>,
        metrics: AggregationMetrics,
        logger: Logger,
    ) {
        while let Some(selected) = Self::select_best(&queue, &*evaluator, &stats, &metrics) {
            let Some(incoming) = selected else {
                continue;
            };
            let started = Instant::now();
            let outcome = verify_multisig(&*part, &message, &incoming);
            let elapsed = started.elapsed();
            stats
                .verify_nanos
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
            metrics
                .verification_duration_seconds
                .record(elapsed.as_secs_f64());

            match outcome {
                Ok(()) => {
                    metrics.sigs_verified_total.increment(1);
                    if out.send(incoming).is_err() {
                        // Receivers are gone; shutdown is in progress.
                        return;
                    }
                }
                Err(err) => {
                    metrics.sigs_invalid_total.increment(1);
                    warn!(logger, "dropping invalid signature";
                        "origin" => incoming.origin,
                        "level" => incoming.level,
                        "error" => %err,
                    );
                }
            }
        }
        // Dropping the sender closes the verified channel.
    }
}

impl<S: Scheme> SignatureProcessing<S> for PriorityProcessing<S> {
    fn start(&mut self) {
        let Some(out) = self.out_tx.take() else {
            return;
        };
        let queue = Arc::clone(&self.queue);
        let part = Arc::clone(&self.part);
        let evaluator = Arc::clone(&self.evaluator);
        let message = self.message.clone();
        let stats = Arc::clone(&self.stats);
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();
        thread::Builder::new()
            .name("sig-processing".into())
            .spawn(move || {
                Self::worker_loop(queue, part, evaluator, message, out, stats, metrics, logger);
            })
            .expect("spawning the processing worker");
    }

    fn stop(&mut self) {
        let mut pending = self.queue.pending.lock().unwrap();
        pending.stopped = true;
        self.queue.cond.notify_all();
    }

    fn add(&self, incoming: IncomingSig<S::Sig>) -> Result<(), AggregationError> {
        let mut pending = self.queue.pending.lock().unwrap();
        if pending.stopped {
            return Err(AggregationError::StoreStopped);
        }
        pending.todos.push(incoming);
        self.queue.cond.notify_one();
        Ok(())
    }

    fn verified(&self) -> Receiver<IncomingSig<S::Sig>> {
        self.out_rx.clone()
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Baseline processing: verify everything in arrival order, skipping only
/// what the store already scores at zero.
pub struct FifoProcessing<S: Scheme> {
    store: SharedStore<S>,
    part: Arc<dyn Partitioner<S>>,
    message: Vec<u8>,
    in_tx: Mutex<Option<Sender<IncomingSig<S::Sig>>>>,
    in_rx: Option<Receiver<IncomingSig<S::Sig>>>,
    out_tx: Option<Sender<IncomingSig<S::Sig>>>,
    out_rx: Receiver<IncomingSig<S::Sig>>,
    stats: Arc<ProcessingStats>,
    metrics: AggregationMetrics,
    logger: Logger,
}

impl<S: Scheme> FifoProcessing<S> {
    pub fn new(
        store: SharedStore<S>,
        part: Arc<dyn Partitioner<S>>,
        message: Vec<u8>,
        metrics: AggregationMetrics,
        logger: Logger,
    ) -> Self {
        let (in_tx, in_rx) = bounded(FIFO_CHANNEL_CAP);
        let (out_tx, out_rx) = bounded(FIFO_CHANNEL_CAP);
        Self {
            store,
            part,
            message,
            in_tx: Mutex::new(Some(in_tx)),
            in_rx: Some(in_rx),
            out_tx: Some(out_tx),
            out_rx,
            stats: Arc::new(ProcessingStats::default()),
            metrics,
            logger,
        }
    }
}

impl<S: Scheme> SignatureProcessing<S> for FifoProcessing<S> {
    fn start(&mut self) {
        let (Some(in_rx), Some(out)) = (self.in_rx.take(), self.out_tx.take()) else {
            return;
        };
        let store = Arc::clone(&self.store);
        let part = Arc::clone(&self.part);
        let message = self.message.clone();
        let stats = Arc::clone(&self.stats);
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();
        thread::Builder::new()
            .name("sig-processing-fifo".into())
            .spawn(move || {
                for incoming in in_rx.iter() {
                    if store.lock().unwrap().evaluate(&incoming) == 0 {
                        stats.suppressed.fetch_add(1, Ordering::Relaxed);
                        metrics.sigs_suppressed_total.increment(1);
                        continue;
                    }
                    stats.checked.fetch_add(1, Ordering::Relaxed);
                    metrics.sigs_checked_total.increment(1);
                    let started = Instant::now();
                    let outcome = verify_multisig(&*part, &message, &incoming);
                    stats
                        .verify_nanos
                        .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    match outcome {
                        Ok(()) => {
                            metrics.sigs_verified_total.increment(1);
                            if out.send(incoming).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            metrics.sigs_invalid_total.increment(1);
                            debug!(logger, "dropping invalid signature"; "error" => %err);
                        }
                    }
                }
            })
            .expect("spawning the fifo processing worker");
    }

    fn stop(&mut self) {
        // Dropping the input sender lets the worker drain and exit.
        self.in_tx.lock().unwrap().take();
    }

    fn add(&self, incoming: IncomingSig<S::Sig>) -> Result<(), AggregationError> {
        let guard = self.in_tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return Err(AggregationError::StoreStopped);
        };
        tx.send(incoming)
            .map_err(|_| AggregationError::StoreStopped)
    }

    fn verified(&self) -> Receiver<IncomingSig<S::Sig>> {
        self.out_rx.clone()
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::identity::NodeId;
    use crate::partitioner::BinomialPartitioner;
    use crate::store::ReplaceStore;
    use crate::tests::test_helpers::{FakeScheme, FakeSig, fake_registry, ms_with_bits, quiet_logger};

    const MSG: &[u8] = b"processing";

    fn partitioner() -> Arc<BinomialPartitioner<FakeScheme>> {
        Arc::new(BinomialPartitioner::new(1, fake_registry(8)))
    }

    fn incoming(origin: NodeId, bits: &[usize]) -> IncomingSig<FakeSig> {
        IncomingSig {
            origin,
            level: 3,
            ms: ms_with_bits(4, bits),
        }
    }

    /// Scores by origin id, ignoring the store entirely.
    struct ScriptedEvaluator(HashMap<NodeId, usize>);

    impl Evaluator<FakeScheme> for ScriptedEvaluator {
        fn evaluate(&self, inc: &IncomingSig<FakeSig>) -> usize {
            self.0[&inc.origin]
        }
    }

    #[test]
    fn verifies_highest_score_first() {
        let scores = HashMap::from([(0, 5), (1, 20), (2, 10)]);
        let mut proc = PriorityProcessing::new(
            partitioner(),
            Arc::new(ScriptedEvaluator(scores)),
            MSG.to_vec(),
            AggregationMetrics::new(),
            quiet_logger(),
        );
        proc.add(incoming(0, &[0])).unwrap();
        proc.add(incoming(1, &[1])).unwrap();
        proc.add(incoming(2, &[2])).unwrap();
        let verified = proc.verified();
        proc.start();

        let order: Vec<NodeId> = (0..3)
            .map(|_| verified.recv_timeout(Duration::from_secs(5)).unwrap().origin)
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
        proc.stop();
    }

    #[test]
    fn zero_scored_items_are_suppressed_not_verified() {
        let scores = HashMap::from([(0, 0), (1, 0), (2, 3)]);
        let mut proc = PriorityProcessing::new(
            partitioner(),
            Arc::new(ScriptedEvaluator(scores)),
            MSG.to_vec(),
            AggregationMetrics::new(),
            quiet_logger(),
        );
        proc.add(incoming(0, &[0])).unwrap();
        proc.add(incoming(1, &[1])).unwrap();
        proc.add(incoming(2, &[2])).unwrap();
        let verified = proc.verified();
        proc.start();

        let got = verified.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.origin, 2);
        let stats = proc.stats();
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.suppressed, 2);
        proc.stop();
    }

    #[test]
    fn invalid_signatures_are_dropped() {
        let mut proc = PriorityProcessing::new(
            partitioner(),
            Arc::new(ConstEvaluator),
            MSG.to_vec(),
            AggregationMetrics::new(),
            quiet_logger(),
        );
        let mut bad = incoming(0, &[0, 1]);
        bad.ms.signature = FakeSig::invalid();
        proc.add(bad).unwrap();
        proc.add(incoming(1, &[2])).unwrap();
        let verified = proc.verified();
        proc.start();

        let got = verified.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.origin, 1);
        assert!(verified.try_recv().is_err());
        proc.stop();
    }

    #[test]
    fn stop_closes_the_verified_channel_and_rejects_adds() {
        let mut proc = PriorityProcessing::new(
            partitioner(),
            Arc::new(ConstEvaluator),
            MSG.to_vec(),
            AggregationMetrics::new(),
            quiet_logger(),
        );
        let verified = proc.verified();
        proc.start();
        proc.stop();
        assert!(verified.recv_timeout(Duration::from_secs(5)).is_err());
        assert!(matches!(
            proc.add(incoming(0, &[0])),
            Err(AggregationError::StoreStopped)
        ));
    }

    #[test]
    fn fifo_verifies_in_arrival_order() {
        let part = partitioner();
        let store: SharedStore<FakeScheme> =
            Arc::new(Mutex::new(ReplaceStore::new(part.clone())));
        let mut proc = FifoProcessing::new(
            store,
            part,
            MSG.to_vec(),
            AggregationMetrics::new(),
            quiet_logger(),
        );
        let verified = proc.verified();
        proc.start();
        proc.add(incoming(0, &[0])).unwrap();
        proc.add(incoming(1, &[1, 2])).unwrap();

        assert_eq!(verified.recv_timeout(Duration::from_secs(5)).unwrap().origin, 0);
        assert_eq!(verified.recv_timeout(Duration::from_secs(5)).unwrap().origin, 1);
        proc.stop();
        assert!(matches!(
            proc.add(incoming(2, &[3])),
            Err(AggregationError::StoreStopped)
        ));
    }

    #[test]
    fn store_evaluator_reads_store_state() {
        let part = partitioner();
        let store: SharedStore<FakeScheme> =
            Arc::new(Mutex::new(ReplaceStore::new(part.clone())));
        store.lock().unwrap().store(3, ms_with_bits(4, &[0, 1, 2, 3]));
        let evaluator = StoreEvaluator::new(store);
        assert_eq!(evaluator.evaluate(&incoming(0, &[0])), 0);
    }
}
