//! Benchmarks for the hot paths of signature selection: store evaluation
//! and bitset combination.

use std::sync::Arc;

use aggregation::bitset::Bitset;
use aggregation::identity::{ArrayRegistry, Identity};
use aggregation::multisig::{IncomingSig, MultiSignature};
use aggregation::partitioner::BinomialPartitioner;
use aggregation::store::ReplaceStore;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use crypto::{CryptoError, PublicKey, Scheme, SecretKey, Signature};

const N: usize = 4096;

// A no-op scheme: benchmarks here measure bookkeeping, not pairings.
#[derive(Clone, Debug)]
struct NoopSig;

impl Signature for NoopSig {
    fn combine(&self, _other: &Self) -> Self {
        NoopSig
    }
    fn marshal(&self) -> Vec<u8> {
        vec![0; 8]
    }
    fn unmarshal(_bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(NoopSig)
    }
}

#[derive(Clone, Debug)]
struct NoopPub;

impl PublicKey for NoopPub {
    type Sig = NoopSig;
    fn combine(&self, _other: &Self) -> Self {
        NoopPub
    }
    fn verify(&self, _message: &[u8], _signature: &NoopSig) -> Result<(), CryptoError> {
        Ok(())
    }
}

#[derive(Clone)]
struct NoopSecret;

impl SecretKey for NoopSecret {
    type Pub = NoopPub;
    fn public_key(&self) -> NoopPub {
        NoopPub
    }
    fn sign(&self, _message: &[u8]) -> Result<NoopSig, CryptoError> {
        Ok(NoopSig)
    }
}

struct NoopScheme;

impl Scheme for NoopScheme {
    type Secret = NoopSecret;
    type Public = NoopPub;
    type Sig = NoopSig;
    const SIGNATURE_LEN: usize = 8;
}

fn ms(len: usize, bits: impl Iterator<Item = usize>) -> MultiSignature<NoopSig> {
    let mut bitset = Bitset::new(len);
    for i in bits {
        bitset.set(i, true);
    }
    MultiSignature::new(bitset, NoopSig)
}

fn bench_store_evaluate(c: &mut Criterion) {
    let reg = Arc::new(
        ArrayRegistry::new(
            (0..N)
                .map(|i| Identity::new(i as i32, format!("127.0.0.1:{i}"), NoopPub))
                .collect(),
        )
        .unwrap(),
    );
    let part = Arc::new(BinomialPartitioner::<NoopScheme>::new(1, reg));
    let mut store = ReplaceStore::new(part);
    let top = 12u8;
    let size = N / 2;
    // Half-populated top level plus a sprinkle of verified individuals.
    store.store(top, ms(size, (0..size).filter(|i| i % 2 == 0)));
    for i in (1..size).step_by(97) {
        store.store(top, ms(size, std::iter::once(i)));
    }

    let incoming = IncomingSig {
        origin: 7,
        level: top,
        ms: ms(size, (0..size).filter(|i| i % 3 == 0)),
    };
    c.bench_function("store_evaluate_n4096", |b| {
        b.iter(|| black_box(store.evaluate(black_box(&incoming))))
    });
}

fn bench_bitset_union(c: &mut Criterion) {
    let mut a = Bitset::new(N);
    let mut b = Bitset::new(N);
    for i in (0..N).step_by(3) {
        a.set(i, true);
    }
    for i in (0..N).step_by(5) {
        b.set(i, true);
    }
    c.bench_function("bitset_union_n4096", |bench| {
        bench.iter(|| black_box(a.union(black_box(&b)).unwrap().cardinality()))
    });
}

criterion_group!(benches, bench_store_evaluate, bench_bitset_union);
criterion_main!(benches);
