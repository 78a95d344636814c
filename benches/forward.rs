//! Criterion benchmarks for the spiking network.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use spikegest::dataset::{Sample, SyntheticImu};
use spikegest::network::{ExecutionTier, SpikingNetwork};
use spikegest::storage::write_weight_file;
use spikegest::{config::NetworkConfig, config::TrainConfig, train::Trainer};

fn make_net(hidden: usize, steps: usize, seed: u64) -> SpikingNetwork {
    let cfg = NetworkConfig::with_size(6, hidden, 6).with_steps(steps);
    SpikingNetwork::init(cfg, &mut ChaCha8Rng::seed_from_u64(seed)).unwrap()
}

fn make_samples(n: usize) -> Vec<Sample> {
    SyntheticImu::default()
        .generate(n, &mut ChaCha8Rng::seed_from_u64(3))
        .unwrap()
}

/// Benchmark a single forward pass with varying hidden sizes.
fn bench_forward_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_hidden");
    let features = [0.3, -0.2, 0.8, 0.05, -0.6, 0.1];

    for hidden in [32, 128, 512].iter() {
        group.throughput(Throughput::Elements(*hidden as u64));
        group.bench_with_input(BenchmarkId::new("scalar", hidden), hidden, |b, &hidden| {
            let net = make_net(hidden, 10, 42);
            let mut rng = ChaCha8Rng::seed_from_u64(1);
            b.iter(|| black_box(net.forward(&features, &mut rng).unwrap()));
        });
    }

    group.finish();
}

/// Batch inference comparing execution tiers.
fn bench_batch_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_tier");
    let samples = make_samples(256);
    group.throughput(Throughput::Elements(samples.len() as u64));

    // Parallel falls back to scalar if the feature is not enabled.
    for (label, tier) in [
        ("scalar_256", ExecutionTier::Scalar),
        ("parallel_256", ExecutionTier::Parallel),
    ] {
        group.bench_function(label, |b| {
            let mut net = make_net(128, 10, 42);
            net.set_execution_tier(tier);
            b.iter(|| black_box(net.forward_batch(&samples, 7).unwrap()));
        });
    }

    group.finish();
}

/// One training epoch (forward, BPTT and Adam) over a small dataset.
fn bench_train_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("train");
    group.sample_size(10);
    let samples = make_samples(128);
    let (train, val) = samples.split_at(96);

    group.bench_function("epoch_128x96", |b| {
        let trainer = Trainer::new(TrainConfig::default().with_epochs(1)).unwrap();
        b.iter(|| {
            let mut net = make_net(128, 10, 42);
            black_box(trainer.train(&mut net, train, val).unwrap().final_val_accuracy)
        });
    });

    group.finish();
}

/// Quantize and encode the full parameter set.
fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");

    for hidden in [128, 512].iter() {
        group.bench_with_input(BenchmarkId::new("quantize_encode", hidden), hidden, |b, &hidden| {
            let net = make_net(hidden, 10, 42);
            let mut buf = Vec::with_capacity(64 * 1024);
            b.iter(|| {
                buf.clear();
                write_weight_file(&mut buf, &net.quantize().unwrap()).unwrap();
                black_box(buf.len())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_forward_sizes,
    bench_batch_tiers,
    bench_train_epoch,
    bench_export
);
criterion_main!(benches);
