//! # blockmc Performance Benchmarks
//!
//! Benchmarks key operations at increasing model sizes:
//! - World instantiation from a model
//! - Full sweeps over single-node blocks
//! - Full sweeps over sequential blocks
//!

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;

use blockmc::{
    CompositionalInference, Distribution, FnId, InferError, InferenceConfig, Model,
    ParentResolver, RvKey, Value, World,
};

const MU: FnId = FnId(1);
const SIGNAL: FnId = FnId(2);
const OBS: FnId = FnId(3);

/// A fan model: one shared location, `n` indexed signals around it, each
/// with one observed reading.
struct FanModel;

impl Model for FanModel {
    fn evaluate(
        &self,
        key: &RvKey,
        parents: &mut dyn ParentResolver,
    ) -> Result<Distribution, InferError> {
        match key.fn_id {
            MU => Ok(Distribution::Normal { mean: 0.0, std: 5.0 }),
            SIGNAL => {
                let mu = parents.value_of(&RvKey::plain(MU))?;
                Ok(Distribution::Normal {
                    mean: mu.as_real().unwrap(),
                    std: 1.0,
                })
            }
            OBS => {
                let s = parents.value_of(&key.with_fn(SIGNAL))?;
                Ok(Distribution::Normal {
                    mean: s.as_real().unwrap(),
                    std: 0.5,
                })
            }
            other => Err(InferError::Internal(format!("no such function: {other:?}"))),
        }
    }
}

fn fan_inputs(n: i64) -> (Vec<RvKey>, FxHashMap<RvKey, Value>) {
    let mut queries = vec![RvKey::plain(MU)];
    let mut observations = FxHashMap::default();
    for i in 0..n {
        queries.push(RvKey::new(SIGNAL, [i]));
        observations.insert(RvKey::new(OBS, [i]), Value::Real((i % 7) as f64 * 0.3));
    }
    (queries, observations)
}

fn bench_world_initialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_initialize");
    for n in [10i64, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (queries, observations) = fan_inputs(n);
            b.iter(|| {
                let mut rng = ChaCha8Rng::seed_from_u64(1);
                let world = World::initialize(
                    &FanModel,
                    &queries,
                    observations.clone(),
                    &Default::default(),
                    &mut rng,
                )
                .unwrap();
                black_box(world.len())
            });
        });
    }
    group.finish();
}

fn bench_single_node_sweeps(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_node_sweeps");
    group.sample_size(10);
    for n in [10i64, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (queries, observations) = fan_inputs(n);
            b.iter(|| {
                let mut engine = CompositionalInference::new(FanModel);
                let samples = engine
                    .infer(&queries, observations.clone(), 20, 7)
                    .unwrap();
                black_box(samples.num_samples())
            });
        });
    }
    group.finish();
}

fn bench_sequential_sweeps(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_sweeps");
    group.sample_size(10);
    for n in [10i64, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (queries, observations) = fan_inputs(n);
            b.iter(|| {
                let mut engine = CompositionalInference::with_config(
                    FanModel,
                    InferenceConfig::new().with_grouping(vec![MU, SIGNAL]),
                );
                let samples = engine
                    .infer(&queries, observations.clone(), 20, 7)
                    .unwrap();
                black_box(samples.num_samples())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_world_initialize,
    bench_single_node_sweeps,
    bench_sequential_sweeps
);
criterion_main!(benches);
