//! End-to-end tests: block construction over a populated world, full
//! inference runs, and support preservation under reparameterization.

use blockmc::inference::{process_blocks, BlockType, Grouping};
use blockmc::{
    CompositionalInference, Distribution, FnId, InferError, InferenceConfig, Model,
    ParentResolver, RvKey, Value, World,
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;

const FOO: FnId = FnId(1);
const BAR: FnId = FnId(2);
const RATE: FnId = FnId(3);
const LEVEL: FnId = FnId(4);
const DRIFT: FnId = FnId(5);
const READING: FnId = FnId(6);

/// Two families: FOO/BAR pairs over three indices, and a three-variable
/// latent chain over two indices feeding an observed reading.
struct MixedModel;

impl Model for MixedModel {
    fn evaluate(
        &self,
        key: &RvKey,
        parents: &mut dyn ParentResolver,
    ) -> Result<Distribution, InferError> {
        match key.fn_id {
            FOO => Ok(Distribution::Normal { mean: 0.0, std: 1.0 }),
            BAR => {
                let foo = parents.value_of(&key.with_fn(FOO))?;
                Ok(Distribution::Normal {
                    mean: foo.as_real().unwrap(),
                    std: 1.0,
                })
            }
            RATE => Ok(Distribution::Gamma {
                shape: 2.0,
                rate: 1.0,
            }),
            LEVEL => {
                let rate = parents.value_of(&key.with_fn(RATE))?;
                Ok(Distribution::Normal {
                    mean: rate.as_real().unwrap(),
                    std: 1.0,
                })
            }
            DRIFT => {
                let level = parents.value_of(&key.with_fn(LEVEL))?;
                Ok(Distribution::Normal {
                    mean: level.as_real().unwrap(),
                    std: 0.5,
                })
            }
            READING => {
                let drift = parents.value_of(&key.with_fn(DRIFT))?;
                Ok(Distribution::Normal {
                    mean: drift.as_real().unwrap(),
                    std: 1.0,
                })
            }
            other => Err(InferError::Internal(format!("no such function: {other:?}"))),
        }
    }
}

fn mixed_world() -> World {
    let mut queries: Vec<RvKey> = Vec::new();
    for i in 0..3 {
        queries.push(RvKey::new(FOO, [i]));
        queries.push(RvKey::new(BAR, [i]));
    }
    for j in 0..2 {
        queries.push(RvKey::new(RATE, [j]));
        queries.push(RvKey::new(LEVEL, [j]));
        queries.push(RvKey::new(DRIFT, [j]));
    }
    let mut observations = FxHashMap::default();
    observations.insert(RvKey::new(READING, [0]), Value::Real(1.5));
    observations.insert(RvKey::new(READING, [1]), Value::Real(-0.5));

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    World::initialize(
        &MixedModel,
        &queries,
        observations,
        &Default::default(),
        &mut rng,
    )
    .unwrap()
}

#[test]
fn grouping_and_singles_partition_the_latent_variables() {
    let world = mixed_world();
    let blocks = process_blocks(&world, &[Grouping(vec![FOO, BAR])]);

    // Three sequential blocks headed by FOO(i); BAR(i) rides along and
    // gets no block of its own. Six single-node blocks cover the latent
    // chain; the observed readings get none.
    assert_eq!(blocks.len(), 9);
    let sequential: Vec<_> = blocks
        .iter()
        .filter(|b| b.kind == BlockType::Sequential)
        .collect();
    let singles: Vec<_> = blocks
        .iter()
        .filter(|b| b.kind == BlockType::SingleNode)
        .collect();
    assert_eq!(sequential.len(), 3);
    assert_eq!(singles.len(), 6);

    for b in &sequential {
        assert_eq!(b.first_node.fn_id, FOO);
        assert_eq!(b.block, vec![FOO, BAR]);
    }
    assert!(blocks.iter().all(|b| b.first_node.fn_id != READING));
    assert!(blocks.iter().all(|b| b.first_node.fn_id != BAR));
}

#[test]
fn block_order_is_stable_across_calls() {
    let world = mixed_world();
    let groupings = [Grouping(vec![FOO, BAR])];
    let a = process_blocks(&world, &groupings);
    let b = process_blocks(&world, &groupings);
    let heads_a: Vec<_> = a.iter().map(|blk| blk.first_node.clone()).collect();
    let heads_b: Vec<_> = b.iter().map(|blk| blk.first_node.clone()).collect();
    assert_eq!(heads_a, heads_b);
}

#[test]
fn full_run_with_grouping_produces_complete_chains() {
    let config = InferenceConfig::new().with_grouping(vec![FOO, BAR]);
    let mut engine = CompositionalInference::with_config(MixedModel, config);

    let queries: Vec<RvKey> = (0..3)
        .flat_map(|i| [RvKey::new(FOO, [i]), RvKey::new(BAR, [i])])
        .collect();
    let mut observations = FxHashMap::default();
    observations.insert(RvKey::new(READING, [0]), Value::Real(1.5));

    let samples = engine.infer(&queries, observations, 200, 5).unwrap();
    for q in &queries {
        let chain = samples.get(q).unwrap();
        assert_eq!(chain.len(), 200);
        assert!(chain.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn positive_variables_stay_positive_through_the_chain() {
    // RATE is Gamma-distributed; its kernel works in log space, so every
    // state the chain visits must map back into the positive reals.
    let mut engine = CompositionalInference::new(MixedModel);
    let rate = RvKey::new(RATE, [0]);
    let mut observations = FxHashMap::default();
    observations.insert(RvKey::new(READING, [0]), Value::Real(2.0));

    let samples = engine
        .infer(std::slice::from_ref(&rate), observations, 300, 17)
        .unwrap();
    let chain = samples.get(&rate).unwrap();
    assert_eq!(chain.len(), 300);
    assert!(chain.iter().all(|v| v.as_real().unwrap() > 0.0));
    assert!(samples.acceptance_rate() > 0.0);
}

#[test]
fn unit_interval_variables_stay_inside_the_interval() {
    struct CoinModel;

    impl Model for CoinModel {
        fn evaluate(
            &self,
            key: &RvKey,
            parents: &mut dyn ParentResolver,
        ) -> Result<Distribution, InferError> {
            match key.fn_id {
                FnId(1) => Ok(Distribution::Beta {
                    alpha: 2.0,
                    beta: 2.0,
                }),
                FnId(2) => {
                    let p = parents.value_of(&RvKey::plain(FnId(1)))?;
                    Ok(Distribution::Bernoulli {
                        p: p.as_real().unwrap(),
                    })
                }
                other => Err(InferError::Internal(format!("no such function: {other:?}"))),
            }
        }
    }

    let p = RvKey::plain(FnId(1));
    let mut observations = FxHashMap::default();
    observations.insert(RvKey::plain(FnId(2)), Value::Bool(true));

    let mut engine = CompositionalInference::new(CoinModel);
    let samples = engine
        .infer(std::slice::from_ref(&p), observations, 300, 41)
        .unwrap();
    let chain = samples.get(&p).unwrap();
    assert!(chain
        .iter()
        .all(|v| (0.0..=1.0).contains(&v.as_real().unwrap())));
}

proptest! {
    // Whatever the proposals were, rolling every block back must leave the
    // world observationally identical to its pre-sweep state.
    #[test]
    fn rolled_back_sweep_is_observationally_identity(seed in 0u64..500) {
        use blockmc::inference::{block_propose_change, BlockProposal, ProposerSelector};

        let mut world = mixed_world();
        let mut selector = ProposerSelector::new();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let all_keys: Vec<RvKey> = (0..3)
            .flat_map(|i| [RvKey::new(FOO, [i]), RvKey::new(BAR, [i])])
            .chain((0..2).flat_map(|j| {
                [
                    RvKey::new(RATE, [j]),
                    RvKey::new(LEVEL, [j]),
                    RvKey::new(DRIFT, [j]),
                ]
            }))
            .collect();
        let before: Vec<Value> = all_keys
            .iter()
            .map(|k| world.get_node(k).unwrap().value.clone())
            .collect();

        for block in process_blocks(&world, &[Grouping(vec![FOO, BAR])]) {
            let outcome =
                block_propose_change(&mut world, &MixedModel, &mut selector, &block, &mut rng)
                    .unwrap();
            if let BlockProposal::Scored { layers, .. } = outcome {
                world.rollback_layers(layers).unwrap();
            }
        }

        for (key, value) in all_keys.iter().zip(before) {
            prop_assert_eq!(&world.get_node(key).unwrap().value, &value, "{}", key);
        }
    }
}

#[test]
fn discrete_parent_switches_its_childs_distribution() {
    // A mixture: the discrete component picks which Normal generates the
    // data. Exercises the uniform kernel and distribution refresh in one.
    const Z: FnId = FnId(1);
    const X: FnId = FnId(2);

    struct Mixture;

    impl Model for Mixture {
        fn evaluate(
            &self,
            key: &RvKey,
            parents: &mut dyn ParentResolver,
        ) -> Result<Distribution, InferError> {
            match key.fn_id {
                Z => Ok(Distribution::Categorical {
                    weights: vec![1.0, 1.0],
                }),
                X => {
                    let z = parents.value_of(&RvKey::plain(Z))?;
                    let mean = if z.as_int().unwrap() == 0 { -5.0 } else { 5.0 };
                    Ok(Distribution::Normal { mean, std: 1.0 })
                }
                other => Err(InferError::Internal(format!("no such function: {other:?}"))),
            }
        }
    }

    let z = RvKey::plain(Z);
    let mut observations = FxHashMap::default();
    observations.insert(RvKey::plain(X), Value::Real(5.0));

    let mut engine = CompositionalInference::new(Mixture);
    let samples = engine
        .infer(std::slice::from_ref(&z), observations, 500, 29)
        .unwrap();
    let chain = samples.get(&z).unwrap();
    let ones = chain
        .iter()
        .filter(|v| v.as_int().unwrap() == 1)
        .count();
    // The data sits ten standard deviations from component 0.
    assert!(
        ones as f64 / chain.len() as f64 > 0.9,
        "component 1 frequency {}/{}",
        ones,
        chain.len()
    );
}
