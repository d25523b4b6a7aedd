//! # World
//!
//! The authoritative, explicitly-owned context for one inference chain:
//! the committed variable mapping, the dependency graph discovered during
//! model evaluation, the declared observations and queries, and the diff
//! stack of uncommitted proposal layers.
//!
//! A `World` is never shared between chains; independent chains construct
//! independent worlds and there is no ambient state.

use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::dist::{Distribution, Value};
use crate::errors::InferError;
use crate::world::diff_stack::DiffStack;
use crate::world::model::{Model, ParentResolver};
use crate::world::transforms::TransformSpec;
use crate::world::variable::{FnId, RvKey, Variable};

/// Per-function transform selection for world construction.
#[derive(Debug, Clone, Default)]
pub struct TransformConfig {
    per_fn: FxHashMap<FnId, TransformSpec>,
}

impl TransformConfig {
    pub fn set(&mut self, fn_id: FnId, spec: TransformSpec) {
        self.per_fn.insert(fn_id, spec);
    }

    pub fn with(mut self, fn_id: FnId, spec: TransformSpec) -> Self {
        self.set(fn_id, spec);
        self
    }

    /// Spec for a function; `Default` transform resolution when the user
    /// declared nothing.
    pub fn spec_for(&self, fn_id: FnId) -> TransformSpec {
        self.per_fn.get(&fn_id).cloned().unwrap_or_default()
    }
}

/// Committed variable assignments, dependency graph, and the diff stack of
/// one inference chain.
#[derive(Debug, Default)]
pub struct World {
    variables: FxHashMap<RvKey, Variable>,
    diff_stack: DiffStack,
    parents: FxHashMap<RvKey, FxHashSet<RvKey>>,
    children: FxHashMap<RvKey, FxHashSet<RvKey>>,
    observations: FxHashMap<RvKey, Value>,
    queries: Vec<RvKey>,
}

impl World {
    /// Builds a world by forward-evaluating the model from the queries and
    /// observations: every variable reachable through the dependency graph
    /// receives a committed record before any scoring happens.
    ///
    /// Fails with [`InferError::CyclicDependency`] if a variable's
    /// distribution transitively depends on the variable itself.
    pub fn initialize<M: Model>(
        model: &M,
        queries: &[RvKey],
        observations: FxHashMap<RvKey, Value>,
        transforms: &TransformConfig,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, InferError> {
        let mut world = World {
            queries: queries.to_vec(),
            observations,
            ..World::default()
        };

        let mut roots: Vec<RvKey> = world.observations.keys().cloned().collect();
        roots.sort();
        roots.extend(queries.iter().cloned());

        let mut active = FxHashSet::default();
        for key in &roots {
            instantiate(&mut world, model, transforms, rng, &mut active, key)?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            variables = world.variables.len(),
            observations = world.observations.len(),
            "world initialized"
        );

        Ok(world)
    }

    /// Reads `key` from the top diff layer downward, falling through to
    /// committed state.
    pub fn get_node(&self, key: &RvKey) -> Result<&Variable, InferError> {
        if let Some(var) = self.diff_stack.get_node(key)? {
            return Ok(var);
        }
        self.committed_node(key)
    }

    /// Reads `key` from committed state only.
    pub fn committed_node(&self, key: &RvKey) -> Result<&Variable, InferError> {
        self.variables
            .get(key)
            .ok_or_else(|| InferError::UnknownVariable(key.clone()))
    }

    /// True if any layer or the committed map holds a record for `key`.
    pub fn contains_node(&self, key: &RvKey) -> bool {
        (self.diff_stack.depth() > 0 && self.diff_stack.contains_node_from(0, key))
            || self.variables.contains_key(key)
    }

    pub fn diff_stack(&self) -> &DiffStack {
        &self.diff_stack
    }

    /// Opens a new overlay for one block member's proposal.
    pub fn push_layer(&mut self) {
        self.diff_stack.push_layer();
    }

    /// Merges the top layer into the layer below, or into committed state
    /// when it is the last layer.
    pub fn commit_top(&mut self) -> Result<(), InferError> {
        self.diff_stack.commit_top(&mut self.variables)
    }

    /// Discards the top layer; state reads as if it was never pushed.
    pub fn rollback_top(&mut self) -> Result<(), InferError> {
        self.diff_stack.rollback_top()
    }

    /// Commits `n` layers, innermost first.
    pub fn commit_layers(&mut self, n: usize) -> Result<(), InferError> {
        for _ in 0..n {
            self.commit_top()?;
        }
        Ok(())
    }

    /// Rolls back `n` layers.
    pub fn rollback_layers(&mut self, n: usize) -> Result<(), InferError> {
        for _ in 0..n {
            self.rollback_top()?;
        }
        Ok(())
    }

    /// Writes a proposed record into the active (top) layer. Lower layers
    /// and committed state are untouched until an explicit commit.
    pub fn write_proposed(&mut self, key: RvKey, var: Variable) -> Result<(), InferError> {
        let fresh =
            !self.variables.contains_key(&key) && !self.diff_stack.contains_below_top(&key);
        self.diff_stack.write(key, var, fresh)
    }

    pub(crate) fn add_edge(&mut self, parent: RvKey, child: RvKey) {
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        self.parents.entry(child).or_default().insert(parent);
    }

    /// Children of `key`, sorted for deterministic iteration.
    pub fn children_sorted(&self, key: &RvKey) -> Vec<RvKey> {
        let mut out: Vec<RvKey> = self
            .children
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn parents_of(&self, key: &RvKey) -> Vec<RvKey> {
        let mut out: Vec<RvKey> = self
            .parents
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn queries(&self) -> &[RvKey] {
        &self.queries
    }

    pub fn observations(&self) -> &FxHashMap<RvKey, Value> {
        &self.observations
    }

    pub fn is_observed(&self, key: &RvKey) -> bool {
        self.observations.contains_key(key)
    }

    /// Committed keys produced by `fn_id`, sorted by argument context.
    pub fn keys_for_fn(&self, fn_id: FnId) -> Vec<RvKey> {
        let mut out: Vec<RvKey> = self
            .variables
            .keys()
            .filter(|k| k.fn_id == fn_id)
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Number of committed variable records.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Re-evaluates `key`'s distribution against the current (diff-stack
    /// aware) parent values. Parents must already have records; a missing
    /// parent is an `UnknownVariable`.
    pub fn eval_distribution<M: Model>(
        &mut self,
        model: &M,
        key: &RvKey,
    ) -> Result<Distribution, InferError> {
        let mut resolver = FrozenResolver {
            world: self,
            child: key.clone(),
        };
        model.evaluate(key, &mut resolver)
    }
}

/// Resolver used during world construction: missing parents are
/// instantiated on demand through the model.
struct InitResolver<'a, M: Model> {
    world: &'a mut World,
    model: &'a M,
    transforms: &'a TransformConfig,
    rng: &'a mut ChaCha8Rng,
    active: &'a mut FxHashSet<RvKey>,
    child: RvKey,
}

impl<M: Model> ParentResolver for InitResolver<'_, M> {
    fn value_of(&mut self, key: &RvKey) -> Result<Value, InferError> {
        instantiate(
            self.world,
            self.model,
            self.transforms,
            self.rng,
            self.active,
            key,
        )?;
        self.world.add_edge(key.clone(), self.child.clone());
        Ok(self.world.committed_node(key)?.value.clone())
    }
}

/// Resolver used during scoring: reads current values only, never samples.
struct FrozenResolver<'a> {
    world: &'a mut World,
    child: RvKey,
}

impl ParentResolver for FrozenResolver<'_> {
    fn value_of(&mut self, key: &RvKey) -> Result<Value, InferError> {
        let value = self.world.get_node(key)?.value.clone();
        self.world.add_edge(key.clone(), self.child.clone());
        Ok(value)
    }
}

fn instantiate<M: Model>(
    world: &mut World,
    model: &M,
    transforms: &TransformConfig,
    rng: &mut ChaCha8Rng,
    active: &mut FxHashSet<RvKey>,
    key: &RvKey,
) -> Result<(), InferError> {
    if world.variables.contains_key(key) {
        return Ok(());
    }
    if !active.insert(key.clone()) {
        return Err(InferError::CyclicDependency(key.clone()));
    }

    let distribution = {
        let mut resolver = InitResolver {
            world: &mut *world,
            model,
            transforms,
            rng: &mut *rng,
            active: &mut *active,
            child: key.clone(),
        };
        model.evaluate(key, &mut resolver)?
    };

    let value = match world.observations.get(key) {
        Some(observed) => observed.clone(),
        None => distribution.sample(rng)?,
    };
    let seq = transforms.spec_for(key.fn_id).resolve(&distribution);
    let record = Variable::new(distribution, value, seq)?;
    world.variables.insert(key.clone(), record);

    active.remove(key);
    Ok(())
}
