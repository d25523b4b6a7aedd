//! Copy-on-write diff layers over the committed variable mapping.
//!
//! Each block proposal pushes one or more [`DiffLayer`]s; lookups resolve
//! from the top layer downward and fall through to the committed map.
//! A layer is only ever committed (merged whole into the layer below, or
//! into the committed map when it is the last layer) or discarded whole —
//! partial commits are not possible through this API.
//!
//! Every stored record is stamped with the [`LayerId`] of the layer that
//! wrote it. Rolled-back layer ids are retired, so a record that somehow
//! survives its layer's rollback is detectable as a stale dependency.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::InferError;
use crate::world::variable::{RvKey, Variable};

/// Identifier of one diff layer generation.
///
/// Ids are never reused within a world's lifetime; id 0 is reserved for the
/// committed mapping and is always live.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct LayerId(pub u64);

impl LayerId {
    pub const COMMITTED: LayerId = LayerId(0);
}

/// One copy-on-write overlay of variable updates.
#[derive(Debug, Clone)]
pub struct DiffLayer {
    id: LayerId,
    vars: FxHashMap<RvKey, (Variable, LayerId)>,
    /// Keys introduced by this layer, as opposed to updates of records that
    /// already existed below it.
    fresh: FxHashSet<RvKey>,
}

impl DiffLayer {
    pub fn id(&self) -> LayerId {
        self.id
    }

    /// True if this layer holds a record for `key`.
    pub fn contains_node(&self, key: &RvKey) -> bool {
        self.vars.contains_key(key)
    }

    /// True if this layer introduced `key` rather than updating it.
    pub fn is_fresh(&self, key: &RvKey) -> bool {
        self.fresh.contains(key)
    }

    pub fn get(&self, key: &RvKey) -> Option<&Variable> {
        self.vars.get(key).map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RvKey> {
        self.vars.keys()
    }
}

/// Ordered stack of diff layers over a committed variable mapping.
///
/// The stack does not own the committed map; [`DiffStack::commit_top`]
/// receives it explicitly so the world stays the single owner of committed
/// state.
#[derive(Debug)]
pub struct DiffStack {
    layers: Vec<DiffLayer>,
    next_id: u64,
    retired: FxHashSet<LayerId>,
}

// Not derived: layer ids start above LayerId::COMMITTED.
impl Default for DiffStack {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffStack {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            next_id: 1,
            retired: FxHashSet::default(),
        }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, level: usize) -> Option<&DiffLayer> {
        self.layers.get(level)
    }

    /// Pushes a fresh overlay; scoped to one block member's proposal.
    pub fn push_layer(&mut self) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        self.layers.push(DiffLayer {
            id,
            vars: FxHashMap::default(),
            fresh: FxHashSet::default(),
        });
        id
    }

    /// True if 0 is live; retired ids identify discarded layers.
    pub fn is_live(&self, id: LayerId) -> bool {
        !self.retired.contains(&id)
    }

    /// Top-down lookup across the layers only (no committed fallthrough).
    ///
    /// Fails with `StaleDependency` if the first record found was written
    /// by a layer that has since been rolled back — that record should not
    /// have survived.
    pub fn get_node(&self, key: &RvKey) -> Result<Option<&Variable>, InferError> {
        for layer in self.layers.iter().rev() {
            if let Some((var, origin)) = layer.vars.get(key) {
                if !self.is_live(*origin) {
                    return Err(InferError::StaleDependency(key.clone()));
                }
                return Ok(Some(var));
            }
        }
        Ok(None)
    }

    /// True if the layer at `level`, or any layer above it, holds `key`.
    pub fn contains_node_from(&self, level: usize, key: &RvKey) -> bool {
        self.layers[level..].iter().any(|l| l.contains_node(key))
    }

    /// True if any layer strictly below the top holds `key`.
    pub fn contains_below_top(&self, key: &RvKey) -> bool {
        let n = self.layers.len();
        n > 1 && self.layers[..n - 1].iter().any(|l| l.contains_node(key))
    }

    /// Writes a record into the top layer.
    ///
    /// `fresh` marks keys this proposal introduced (no record below).
    /// Fails with `Internal` if no layer has been pushed.
    pub fn write(&mut self, key: RvKey, var: Variable, fresh: bool) -> Result<(), InferError> {
        let top = self
            .layers
            .last_mut()
            .ok_or_else(|| InferError::Internal("write with no active diff layer".into()))?;
        let id = top.id;
        if fresh {
            top.fresh.insert(key.clone());
        }
        top.vars.insert(key, (var, id));
        Ok(())
    }

    /// Merges the top layer into the layer below, or into `committed` when
    /// it is the last layer. Origin stamps are preserved: an id is only
    /// retired by rollback, never by commit.
    pub fn commit_top(
        &mut self,
        committed: &mut FxHashMap<RvKey, Variable>,
    ) -> Result<(), InferError> {
        let top = self
            .layers
            .pop()
            .ok_or_else(|| InferError::Internal("commit with no active diff layer".into()))?;
        match self.layers.last_mut() {
            Some(below) => {
                for (key, entry) in top.vars {
                    if top.fresh.contains(&key) && !below.vars.contains_key(&key) {
                        below.fresh.insert(key.clone());
                    }
                    below.vars.insert(key, entry);
                }
            }
            None => {
                for (key, (var, _)) in top.vars {
                    committed.insert(key, var);
                }
            }
        }
        Ok(())
    }

    /// Discards the top layer entirely and retires its id.
    ///
    /// After this call, lookups observe exactly the state as if the layer
    /// had never been pushed.
    pub fn rollback_top(&mut self) -> Result<(), InferError> {
        let top = self
            .layers
            .pop()
            .ok_or_else(|| InferError::Internal("rollback with no active diff layer".into()))?;
        self.retired.insert(top.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{Distribution, Value};
    use crate::world::transforms::TransformSeq;
    use crate::world::variable::FnId;

    fn rec(x: f64) -> Variable {
        Variable::new(
            Distribution::Normal { mean: 0.0, std: 1.0 },
            Value::Real(x),
            TransformSeq::identity(),
        )
        .unwrap()
    }

    fn key(i: u32) -> RvKey {
        RvKey::plain(FnId(i))
    }

    #[test]
    fn lookup_resolves_top_down() {
        let mut stack = DiffStack::new();
        stack.push_layer();
        stack.write(key(1), rec(1.0), false).unwrap();
        stack.push_layer();
        stack.write(key(1), rec(2.0), false).unwrap();

        let found = stack.get_node(&key(1)).unwrap().unwrap();
        assert_eq!(found.value, Value::Real(2.0));
    }

    #[test]
    fn layering_visibility_and_rollback() {
        // Write A in the first layer, B in the second; A is visible from
        // level 0 upward, B only from level 1.
        let mut stack = DiffStack::new();
        stack.push_layer();
        stack.write(key(1), rec(1.0), true).unwrap();
        stack.push_layer();
        stack.write(key(2), rec(2.0), true).unwrap();

        assert!(stack.contains_node_from(0, &key(1)));
        assert!(!stack.layer(1).unwrap().contains_node(&key(1)));
        assert!(stack.contains_node_from(1, &key(2)));
        assert!(!stack.layer(0).unwrap().contains_node(&key(2)));

        stack.rollback_top().unwrap();
        assert!(stack.get_node(&key(2)).unwrap().is_none());
        assert!(stack.get_node(&key(1)).unwrap().is_some());
    }

    #[test]
    fn commit_top_merges_into_layer_below() {
        let mut stack = DiffStack::new();
        let mut committed = FxHashMap::default();
        stack.push_layer();
        stack.write(key(1), rec(1.0), false).unwrap();
        stack.push_layer();
        stack.write(key(1), rec(5.0), false).unwrap();
        stack.write(key(2), rec(2.0), true).unwrap();

        stack.commit_top(&mut committed).unwrap();
        assert_eq!(stack.depth(), 1);
        assert!(committed.is_empty());
        let top = stack.layer(0).unwrap();
        assert_eq!(top.get(&key(1)).unwrap().value, Value::Real(5.0));
        assert!(top.is_fresh(&key(2)));

        stack.commit_top(&mut committed).unwrap();
        assert_eq!(stack.depth(), 0);
        assert_eq!(committed[&key(1)].value, Value::Real(5.0));
        assert_eq!(committed[&key(2)].value, Value::Real(2.0));
    }

    #[test]
    fn committed_records_stay_live_after_unrelated_rollback() {
        let mut stack = DiffStack::new();
        let mut committed = FxHashMap::default();
        stack.push_layer();
        stack.write(key(1), rec(1.0), false).unwrap();
        stack.push_layer();
        stack.commit_top(&mut committed).unwrap();
        // key(1)'s origin layer was committed downward, not rolled back.
        assert!(stack.get_node(&key(1)).unwrap().is_some());
        stack.rollback_top().unwrap();
        assert!(stack.get_node(&key(1)).unwrap().is_none());
    }

    #[test]
    fn stack_misuse_is_an_internal_error() {
        let mut stack = DiffStack::new();
        let mut committed = FxHashMap::default();
        assert!(matches!(
            stack.write(key(1), rec(0.0), false),
            Err(InferError::Internal(_))
        ));
        assert!(stack.commit_top(&mut committed).is_err());
        assert!(stack.rollback_top().is_err());
    }
}
