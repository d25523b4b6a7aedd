//! Update-block derivation.
//!
//! Each inference iteration partitions the queried variables into blocks:
//! singletons for independently-updated variables, and sequential blocks
//! for user-declared groupings that must be resampled jointly. Partitioning
//! is deterministic given fixed queries, observations, and groupings, so
//! chains are reproducible and testable.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::world::variable::{FnId, RvKey};
use crate::world::world::World;

/// How a block's members are updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// One variable, proposed alone.
    SingleNode,
    /// A declared ordered grouping, proposed member by member in one
    /// transaction.
    Sequential,
}

/// One update block.
///
/// `first_node` is the entry-point identity used for proposer lookup and
/// grouping; `block` lists the producing functions of every member (head
/// included, in declared order) for sequential blocks, and is empty for
/// single-node blocks. Members are instantiated at `first_node`'s argument
/// context.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub first_node: RvKey,
    pub kind: BlockType,
    pub block: Vec<FnId>,
}

impl Block {
    pub fn single(first_node: RvKey) -> Self {
        Self {
            first_node,
            kind: BlockType::SingleNode,
            block: Vec::new(),
        }
    }

    pub fn sequential(first_node: RvKey, fns: Vec<FnId>) -> Self {
        Self {
            first_node,
            kind: BlockType::Sequential,
            block: fns,
        }
    }

    /// Concrete member keys, in update order, at the head's argument
    /// context. Single-node blocks yield just the head.
    pub fn member_keys(&self) -> Vec<RvKey> {
        if self.block.is_empty() {
            return vec![self.first_node.clone()];
        }
        let mut out = Vec::with_capacity(self.block.len());
        for f in &self.block {
            let key = self.first_node.with_fn(*f);
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }
}

/// An ordered list of producing functions resampled jointly. The first
/// function is the grouping's head.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping(pub Vec<FnId>);

/// Derives the update blocks for one inference iteration.
///
/// Queried instances are expanded to every concrete identity of their
/// producing function present in the world, in stable sorted order.
/// A grouping-head instance yields a sequential block covering the whole
/// grouping at its argument context; instances covered by a grouping never
/// head a block of their own; everything else yields a single-node block.
/// Observed variables are never resampled and get no block.
pub fn process_blocks(world: &World, groupings: &[Grouping]) -> Vec<Block> {
    let mut head_of: FxHashMap<FnId, &Grouping> = FxHashMap::default();
    let mut grouped: FxHashSet<FnId> = FxHashSet::default();
    for g in groupings {
        if let Some(head) = g.0.first() {
            head_of.insert(*head, g);
        }
        for f in &g.0 {
            grouped.insert(*f);
        }
    }

    // Expand queries to concrete instances, preserving query order and
    // deduplicating repeated functions.
    let mut instances: Vec<RvKey> = Vec::new();
    let mut seen: FxHashSet<RvKey> = FxHashSet::default();
    for q in world.queries() {
        for key in world.keys_for_fn(q.fn_id) {
            if seen.insert(key.clone()) {
                instances.push(key);
            }
        }
    }

    let mut covered: FxHashSet<RvKey> = FxHashSet::default();
    let mut blocks = Vec::new();
    for key in instances {
        if world.is_observed(&key) || covered.contains(&key) {
            continue;
        }
        if let Some(g) = head_of.get(&key.fn_id) {
            for f in &g.0 {
                covered.insert(key.with_fn(*f));
            }
            blocks.push(Block::sequential(key, g.0.clone()));
        } else if grouped.contains(&key.fn_id) {
            // Non-head member of a grouping: updated inside its sequential
            // block, never as a head of its own.
            covered.insert(key);
        } else {
            blocks.push(Block::single(key));
        }
    }
    blocks
}
