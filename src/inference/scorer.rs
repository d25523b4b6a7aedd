//! Block propose-and-score protocol.
//!
//! For one block, proposes a new value for every member inside fresh diff
//! layers, recomputes the log-probabilities of dependent children against
//! the updated parent values, and reports the log-probability deltas the
//! driver needs for the Metropolis-Hastings acceptance decision.
//!
//! Layering policy: one layer is pushed per block member, so a sequential
//! block spans as many layers as it has members; each member's children are
//! recomputed in that member's layer. The driver commits or rolls back the
//! whole layer set atomically.

use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashSet;

use crate::errors::InferError;
use crate::inference::blocks::Block;
use crate::inference::selector::ProposerSelector;
use crate::world::model::Model;
use crate::world::variable::RvKey;
use crate::world::world::World;

/// Auxiliary proposal-probability terms for non-symmetric kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalAux {
    /// Σ log q(new | old) over block members.
    pub forward_log_prob: f64,
    /// Σ log q(old | new) over block members.
    pub reverse_log_prob: f64,
}

/// Outcome of one block proposal.
#[derive(Debug, Clone)]
pub enum BlockProposal {
    /// The proposal completed; the driver decides acceptance and then
    /// commits or rolls back exactly `layers` diff layers.
    Scored {
        /// Σ over members of (proposed log_prob − committed log_prob).
        node_log_updates: f64,
        /// The analogous sum over recomputed children, members excluded.
        children_log_updates: f64,
        aux: ProposalAux,
        layers: usize,
    },
    /// A gradient kernel produced a non-finite value. The scorer has
    /// already rolled its layers back; the driver treats the block as
    /// rejected and moves on.
    Diverged,
}

/// Proposes and scores one block.
///
/// On any hard error the layers pushed so far are rolled back before the
/// error surfaces, so the world is observationally unchanged. Divergence is
/// not a hard error: it is reported as [`BlockProposal::Diverged`].
pub fn block_propose_change<M: Model>(
    world: &mut World,
    model: &M,
    selector: &mut ProposerSelector,
    block: &Block,
    rng: &mut ChaCha8Rng,
) -> Result<BlockProposal, InferError> {
    let members: Vec<RvKey> = block
        .member_keys()
        .into_iter()
        .filter(|k| world.contains_node(k) && !world.is_observed(k))
        .collect();
    if members.is_empty() {
        return Err(InferError::UnknownVariable(block.first_node.clone()));
    }

    let mut pushed = 0usize;
    match propose_members(world, model, selector, &members, rng, &mut pushed) {
        Ok(outcome) => Ok(outcome),
        Err(InferError::ProposalDivergence(key)) => {
            world.rollback_layers(pushed)?;
            #[cfg(feature = "tracing")]
            tracing::debug!(%key, "block proposal diverged");
            let _ = key;
            Ok(BlockProposal::Diverged)
        }
        Err(e) => {
            world.rollback_layers(pushed)?;
            Err(e)
        }
    }
}

fn propose_members<M: Model>(
    world: &mut World,
    model: &M,
    selector: &mut ProposerSelector,
    members: &[RvKey],
    rng: &mut ChaCha8Rng,
    pushed: &mut usize,
) -> Result<BlockProposal, InferError> {
    let member_set: FxHashSet<&RvKey> = members.iter().collect();
    let mut touched_children: Vec<RvKey> = Vec::new();
    let mut touched_set: FxHashSet<RvKey> = FxHashSet::default();
    let mut aux = ProposalAux::default();

    for member in members {
        world.push_layer();
        *pushed += 1;

        // Earlier members of a sequential block may be parents of this
        // one; refresh the distribution against the diff-stack state
        // before proposing.
        let dist = world.eval_distribution(model, member)?;
        let refreshed = world.get_node(member)?.with_distribution(dist)?;

        let proposer = selector.select(member, &refreshed)?;
        let proposal = proposer.propose(member, &refreshed, world, rng)?;
        let updated = refreshed.with_value(proposal.value)?;
        if updated.log_prob.is_nan() {
            return Err(InferError::ProposalDivergence(member.clone()));
        }
        aux.forward_log_prob += proposal.forward_log_prob;
        aux.reverse_log_prob += proposal.reverse_log_prob;
        world.write_proposed(member.clone(), updated)?;

        // Children's values are unchanged, only their distributions move,
        // so grandchildren are unaffected: immediate children are the
        // whole affected set.
        for child in world.children_sorted(member) {
            if member_set.contains(&child) {
                continue;
            }
            let child_dist = world.eval_distribution(model, &child)?;
            let rec = world.get_node(&child)?.with_distribution(child_dist)?;
            if rec.log_prob.is_nan() {
                return Err(InferError::ProposalDivergence(child.clone()));
            }
            world.write_proposed(child.clone(), rec)?;
            if touched_set.insert(child.clone()) {
                touched_children.push(child);
            }
        }
    }

    let mut node_log_updates = 0.0;
    for m in members {
        node_log_updates += world.get_node(m)?.log_prob - world.committed_node(m)?.log_prob;
    }
    let mut children_log_updates = 0.0;
    for c in &touched_children {
        children_log_updates += world.get_node(c)?.log_prob - world.committed_node(c)?.log_prob;
    }

    Ok(BlockProposal::Scored {
        node_log_updates,
        children_log_updates,
        aux,
        layers: *pushed,
    })
}
