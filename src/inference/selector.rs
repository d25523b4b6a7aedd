//! Proposer selection.
//!
//! Maps a variable's distribution family and support to the best-matching
//! proposal kernel, honoring explicit per-function overrides, and memoizes
//! the choice per variable identity for the duration of a chain run.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::dist::{Family, Support, SupportClass};
use crate::errors::InferError;
use crate::inference::proposers::{
    AncestralProposer, HamiltonianProposer, NewtonianProposer, Proposer, UniformProposer,
};
use crate::world::variable::{FnId, RvKey, Variable};

/// Opt-in Hamiltonian settings for continuous variables.
///
/// When present, continuous differentiable variables get the Hamiltonian
/// kernel with these parameters instead of the Newtonian default.
#[derive(Debug, Clone, Copy)]
pub struct HamiltonianSettings {
    pub step_size: f64,
    pub num_steps: usize,
}

/// Selects one proposal kernel per variable.
///
/// Rule order: explicit override for the producing function wins
/// unconditionally; otherwise the distribution's [`SupportClass`] decides.
/// Choices are cached per variable identity; a cached entry is invalidated
/// when the underlying family changes between model instantiations.
#[derive(Default)]
pub struct ProposerSelector {
    overrides: FxHashMap<FnId, Arc<dyn Proposer>>,
    hamiltonian: Option<HamiltonianSettings>,
    cache: FxHashMap<RvKey, (Family, Arc<dyn Proposer>)>,
}

impl ProposerSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an explicit proposer for every variable produced by
    /// `fn_id`. Highest priority; no support inspection happens for it.
    pub fn set_override(&mut self, fn_id: FnId, proposer: Arc<dyn Proposer>) {
        self.overrides.insert(fn_id, proposer);
    }

    pub fn with_override(mut self, fn_id: FnId, proposer: Arc<dyn Proposer>) -> Self {
        self.set_override(fn_id, proposer);
        self
    }

    /// Switches continuous variables from the Newtonian default to the
    /// Hamiltonian kernel.
    pub fn enable_hamiltonian(&mut self, settings: HamiltonianSettings) {
        self.hamiltonian = Some(settings);
    }

    /// Drops all memoized choices, e.g. between fully different model
    /// instantiations.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Selects the kernel for `key` given its current record.
    pub fn select(
        &mut self,
        key: &RvKey,
        var: &Variable,
    ) -> Result<Arc<dyn Proposer>, InferError> {
        if let Some(p) = self.overrides.get(&key.fn_id) {
            return Ok(Arc::clone(p));
        }

        let family = var.distribution.family();
        if let Some((cached_family, p)) = self.cache.get(key) {
            if *cached_family == family {
                return Ok(Arc::clone(p));
            }
            // Family changed under the same identity; the memoized choice
            // no longer applies.
        }

        let chosen = self.classify(key, var)?;
        self.cache.insert(key.clone(), (family, Arc::clone(&chosen)));
        Ok(chosen)
    }

    fn classify(&self, key: &RvKey, var: &Variable) -> Result<Arc<dyn Proposer>, InferError> {
        match var.distribution.support_class() {
            SupportClass::UnorderedDiscrete => {
                if matches!(var.distribution.support(), Support::Labels { k: 0 }) {
                    return Err(InferError::UnsupportedDistribution {
                        key: key.clone(),
                        reason: "empty label support".into(),
                    });
                }
                Ok(Arc::new(UniformProposer))
            }
            SupportClass::ContinuousUnconstrained
            | SupportClass::ContinuousBounded
            | SupportClass::Simplex => {
                if matches!(var.distribution.support(), Support::Simplex { k } if k < 2) {
                    return Err(InferError::UnsupportedDistribution {
                        key: key.clone(),
                        reason: "degenerate simplex support".into(),
                    });
                }
                match self.hamiltonian {
                    Some(s) => Ok(Arc::new(HamiltonianProposer::new(s.step_size, s.num_steps))),
                    None => Ok(Arc::new(NewtonianProposer)),
                }
            }
            SupportClass::OrderedDiscrete => Ok(Arc::new(AncestralProposer)),
        }
    }
}
