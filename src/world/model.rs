//! The model-evaluation collaborator contract.
//!
//! The engine never executes probabilistic programs itself; it asks the
//! model for a variable's distribution, handing it a [`ParentResolver`]
//! through which parent values are read. Every `value_of` call is recorded
//! as a dependency edge, so the world's graph is discovered lazily as the
//! model evaluates.

use crate::dist::{Distribution, Value};
use crate::errors::InferError;
use crate::world::variable::RvKey;

/// Resolves parent values on behalf of a model evaluation.
///
/// During world construction, missing parents are instantiated on demand;
/// during block scoring, a missing parent is an [`InferError::UnknownVariable`].
pub trait ParentResolver {
    /// Current value of `key`, recording the dependency edge to the
    /// variable being evaluated.
    fn value_of(&mut self, key: &RvKey) -> Result<Value, InferError>;
}

/// A probabilistic model, viewed by the engine as an opaque callable from a
/// variable identity to its distribution given current parent values.
pub trait Model {
    /// Evaluates the distribution of `key`.
    ///
    /// Implementations read whatever parents they need through `parents`;
    /// the engine treats those reads as the variable's dependency set.
    fn evaluate(
        &self,
        key: &RvKey,
        parents: &mut dyn ParentResolver,
    ) -> Result<Distribution, InferError>;
}
