//! Error types for world construction and inference.

use thiserror::Error;

use crate::world::variable::RvKey;

/// Errors that can occur during world construction, block building, or
/// block proposal.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking changes.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum InferError {
    /// A variable lookup missed both the diff stack and the committed world.
    ///
    /// Always a caller bug: the key was never instantiated, or the caller is
    /// holding a key from a different model. Never retried.
    #[error("unknown variable: {0}")]
    UnknownVariable(RvKey),

    /// The proposer selector could not classify a variable's distribution.
    ///
    /// Fatal for that variable; must be surfaced to the model author.
    #[error("unsupported distribution for {key}: {reason}")]
    UnsupportedDistribution { key: RvKey, reason: String },

    /// A parent lookup resolved to a record written by a diff layer that has
    /// since been rolled back.
    ///
    /// Indicates an engine bug in diff-stack layering, not a user error.
    #[error("stale dependency: {0} resolved from a discarded diff layer")]
    StaleDependency(RvKey),

    /// A gradient-based proposer produced a non-finite value or density.
    ///
    /// Recoverable: the scorer converts this into a rejection signal rather
    /// than propagating it to the driver.
    #[error("proposal divergence at {0}")]
    ProposalDivergence(RvKey),

    /// A variable's distribution transitively depends on the variable itself.
    ///
    /// Detected during world construction; fatal configuration error.
    #[error("cyclic dependency through {0}")]
    CyclicDependency(RvKey),

    /// Numerical stability error.
    ///
    /// NaN or Inf outside a proposal context, invalid distribution
    /// parameters, or a transform applied outside its domain.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Unexpected internal condition.
    ///
    /// Used only for engine invariant violations, not user errors.
    #[error("internal error: {0}")]
    Internal(String),
}
