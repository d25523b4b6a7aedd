//! # blockmc - Compositional Block MCMC
//!
//! blockmc runs single-site and block Metropolis-Hastings over
//! probabilistic models whose dependency structure is discovered lazily:
//! the model is a function from variable identity to distribution, and
//! edges appear as the model reads its parents.
//!
//! ## Architecture
//!
//! The system is organized into several modules:
//!
//! - **dist**: Distributions, values, supports, and log-density math
//! - **world**: Committed variable records, the copy-on-write diff stack,
//!   reparameterizing transforms, and model instantiation
//! - **inference**: Proposal kernels, per-variable kernel selection, block
//!   construction, proposal scoring, and the sweep driver
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blockmc::{CompositionalInference, InferenceConfig, Model, RvKey, FnId};
//!
//! let config = InferenceConfig::new().with_grouping(vec![FnId(1), FnId(2)]);
//! let mut engine = CompositionalInference::with_config(MyModel, config);
//! let samples = engine.infer(&queries, observations, 1000, 42)?;
//! ```

#![forbid(unsafe_code)]

pub mod dist;
pub mod errors;
pub mod inference;
pub mod world;

// Re-export the types most callers need
pub use dist::{Distribution, Support, SupportClass, Value};
pub use errors::InferError;
pub use inference::{
    CompositionalInference, HamiltonianSettings, InferenceConfig, Proposer, ProposerSelector,
    Samples,
};
pub use world::{
    FnId, Model, ParentResolver, RvKey, Transform, TransformConfig, TransformSpec,
    TransformType, Variable, World,
};
