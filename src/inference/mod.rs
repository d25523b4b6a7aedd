//! Block Metropolis-Hastings: kernels, kernel selection, block
//! construction, proposal scoring, and the sweep driver.

pub mod blocks;
pub mod compositional;
pub mod proposers;
pub mod scorer;
pub mod selector;

pub use blocks::{process_blocks, Block, BlockType, Grouping};
pub use compositional::{CompositionalInference, InferenceConfig, Samples};
pub use proposers::{
    AncestralProposer, HamiltonianProposer, NewtonianProposer, Proposal, Proposer,
    UniformProposer,
};
pub use scorer::{block_propose_change, BlockProposal, ProposalAux};
pub use selector::{HamiltonianSettings, ProposerSelector};
