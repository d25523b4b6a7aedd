//! World state: variable records, transforms, the committed mapping, and
//! the diff stack of uncommitted proposal layers.

pub mod diff_stack;
pub mod model;
pub mod transforms;
pub mod variable;
#[allow(clippy::module_inception)]
pub mod world;

pub use diff_stack::{DiffLayer, DiffStack, LayerId};
pub use model::{Model, ParentResolver};
pub use transforms::{default_transforms, Transform, TransformSeq, TransformSpec, TransformType};
pub use variable::{FnId, RvKey, Variable};
pub use world::{TransformConfig, World};
