//! Variable identity and per-version variable records.

use std::fmt;

use smallvec::SmallVec;

use crate::dist::{Distribution, Value};
use crate::errors::InferError;
use crate::world::transforms::TransformSeq;

/// A unique identifier for a variable-producing function.
///
/// Model code declares one `FnId` per random-variable function; indexed
/// instances of the same function share the `FnId` and differ in their
/// call arguments.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FnId(pub u32);

/// Value-equality identity of one random variable instance.
///
/// Combines the producing function with its call arguments; two keys are
/// equal iff both match. Used as the mapping key throughout the world and
/// the diff stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RvKey {
    pub fn_id: FnId,
    pub args: SmallVec<[i64; 2]>,
}

impl RvKey {
    pub fn new(fn_id: FnId, args: impl IntoIterator<Item = i64>) -> Self {
        Self {
            fn_id,
            args: args.into_iter().collect(),
        }
    }

    /// Key for a zero-argument function.
    pub fn plain(fn_id: FnId) -> Self {
        Self {
            fn_id,
            args: SmallVec::new(),
        }
    }

    /// The same function instantiated at a different argument context.
    pub fn with_fn(&self, fn_id: FnId) -> Self {
        Self {
            fn_id,
            args: self.args.clone(),
        }
    }
}

impl fmt::Display for RvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}(", self.fn_id.0)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{a}")?;
        }
        write!(f, ")")
    }
}

/// Immutable-per-version snapshot of one random variable's state.
///
/// The four derived fields (`log_prob`, `transformed_value`, `jacobian`,
/// and the stored `transform`) are always consistent with `(distribution,
/// value)`: the only way to build or change a record is [`Variable::new`],
/// which recomputes them atomically.
#[derive(Debug, Clone)]
pub struct Variable {
    pub distribution: Distribution,
    pub value: Value,
    pub log_prob: f64,
    pub transformed_value: Value,
    pub transform: TransformSeq,
    pub jacobian: f64,
}

impl Variable {
    /// Builds a record from a distribution, a value in natural space, and
    /// the variable's resolved transform.
    ///
    /// Recomputes `log_prob`, `transformed_value`, and `jacobian` so the
    /// record invariant holds by construction.
    pub fn new(
        distribution: Distribution,
        value: Value,
        transform: TransformSeq,
    ) -> Result<Self, InferError> {
        let log_prob = distribution.log_prob(&value);
        let transformed_value = transform.forward(&value)?;
        let jacobian = transform.log_abs_det_jacobian(&value)?;
        Ok(Self {
            distribution,
            value,
            log_prob,
            transformed_value,
            transform,
            jacobian,
        })
    }

    /// Rebuilds this record with a new value, keeping distribution and
    /// transform.
    pub fn with_value(&self, value: Value) -> Result<Self, InferError> {
        Self::new(self.distribution.clone(), value, self.transform.clone())
    }

    /// Rebuilds this record with a re-evaluated distribution, keeping the
    /// current value and transform. Used when a parent's value changed.
    pub fn with_distribution(&self, distribution: Distribution) -> Result<Self, InferError> {
        Self::new(distribution, self.value.clone(), self.transform.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::transforms::{Transform, TransformSeq};

    #[test]
    fn keys_compare_by_function_and_args() {
        let a = RvKey::new(FnId(1), [0]);
        let b = RvKey::new(FnId(1), [0]);
        let c = RvKey::new(FnId(1), [1]);
        let d = RvKey::new(FnId(2), [0]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(format!("{a}"), "f1(0)");
    }

    #[test]
    fn record_fields_are_consistent_after_with_value() {
        let dist = Distribution::Gamma { shape: 2.0, rate: 2.0 };
        let t = TransformSeq::from_parts([Transform::Log]);
        let v = Variable::new(dist, Value::Real(1.5), t).unwrap();
        assert!((v.transformed_value.as_real().unwrap() - 1.5_f64.ln()).abs() < 1e-12);
        assert!((v.jacobian - (-(1.5_f64.ln()))).abs() < 1e-12);

        let v2 = v.with_value(Value::Real(3.0)).unwrap();
        assert!((v2.log_prob - v2.distribution.log_prob(&v2.value)).abs() < 1e-12);
        assert!((v2.transformed_value.as_real().unwrap() - 3.0_f64.ln()).abs() < 1e-12);
    }
}
