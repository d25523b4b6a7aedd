//! Bijective reparameterizations between a variable's natural support and
//! unconstrained space.
//!
//! Every variable carries a [`TransformSeq`] resolved at instantiation from
//! its [`TransformSpec`]: the canonical transform for the distribution's
//! support (`Default`), the identity (`None`), or a user-supplied
//! composition (`Custom`). Gradient-based proposers operate on the
//! transformed value and correct densities with the log-Jacobian.

use smallvec::SmallVec;

use crate::dist::math::{logit, sigmoid};
use crate::dist::{Distribution, Support, Value};
use crate::errors::InferError;

/// How a variable's transform is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransformType {
    /// Canonical transform for the distribution's support.
    #[default]
    Default,
    /// Identity transform regardless of support.
    None,
    /// User-supplied transforms, composed left to right.
    Custom,
}

/// Per-function transform configuration.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransformSpec {
    pub ty: TransformType,
    /// Only read when `ty == Custom`.
    pub custom: Vec<Transform>,
}

impl TransformSpec {
    pub fn custom(parts: impl IntoIterator<Item = Transform>) -> Self {
        Self {
            ty: TransformType::Custom,
            custom: parts.into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            ty: TransformType::None,
            custom: Vec::new(),
        }
    }

    /// Resolves this spec against a concrete distribution.
    pub fn resolve(&self, distribution: &Distribution) -> TransformSeq {
        match self.ty {
            TransformType::Default => default_transforms(distribution),
            TransformType::None => TransformSeq::identity(),
            TransformType::Custom => TransformSeq {
                parts: self.custom.iter().cloned().collect(),
            },
        }
    }
}

/// A single bijective transform.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Transform {
    Identity,
    /// x ↦ ln x, for positive support.
    Log,
    /// x ↦ loc + scale · x.
    Affine { loc: f64, scale: f64 },
    /// x ↦ ln(x / (1−x)), for unit-interval support.
    Logit,
    /// Unit-interval transform for the Beta family: the Beta's value and
    /// its complement form a two-component simplex, and this unconstrains
    /// the single free stick coordinate (numerically the logit, kept as a
    /// distinct variant so Beta resolution is observable).
    BetaShape,
    /// k-simplex ↦ ℝ^(k−1) stick-breaking.
    StickBreaking,
}

impl Transform {
    fn forward_scalar(&self, x: f64) -> Result<f64, InferError> {
        Ok(match self {
            Transform::Identity => x,
            Transform::Log => {
                if x <= 0.0 {
                    return Err(domain_err("log", x));
                }
                x.ln()
            }
            Transform::Affine { loc, scale } => loc + scale * x,
            Transform::Logit | Transform::BetaShape => {
                if x <= 0.0 || x >= 1.0 {
                    return Err(domain_err("logit", x));
                }
                logit(x)
            }
            Transform::StickBreaking => {
                return Err(InferError::Numerical(
                    "stick-breaking transform applied to a scalar".into(),
                ))
            }
        })
    }

    fn inverse_scalar(&self, y: f64) -> Result<f64, InferError> {
        Ok(match self {
            Transform::Identity => y,
            Transform::Log => y.exp(),
            Transform::Affine { loc, scale } => (y - loc) / scale,
            Transform::Logit | Transform::BetaShape => sigmoid(y),
            Transform::StickBreaking => {
                return Err(InferError::Numerical(
                    "stick-breaking transform applied to a scalar".into(),
                ))
            }
        })
    }

    /// log|dT/dx| at a scalar natural-space point.
    fn log_abs_det_scalar(&self, x: f64) -> Result<f64, InferError> {
        Ok(match self {
            Transform::Identity => 0.0,
            Transform::Log => {
                if x <= 0.0 {
                    return Err(domain_err("log", x));
                }
                -x.ln()
            }
            Transform::Affine { scale, .. } => scale.abs().ln(),
            Transform::Logit | Transform::BetaShape => {
                if x <= 0.0 || x >= 1.0 {
                    return Err(domain_err("logit", x));
                }
                -x.ln() - (1.0 - x).ln()
            }
            Transform::StickBreaking => {
                return Err(InferError::Numerical(
                    "stick-breaking transform applied to a scalar".into(),
                ))
            }
        })
    }

    pub fn forward(&self, value: &Value) -> Result<Value, InferError> {
        match (self, value) {
            (Transform::StickBreaking, Value::Vector(x)) => {
                Ok(Value::Vector(stick_breaking_forward(x)?))
            }
            (_, Value::Real(x)) => Ok(Value::Real(self.forward_scalar(*x)?)),
            (_, Value::Vector(x)) => {
                let mut out = Vec::with_capacity(x.len());
                for xi in x {
                    out.push(self.forward_scalar(*xi)?);
                }
                Ok(Value::Vector(out))
            }
            // Discrete values only ever carry the identity.
            (Transform::Identity, v) => Ok(v.clone()),
            (t, v) => Err(InferError::Numerical(format!(
                "transform {t:?} applied to {} value",
                v.kind()
            ))),
        }
    }

    pub fn inverse(&self, value: &Value) -> Result<Value, InferError> {
        match (self, value) {
            (Transform::StickBreaking, Value::Vector(y)) => {
                Ok(Value::Vector(stick_breaking_inverse(y)))
            }
            (_, Value::Real(y)) => Ok(Value::Real(self.inverse_scalar(*y)?)),
            (_, Value::Vector(y)) => {
                let mut out = Vec::with_capacity(y.len());
                for yi in y {
                    out.push(self.inverse_scalar(*yi)?);
                }
                Ok(Value::Vector(out))
            }
            (Transform::Identity, v) => Ok(v.clone()),
            (t, v) => Err(InferError::Numerical(format!(
                "transform {t:?} inverted on {} value",
                v.kind()
            ))),
        }
    }

    /// log|det dT/dx| evaluated at a natural-space value.
    pub fn log_abs_det_jacobian(&self, value: &Value) -> Result<f64, InferError> {
        match (self, value) {
            (Transform::StickBreaking, Value::Vector(x)) => stick_breaking_log_abs_det(x),
            (_, Value::Real(x)) => self.log_abs_det_scalar(*x),
            (_, Value::Vector(x)) => {
                let mut total = 0.0;
                for xi in x {
                    total += self.log_abs_det_scalar(*xi)?;
                }
                Ok(total)
            }
            (Transform::Identity, _) => Ok(0.0),
            (t, v) => Err(InferError::Numerical(format!(
                "transform {t:?} jacobian on {} value",
                v.kind()
            ))),
        }
    }
}

fn domain_err(name: &str, x: f64) -> InferError {
    InferError::Numerical(format!("{name} transform outside domain: {x}"))
}

/// Stick-breaking forward map: simplex of length k to ℝ^(k−1).
///
/// y_i = logit(x_i / rem_i) + ln(k − 1 − i), with rem_i the mass left after
/// the first i coordinates. The additive offset centers a uniform simplex
/// at the origin.
fn stick_breaking_forward(x: &[f64]) -> Result<Vec<f64>, InferError> {
    let k = x.len();
    if k < 2 {
        return Err(InferError::Numerical(format!(
            "stick-breaking needs a simplex of length >= 2, got {k}"
        )));
    }
    let mut y = Vec::with_capacity(k - 1);
    let mut rem = 1.0;
    for (i, xi) in x.iter().take(k - 1).enumerate() {
        let z = xi / rem;
        if z <= 0.0 || z >= 1.0 {
            return Err(domain_err("stick-breaking", *xi));
        }
        y.push(logit(z) + ((k - 1 - i) as f64).ln());
        rem -= xi;
    }
    Ok(y)
}

/// Inverse stick-breaking: ℝ^(k−1) to a simplex of length k.
fn stick_breaking_inverse(y: &[f64]) -> Vec<f64> {
    let k = y.len() + 1;
    let mut x = Vec::with_capacity(k);
    let mut rem = 1.0;
    for (i, yi) in y.iter().enumerate() {
        let z = sigmoid(yi - ((k - 1 - i) as f64).ln());
        let xi = rem * z;
        x.push(xi);
        rem -= xi;
    }
    x.push(rem.max(0.0));
    x
}

/// Forward log-Jacobian determinant of stick-breaking at a simplex point.
fn stick_breaking_log_abs_det(x: &[f64]) -> Result<f64, InferError> {
    let k = x.len();
    if k < 2 {
        return Err(InferError::Numerical(format!(
            "stick-breaking needs a simplex of length >= 2, got {k}"
        )));
    }
    // The inverse-map log-det is Σ ln z_i + ln(1−z_i) + ln rem_i; forward
    // is its negation.
    let mut total = 0.0;
    let mut rem = 1.0;
    for xi in x.iter().take(k - 1) {
        let z = xi / rem;
        if z <= 0.0 || z >= 1.0 {
            return Err(domain_err("stick-breaking", *xi));
        }
        total += z.ln() + (1.0 - z).ln() + rem.ln();
        rem -= xi;
    }
    Ok(-total)
}

/// An ordered composition of transforms, applied left to right.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransformSeq {
    parts: SmallVec<[Transform; 2]>,
}

impl TransformSeq {
    /// The empty composition (identity).
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: impl IntoIterator<Item = Transform>) -> Self {
        Self {
            parts: parts.into_iter().collect(),
        }
    }

    pub fn parts(&self) -> &[Transform] {
        &self.parts
    }

    pub fn is_identity(&self) -> bool {
        self.parts.is_empty() || self.parts.iter().all(|t| *t == Transform::Identity)
    }

    pub fn forward(&self, value: &Value) -> Result<Value, InferError> {
        let mut cur = value.clone();
        for t in &self.parts {
            cur = t.forward(&cur)?;
        }
        Ok(cur)
    }

    pub fn inverse(&self, value: &Value) -> Result<Value, InferError> {
        let mut cur = value.clone();
        for t in self.parts.iter().rev() {
            cur = t.inverse(&cur)?;
        }
        Ok(cur)
    }

    /// log|det dT/dx| of the whole composition at a natural-space value,
    /// chained through the intermediate spaces.
    pub fn log_abs_det_jacobian(&self, value: &Value) -> Result<f64, InferError> {
        let mut cur = value.clone();
        let mut total = 0.0;
        for t in &self.parts {
            total += t.log_abs_det_jacobian(&cur)?;
            cur = t.forward(&cur)?;
        }
        Ok(total)
    }
}

/// Canonical transform sequence for a distribution's support.
///
/// Positive reals get the log map, bounded intervals an affine-to-unit map
/// composed with the logit, the Beta's unit interval its specialized
/// transform, simplexes stick-breaking, and everything unconstrained or
/// discrete the identity.
pub fn default_transforms(distribution: &Distribution) -> TransformSeq {
    match distribution.support() {
        Support::Positive => TransformSeq::from_parts([Transform::Log]),
        Support::UnitInterval => TransformSeq::from_parts([Transform::BetaShape]),
        Support::Interval { low, high } => {
            let range = high - low;
            TransformSeq::from_parts([
                Transform::Affine {
                    loc: -low / range,
                    scale: 1.0 / range,
                },
                Transform::Logit,
            ])
        }
        Support::Simplex { .. } => TransformSeq::from_parts([Transform::StickBreaking]),
        Support::Real | Support::Labels { .. } | Support::Counts => TransformSeq::identity(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_transform_over_positive_support() {
        let dist = Distribution::Gamma { shape: 2.0, rate: 2.0 };
        let seq = default_transforms(&dist);
        assert_eq!(seq.parts(), &[Transform::Log]);
        let v = Value::Real(2.5);
        let y = seq.forward(&v).unwrap();
        assert!((y.as_real().unwrap() - 2.5_f64.ln()).abs() < 1e-12);
        assert!((seq.log_abs_det_jacobian(&v).unwrap() + 2.5_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn identity_seq_is_a_no_op() {
        let seq = TransformSeq::identity();
        let v = Value::Real(1.25);
        assert_eq!(seq.forward(&v).unwrap(), v);
        assert_eq!(seq.log_abs_det_jacobian(&v).unwrap(), 0.0);
        assert!(seq.is_identity());
    }

    #[test]
    fn custom_single_transform_equals_that_transform() {
        let seq = TransformSeq::from_parts([Transform::Affine { loc: 1.0, scale: 2.0 }]);
        let v = Value::Real(3.0);
        assert_eq!(seq.forward(&v).unwrap(), Value::Real(7.0));
        assert!((seq.log_abs_det_jacobian(&v).unwrap() - 2.0_f64.ln()).abs() < 1e-12);
        assert_eq!(seq.inverse(&Value::Real(7.0)).unwrap(), Value::Real(3.0));
    }

    #[test]
    fn interval_default_composes_affine_and_logit() {
        let dist = Distribution::Uniform { low: 1.0, high: 3.0 };
        let seq = default_transforms(&dist);
        assert_eq!(seq.parts().len(), 2);
        let v = Value::Real(2.0);
        // Midpoint maps to logit(0.5) = 0.
        let y = seq.forward(&v).unwrap();
        assert!(y.as_real().unwrap().abs() < 1e-12);
        let back = seq.inverse(&y).unwrap();
        assert!((back.as_real().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn beta_gets_its_specialized_transform() {
        let dist = Distribution::Beta { alpha: 1.0, beta: 1.0 };
        let seq = default_transforms(&dist);
        assert_eq!(seq.parts(), &[Transform::BetaShape]);
    }

    #[test]
    fn stick_breaking_round_trips_on_the_simplex() {
        let seq = default_transforms(&Distribution::Dirichlet {
            concentration: vec![0.1, 0.9, 2.0],
        });
        let x = Value::Vector(vec![0.2, 0.3, 0.5]);
        let y = seq.forward(&x).unwrap();
        assert_eq!(y.as_vector().unwrap().len(), 2);
        let back = seq.inverse(&y).unwrap();
        for (a, b) in back
            .as_vector()
            .unwrap()
            .iter()
            .zip(x.as_vector().unwrap())
        {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn uniform_simplex_maps_near_origin() {
        // The ln(k-1-i) offsets center the uniform simplex at y = 0.
        let seq = TransformSeq::from_parts([Transform::StickBreaking]);
        let x = Value::Vector(vec![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]);
        let y = seq.forward(&x).unwrap();
        for yi in y.as_vector().unwrap() {
            assert!(yi.abs() < 1e-10);
        }
    }

    #[test]
    fn discrete_support_resolves_to_identity() {
        for dist in [
            Distribution::Categorical {
                weights: vec![1.0, 1.0],
            },
            Distribution::Poisson { rate: 2.0 },
            Distribution::Bernoulli { p: 0.5 },
        ] {
            assert!(default_transforms(&dist).is_identity());
        }
    }

    #[test]
    fn transform_outside_domain_is_a_numerical_error() {
        let seq = TransformSeq::from_parts([Transform::Log]);
        assert!(matches!(
            seq.forward(&Value::Real(-1.0)),
            Err(InferError::Numerical(_))
        ));
    }
}
