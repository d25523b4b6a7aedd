//! # Distribution families
//!
//! This module implements the closed set of distribution families the engine
//! understands. Proposer selection and transform resolution never inspect an
//! open-ended distribution object at runtime; they dispatch on the fixed
//! [`SupportClass`] tag decided once per family.
//!
//! ## Key Components
//!
//! - **Value**: a sampled value in a variable's natural (possibly
//!   constrained) space
//! - **Distribution**: tagged-variant distribution with `log_prob` and
//!   `sample`
//! - **Support** / **SupportClass**: fine-grained support description and
//!   the five-way classification used by the proposer selector

pub mod math;

use rand::Rng;
use rand_distr::Distribution as RandDistribution;

use crate::errors::InferError;
use math::{ln_beta, ln_gamma, normal_log_pdf};

/// A sampled value in a variable's natural space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Scalar real value.
    Real(f64),
    /// Vector value (simplex coordinates, stick-breaking outputs).
    Vector(Vec<f64>),
    /// Integer value (category index, count).
    Int(i64),
    /// Boolean value (Bernoulli outcome).
    Bool(bool),
}

impl Value {
    /// Short kind name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Real(_) => "real",
            Value::Vector(_) => "vector",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// True if every numeric component is finite.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Real(v) => v.is_finite(),
            Value::Vector(v) => v.iter().all(|x| x.is_finite()),
            Value::Int(_) | Value::Bool(_) => true,
        }
    }
}

/// Fine-grained support description, used for transform resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Support {
    /// The whole real line.
    Real,
    /// Positive reals (0, ∞).
    Positive,
    /// The open unit interval (0, 1).
    UnitInterval,
    /// A bounded open interval (low, high).
    Interval { low: f64, high: f64 },
    /// The k-dimensional probability simplex.
    Simplex { k: usize },
    /// An unordered label set {0, .., k-1}.
    Labels { k: usize },
    /// Non-negative integer counts.
    Counts,
}

/// The closed five-way support classification driving proposer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportClass {
    ContinuousUnconstrained,
    ContinuousBounded,
    Simplex,
    UnorderedDiscrete,
    OrderedDiscrete,
}

/// Distribution family tag, used to invalidate memoized proposer choices
/// when a variable's family changes between model instantiations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Normal,
    Gamma,
    Beta,
    Uniform,
    Dirichlet,
    Categorical,
    Bernoulli,
    Poisson,
}

/// A probability distribution over one random variable.
///
/// Parameters are plain `f64`s in the conventional parameterization; `Gamma`
/// uses shape/rate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Distribution {
    Normal { mean: f64, std: f64 },
    Gamma { shape: f64, rate: f64 },
    Beta { alpha: f64, beta: f64 },
    Uniform { low: f64, high: f64 },
    Dirichlet { concentration: Vec<f64> },
    Categorical { weights: Vec<f64> },
    Bernoulli { p: f64 },
    Poisson { rate: f64 },
}

impl Distribution {
    pub fn family(&self) -> Family {
        match self {
            Distribution::Normal { .. } => Family::Normal,
            Distribution::Gamma { .. } => Family::Gamma,
            Distribution::Beta { .. } => Family::Beta,
            Distribution::Uniform { .. } => Family::Uniform,
            Distribution::Dirichlet { .. } => Family::Dirichlet,
            Distribution::Categorical { .. } => Family::Categorical,
            Distribution::Bernoulli { .. } => Family::Bernoulli,
            Distribution::Poisson { .. } => Family::Poisson,
        }
    }

    pub fn support(&self) -> Support {
        match self {
            Distribution::Normal { .. } => Support::Real,
            Distribution::Gamma { .. } => Support::Positive,
            Distribution::Beta { .. } => Support::UnitInterval,
            Distribution::Uniform { low, high } => Support::Interval {
                low: *low,
                high: *high,
            },
            Distribution::Dirichlet { concentration } => Support::Simplex {
                k: concentration.len(),
            },
            Distribution::Categorical { weights } => Support::Labels { k: weights.len() },
            Distribution::Bernoulli { .. } => Support::Labels { k: 2 },
            Distribution::Poisson { .. } => Support::Counts,
        }
    }

    pub fn support_class(&self) -> SupportClass {
        match self.support() {
            Support::Real => SupportClass::ContinuousUnconstrained,
            Support::Positive | Support::UnitInterval | Support::Interval { .. } => {
                SupportClass::ContinuousBounded
            }
            Support::Simplex { .. } => SupportClass::Simplex,
            Support::Labels { .. } => SupportClass::UnorderedDiscrete,
            Support::Counts => SupportClass::OrderedDiscrete,
        }
    }

    /// Log-density (or log-mass) of `value` under this distribution.
    ///
    /// Values outside the support, or of the wrong kind for the family,
    /// score `-inf` rather than erroring: a proposal that lands there is
    /// simply never accepted.
    pub fn log_prob(&self, value: &Value) -> f64 {
        match (self, value) {
            (Distribution::Normal { mean, std }, Value::Real(x)) => {
                normal_log_pdf(*x, *mean, *std)
            }
            (Distribution::Gamma { shape, rate }, Value::Real(x)) => {
                if *x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                shape * rate.ln() - ln_gamma(*shape) + (shape - 1.0) * x.ln() - rate * x
            }
            (Distribution::Beta { alpha, beta }, Value::Real(x)) => {
                if *x <= 0.0 || *x >= 1.0 {
                    return f64::NEG_INFINITY;
                }
                (alpha - 1.0) * x.ln() + (beta - 1.0) * (1.0 - x).ln() - ln_beta(*alpha, *beta)
            }
            (Distribution::Uniform { low, high }, Value::Real(x)) => {
                if x < low || x > high {
                    f64::NEG_INFINITY
                } else {
                    -(high - low).ln()
                }
            }
            (Distribution::Dirichlet { concentration }, Value::Vector(x)) => {
                if x.len() != concentration.len() || x.iter().any(|xi| *xi <= 0.0) {
                    return f64::NEG_INFINITY;
                }
                let norm: f64 = concentration.iter().map(|a| ln_gamma(*a)).sum::<f64>()
                    - ln_gamma(concentration.iter().sum());
                concentration
                    .iter()
                    .zip(x.iter())
                    .map(|(a, xi)| (a - 1.0) * xi.ln())
                    .sum::<f64>()
                    - norm
            }
            (Distribution::Categorical { weights }, Value::Int(k)) => {
                let total: f64 = weights.iter().sum();
                match usize::try_from(*k).ok().and_then(|i| weights.get(i)) {
                    Some(w) if *w > 0.0 && total > 0.0 => (w / total).ln(),
                    _ => f64::NEG_INFINITY,
                }
            }
            (Distribution::Bernoulli { p }, Value::Bool(b)) => {
                if *b {
                    p.ln()
                } else {
                    (1.0 - p).ln()
                }
            }
            (Distribution::Poisson { rate }, Value::Int(k)) => {
                if *k < 0 {
                    return f64::NEG_INFINITY;
                }
                let kf = *k as f64;
                kf * rate.ln() - rate - ln_gamma(kf + 1.0)
            }
            _ => f64::NEG_INFINITY,
        }
    }

    /// Draws a sample from this distribution in its natural space.
    ///
    /// Fails with [`InferError::Numerical`] when the parameters are invalid
    /// for the family (non-positive scale, empty weight vector, ...).
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Value, InferError> {
        match self {
            Distribution::Normal { mean, std } => {
                let d = rand_distr::Normal::new(*mean, *std)
                    .map_err(|e| InferError::Numerical(format!("normal({mean}, {std}): {e}")))?;
                Ok(Value::Real(d.sample(rng)))
            }
            Distribution::Gamma { shape, rate } => {
                let d = rand_distr::Gamma::new(*shape, 1.0 / rate).map_err(|e| {
                    InferError::Numerical(format!("gamma({shape}, {rate}): {e}"))
                })?;
                Ok(Value::Real(d.sample(rng)))
            }
            Distribution::Beta { alpha, beta } => {
                let d = rand_distr::Beta::new(*alpha, *beta).map_err(|e| {
                    InferError::Numerical(format!("beta({alpha}, {beta}): {e}"))
                })?;
                Ok(Value::Real(d.sample(rng)))
            }
            Distribution::Uniform { low, high } => {
                if !(high > low) {
                    return Err(InferError::Numerical(format!(
                        "uniform bounds out of order: ({low}, {high})"
                    )));
                }
                Ok(Value::Real(rng.gen_range(*low..*high)))
            }
            Distribution::Dirichlet { concentration } => {
                // Normalized independent Gamma draws; avoids the extra
                // dimension checks rand_distr's Dirichlet performs eagerly.
                if concentration.len() < 2 || concentration.iter().any(|a| *a <= 0.0) {
                    return Err(InferError::Numerical(format!(
                        "dirichlet concentration invalid: {concentration:?}"
                    )));
                }
                let mut draws = Vec::with_capacity(concentration.len());
                for a in concentration {
                    let d = rand_distr::Gamma::new(*a, 1.0)
                        .map_err(|e| InferError::Numerical(format!("dirichlet({a}): {e}")))?;
                    draws.push(d.sample(rng).max(1e-300));
                }
                let total: f64 = draws.iter().sum();
                for x in &mut draws {
                    *x /= total;
                }
                Ok(Value::Vector(draws))
            }
            Distribution::Categorical { weights } => {
                let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
                if weights.is_empty() || total <= 0.0 {
                    return Err(InferError::Numerical(format!(
                        "categorical weights invalid: {weights:?}"
                    )));
                }
                let mut u = rng.gen::<f64>() * total;
                for (i, w) in weights.iter().enumerate() {
                    if *w <= 0.0 {
                        continue;
                    }
                    u -= w;
                    if u <= 0.0 {
                        return Ok(Value::Int(i as i64));
                    }
                }
                // Floating-point underflow in the cumulative sum; last
                // positive weight wins.
                let last = weights.iter().rposition(|w| *w > 0.0).unwrap_or(0);
                Ok(Value::Int(last as i64))
            }
            Distribution::Bernoulli { p } => {
                if !(0.0..=1.0).contains(p) {
                    return Err(InferError::Numerical(format!("bernoulli p invalid: {p}")));
                }
                Ok(Value::Bool(rng.gen_bool(*p)))
            }
            Distribution::Poisson { rate } => {
                let d = rand_distr::Poisson::new(*rate)
                    .map_err(|e| InferError::Numerical(format!("poisson({rate}): {e}")))?;
                let draw: f64 = d.sample(rng);
                Ok(Value::Int(draw as i64))
            }
        }
    }
}
