//! Proposal kernels.
//!
//! Each kernel produces a candidate value for one variable plus the
//! forward/reverse proposal log-densities the Metropolis-Hastings ratio
//! needs for non-symmetric proposals. The engine treats kernels as opaque:
//! everything it relies on is the [`Proposer`] contract.
//!
//! Gradient-based kernels work in the variable's transformed (unconstrained)
//! space and fold the Jacobian corrections into the forward/reverse terms,
//! so the driver's acceptance formula stays
//! `node_updates + children_updates + reverse - forward` for every kernel.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution as RandDistribution, StandardNormal};

use crate::dist::math::normal_log_pdf;
use crate::dist::{Distribution, Support, Value};
use crate::errors::InferError;
use crate::world::variable::{RvKey, Variable};
use crate::world::world::World;

/// A candidate value plus the proposal log-densities for the MH ratio.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// Proposed value in the variable's natural space.
    pub value: Value,
    /// Log-density of proposing `value` from the current state.
    pub forward_log_prob: f64,
    /// Log-density of proposing the current value back from `value`.
    pub reverse_log_prob: f64,
}

/// A proposal kernel for one variable.
pub trait Proposer: std::fmt::Debug {
    /// Kernel name, used in logs and selector tests.
    fn name(&self) -> &'static str;

    /// Proposes a new value for `key` given its current record.
    ///
    /// Fails with [`InferError::ProposalDivergence`] when the kernel
    /// produces a non-finite value or density; the scorer converts that
    /// into a rejection.
    fn propose(
        &self,
        key: &RvKey,
        var: &Variable,
        world: &World,
        rng: &mut ChaCha8Rng,
    ) -> Result<Proposal, InferError>;
}

// ── Uniform ─────────────────────────────────────────────────────────

/// Samples uniformly over an unordered discrete support. Symmetric, needs
/// no gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformProposer;

impl Proposer for UniformProposer {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn propose(
        &self,
        key: &RvKey,
        var: &Variable,
        _world: &World,
        rng: &mut ChaCha8Rng,
    ) -> Result<Proposal, InferError> {
        let (value, k) = match (&var.distribution, var.distribution.support()) {
            (Distribution::Bernoulli { .. }, _) => (Value::Bool(rng.gen_bool(0.5)), 2usize),
            (_, Support::Labels { k }) if k > 0 => {
                (Value::Int(rng.gen_range(0..k) as i64), k)
            }
            _ => {
                return Err(InferError::UnsupportedDistribution {
                    key: key.clone(),
                    reason: format!(
                        "uniform proposer over non-label support {:?}",
                        var.distribution.support()
                    ),
                })
            }
        };
        let lp = -(k as f64).ln();
        Ok(Proposal {
            value,
            forward_log_prob: lp,
            reverse_log_prob: lp,
        })
    }
}

// ── Ancestral ───────────────────────────────────────────────────────

/// Resamples a variable from its own distribution conditioned on the
/// current parents. Always valid; typically slow-mixing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AncestralProposer;

impl Proposer for AncestralProposer {
    fn name(&self) -> &'static str {
        "ancestral"
    }

    fn propose(
        &self,
        _key: &RvKey,
        var: &Variable,
        _world: &World,
        rng: &mut ChaCha8Rng,
    ) -> Result<Proposal, InferError> {
        let value = var.distribution.sample(rng)?;
        let forward_log_prob = var.distribution.log_prob(&value);
        let reverse_log_prob = var.distribution.log_prob(&var.value);
        Ok(Proposal {
            value,
            forward_log_prob,
            reverse_log_prob,
        })
    }
}

// ── Newtonian ───────────────────────────────────────────────────────

/// Gradient-informed proposer using a second-order local approximation of
/// the transformed-space log-density.
///
/// Per coordinate, the proposal is a Gaussian centered at the Newton step
/// `y + g / (-h)` with variance `-1/h`; when the local curvature is not
/// negative the step degrades to a unit-variance random walk around the
/// current point.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewtonianProposer;

const FD_EPS: f64 = 1e-5;
const MIN_VAR: f64 = 1e-8;
const MAX_VAR: f64 = 1e4;

impl Proposer for NewtonianProposer {
    fn name(&self) -> &'static str {
        "newtonian"
    }

    fn propose(
        &self,
        key: &RvKey,
        var: &Variable,
        _world: &World,
        rng: &mut ChaCha8Rng,
    ) -> Result<Proposal, InferError> {
        let y0 = flatten(key, &var.transformed_value)?;
        let (f0, grad, hess) = fd_grad_hess(var, &y0);
        if !f0.is_finite() || !all_finite(&grad) || !all_finite(&hess) {
            return Err(InferError::ProposalDivergence(key.clone()));
        }

        let mut y1 = vec![0.0; y0.len()];
        let mut forward = 0.0;
        for i in 0..y0.len() {
            let (mean, sd) = local_gaussian(y0[i], grad[i], hess[i]);
            let z: f64 = StandardNormal.sample(rng);
            y1[i] = mean + sd * z;
            forward += normal_log_pdf(y1[i], mean, sd);
        }
        if !all_finite(&y1) || !forward.is_finite() {
            return Err(InferError::ProposalDivergence(key.clone()));
        }

        // Reverse density of the current point under the local
        // approximation at the proposed point.
        let (f1, grad1, hess1) = fd_grad_hess(var, &y1);
        if !f1.is_finite() || !all_finite(&grad1) || !all_finite(&hess1) {
            return Err(InferError::ProposalDivergence(key.clone()));
        }
        let mut reverse = 0.0;
        for i in 0..y0.len() {
            let (mean, sd) = local_gaussian(y1[i], grad1[i], hess1[i]);
            reverse += normal_log_pdf(y0[i], mean, sd);
        }

        finish_transformed(key, var, y1, forward, reverse)
    }
}

/// Per-coordinate proposal Gaussian from local gradient and curvature.
fn local_gaussian(y: f64, g: f64, h: f64) -> (f64, f64) {
    let variance = if h < -MIN_VAR {
        (-1.0 / h).clamp(MIN_VAR, MAX_VAR)
    } else {
        1.0
    };
    (y + variance * g, variance.sqrt())
}

// ── Hamiltonian ─────────────────────────────────────────────────────

/// Hamiltonian kernel driven by explicit step-size and trajectory-length
/// parameters. Leapfrog integration in transformed space; the negated
/// kinetic energies ride in the forward/reverse terms so the MH ratio
/// reduces to the Hamiltonian difference.
#[derive(Debug, Clone, Copy)]
pub struct HamiltonianProposer {
    pub step_size: f64,
    pub num_steps: usize,
}

impl HamiltonianProposer {
    pub fn new(step_size: f64, num_steps: usize) -> Self {
        Self {
            step_size,
            num_steps,
        }
    }
}

impl Proposer for HamiltonianProposer {
    fn name(&self) -> &'static str {
        "hamiltonian"
    }

    fn propose(
        &self,
        key: &RvKey,
        var: &Variable,
        _world: &World,
        rng: &mut ChaCha8Rng,
    ) -> Result<Proposal, InferError> {
        let mut y = flatten(key, &var.transformed_value)?;
        let dim = y.len();
        let eps = self.step_size;

        let p0: Vec<f64> = (0..dim).map(|_| StandardNormal.sample(rng)).collect();
        let ke_start: f64 = p0.iter().map(|p| 0.5 * p * p).sum();

        let mut p = p0;
        let mut grad = fd_grad(var, &y);
        if !all_finite(&grad) {
            return Err(InferError::ProposalDivergence(key.clone()));
        }

        // Half step for momentum, then alternating full steps.
        for i in 0..dim {
            p[i] += 0.5 * eps * grad[i];
        }
        for step in 0..self.num_steps {
            for i in 0..dim {
                y[i] += eps * p[i];
            }
            grad = fd_grad(var, &y);
            if !all_finite(&grad) || !all_finite(&y) {
                return Err(InferError::ProposalDivergence(key.clone()));
            }
            if step < self.num_steps - 1 {
                for i in 0..dim {
                    p[i] += eps * grad[i];
                }
            }
        }
        for i in 0..dim {
            p[i] += 0.5 * eps * grad[i];
        }

        let ke_end: f64 = p.iter().map(|pi| 0.5 * pi * pi).sum();
        if !ke_end.is_finite() {
            return Err(InferError::ProposalDivergence(key.clone()));
        }

        finish_transformed(key, var, y, -ke_start, -ke_end)
    }
}

// ── Transformed-space plumbing shared by the gradient kernels ───────

/// Flattens a transformed value into coordinates; rejects discrete values,
/// which no gradient kernel can handle.
fn flatten(key: &RvKey, transformed: &Value) -> Result<Vec<f64>, InferError> {
    match transformed {
        Value::Real(v) => Ok(vec![*v]),
        Value::Vector(v) => Ok(v.clone()),
        other => Err(InferError::UnsupportedDistribution {
            key: key.clone(),
            reason: format!("gradient kernel over {} value", other.kind()),
        }),
    }
}

fn unflatten(template: &Value, y: &[f64]) -> Value {
    match template {
        Value::Real(_) => Value::Real(y[0]),
        _ => Value::Vector(y.to_vec()),
    }
}

fn all_finite(xs: &[f64]) -> bool {
    xs.iter().all(|x| x.is_finite())
}

/// Log-density of the variable in transformed space at coordinates `y`.
///
/// Points the inverse transform cannot score (boundary saturation) read as
/// `-inf` rather than erroring so finite-difference probes stay total.
fn transformed_log_density(var: &Variable, y: &[f64]) -> f64 {
    let yv = unflatten(&var.transformed_value, y);
    let x = match var.transform.inverse(&yv) {
        Ok(x) => x,
        Err(_) => return f64::NEG_INFINITY,
    };
    let jac = match var.transform.log_abs_det_jacobian(&x) {
        Ok(j) => j,
        Err(_) => return f64::NEG_INFINITY,
    };
    var.distribution.log_prob(&x) - jac
}

/// Central finite-difference gradient of the transformed log-density.
fn fd_grad(var: &Variable, y: &[f64]) -> Vec<f64> {
    let mut grad = vec![0.0; y.len()];
    let mut probe = y.to_vec();
    for i in 0..y.len() {
        probe[i] = y[i] + FD_EPS;
        let fp = transformed_log_density(var, &probe);
        probe[i] = y[i] - FD_EPS;
        let fm = transformed_log_density(var, &probe);
        probe[i] = y[i];
        grad[i] = (fp - fm) / (2.0 * FD_EPS);
    }
    grad
}

/// Gradient plus diagonal Hessian, sharing the probe evaluations.
fn fd_grad_hess(var: &Variable, y: &[f64]) -> (f64, Vec<f64>, Vec<f64>) {
    let f0 = transformed_log_density(var, y);
    let mut grad = vec![0.0; y.len()];
    let mut hess = vec![0.0; y.len()];
    let mut probe = y.to_vec();
    for i in 0..y.len() {
        probe[i] = y[i] + FD_EPS;
        let fp = transformed_log_density(var, &probe);
        probe[i] = y[i] - FD_EPS;
        let fm = transformed_log_density(var, &probe);
        probe[i] = y[i];
        grad[i] = (fp - fm) / (2.0 * FD_EPS);
        hess[i] = (fp - 2.0 * f0 + fm) / (FD_EPS * FD_EPS);
    }
    (f0, grad, hess)
}

/// Maps a transformed-space candidate back to natural space and attaches
/// the Jacobian corrections to the proposal terms.
fn finish_transformed(
    key: &RvKey,
    var: &Variable,
    y1: Vec<f64>,
    forward: f64,
    reverse: f64,
) -> Result<Proposal, InferError> {
    let y1v = unflatten(&var.transformed_value, &y1);
    let value = var.transform.inverse(&y1v)?;
    if !value.is_finite() {
        return Err(InferError::ProposalDivergence(key.clone()));
    }
    let jac_new = match var.transform.log_abs_det_jacobian(&value) {
        Ok(j) => j,
        Err(_) => return Err(InferError::ProposalDivergence(key.clone())),
    };
    // forward picks up J(x'), reverse J(x): the acceptance ratio then
    // targets the natural-space density even though the walk is in
    // transformed space.
    Ok(Proposal {
        value,
        forward_log_prob: forward + jac_new,
        reverse_log_prob: reverse + var.jacobian,
    })
}
