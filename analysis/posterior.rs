//! Binomial-logit posterior with an optional random intercept.
//!
//! # Parameterisation
//!
//! The unconstrained parameter vector is laid out as
//! `[β (coefficients), z (one per group level), τ]`, where the group
//! standard deviation is `σ = exp(τ)` and the group effects are
//! `u_j = σ z_j` with `z_j ~ N(0, 1)` (non-centred). Models without a
//! grouping carry only `β`.
//!
//! # Priors
//!
//! - intercept: Student-t(ν, 0, `intercept_scale`)
//! - other coefficients: Normal(0, `coefficient_sd`)
//! - σ: half-Student-t(ν, 0, `group_sd_scale`), with the log-Jacobian of
//!   `σ = exp(τ)`
//!
//! # Analytical Gradients
//!
//! With `η_i = x_i β + σ z_{g(i)}` and residual `r_i = y_i - n_i μ_i`:
//! `∇β = Xᵀ r`, `∇z_j = σ Σ_{g(i)=j} r_i`, `∇τ = σ Σ_i z_{g(i)} r_i`, plus the
//! prior terms. Large data is held in `Arc` so cloned targets share it.
//!
//! The NUTS sampler sees the posterior through `mini_mcmc`'s
//! `GradientTarget`, which wraps [`BinomialLogitPosterior::logp_and_grad`].

use crate::config::PriorConfig;
use crate::design::ModelDesign;
use crate::sampler::NutsBackend;
use burn::prelude::*;
use burn::tensor::TensorData;
use mini_mcmc::distributions::GradientTarget;
use ndarray::{Array1, Array2, ArrayView1};
use statrs::function::factorial::ln_binomial;
use std::ops::Range;
use std::sync::Arc;

/// Positions of each parameter block in the unconstrained vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterLayout {
    pub n_coefficients: usize,
    pub n_groups: usize,
}

impl ParameterLayout {
    pub fn for_design(design: &ModelDesign) -> Self {
        Self {
            n_coefficients: design.n_coefficients(),
            n_groups: design.n_groups(),
        }
    }

    pub fn has_group(&self) -> bool {
        self.n_groups > 0
    }

    pub fn coefficients(&self) -> Range<usize> {
        0..self.n_coefficients
    }

    pub fn group_effects(&self) -> Range<usize> {
        self.n_coefficients..self.n_coefficients + self.n_groups
    }

    /// Index of `τ = log σ`, when a grouping exists.
    pub fn log_sd(&self) -> Option<usize> {
        self.has_group()
            .then_some(self.n_coefficients + self.n_groups)
    }

    pub fn dim(&self) -> usize {
        self.n_coefficients + if self.has_group() { self.n_groups + 1 } else { 0 }
    }
}

/// Read-only data shared across chains.
#[derive(Clone)]
struct SharedData {
    x: Arc<Array2<f64>>,
    successes: Arc<Array1<f64>>,
    trials: Arc<Array1<f64>>,
    group_codes: Arc<Vec<usize>>,
}

#[derive(Clone)]
pub struct BinomialLogitPosterior {
    data: SharedData,
    layout: ParameterLayout,
    intercept: bool,
    priors: PriorConfig,
}

impl BinomialLogitPosterior {
    pub fn new(design: &ModelDesign, priors: &PriorConfig) -> Self {
        let group_codes = design
            .group
            .as_ref()
            .map(|g| g.codes.clone())
            .unwrap_or_default();
        Self {
            data: SharedData {
                x: Arc::new(design.x.clone()),
                successes: Arc::new(design.successes.clone()),
                trials: Arc::new(design.trials.clone()),
                group_codes: Arc::new(group_codes),
            },
            layout: ParameterLayout::for_design(design),
            intercept: design.intercept,
            priors: priors.clone(),
        }
    }

    pub fn layout(&self) -> ParameterLayout {
        self.layout
    }

    pub fn dim(&self) -> usize {
        self.layout.dim()
    }

    fn log_prior_and_grad(&self, theta: ArrayView1<f64>, grad: &mut Array1<f64>) -> f64 {
        let p = &self.priors;
        let mut logp = 0.0;

        for k in self.layout.coefficients() {
            let b = theta[k];
            if k == 0 && self.intercept {
                let (lp, g) = student_t(b, p.student_t_df, p.intercept_scale);
                logp += lp;
                grad[k] += g;
            } else {
                let var = p.coefficient_sd * p.coefficient_sd;
                logp -= 0.5 * b * b / var;
                grad[k] -= b / var;
            }
        }

        if let Some(tau_index) = self.layout.log_sd() {
            for j in self.layout.group_effects() {
                logp -= 0.5 * theta[j] * theta[j];
                grad[j] -= theta[j];
            }
            let tau = theta[tau_index];
            let sigma = tau.exp();
            let (lp, g) = student_t(sigma, p.student_t_df, p.group_sd_scale);
            // Density of σ pushed through σ = exp(τ).
            logp += lp + tau;
            grad[tau_index] += sigma * g + 1.0;
        }

        logp
    }

    /// Log posterior (up to a constant) and its gradient at `theta`.
    pub fn logp_and_grad(&self, theta: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let layout = self.layout;
        let mut grad = Array1::<f64>::zeros(layout.dim());
        let eta = linear_predictor(&self.data.x, &self.data.group_codes, layout, theta);

        let y = &self.data.successes;
        let n = &self.data.trials;
        let mut ll = 0.0;
        let mut residual = Array1::<f64>::zeros(eta.len());
        for i in 0..eta.len() {
            ll += y[i] * eta[i] - n[i] * softplus(eta[i]);
            residual[i] = y[i] - n[i] * sigmoid(eta[i]);
        }

        let grad_beta = self.data.x.t().dot(&residual);
        grad.slice_mut(ndarray::s![layout.coefficients()])
            .assign(&grad_beta);

        if let Some(tau_index) = layout.log_sd() {
            let sigma = theta[tau_index].exp();
            let z_offset = layout.n_coefficients;
            let mut grad_tau = 0.0;
            for (i, &g) in self.data.group_codes.iter().enumerate() {
                grad[z_offset + g] += sigma * residual[i];
                grad_tau += sigma * theta[z_offset + g] * residual[i];
            }
            grad[tau_index] += grad_tau;
        }

        let logp = ll + self.log_prior_and_grad(theta, &mut grad);
        (logp, grad)
    }

    /// Evaluates at a tensor position. A position that cannot be read back
    /// gets `-inf` and a zero gradient, so the sampler rejects it.
    fn logp_and_grad_at(&self, position: Tensor<NutsBackend, 1>) -> (f64, Array1<f64>) {
        match position.into_data().to_vec::<f64>() {
            Ok(theta) if theta.len() == self.dim() => {
                self.logp_and_grad(Array1::from_vec(theta).view())
            }
            _ => (f64::NEG_INFINITY, Array1::zeros(self.dim())),
        }
    }
}

impl GradientTarget<f64, NutsBackend> for BinomialLogitPosterior {
    fn unnorm_logp(&self, position: Tensor<NutsBackend, 1>) -> Tensor<NutsBackend, 1> {
        let device = position.device();
        let (logp, _) = self.logp_and_grad_at(position);
        Tensor::<NutsBackend, 1>::from_data(TensorData::new(vec![logp], [1]), &device)
    }

    fn unnorm_logp_and_grad(
        &self,
        position: Tensor<NutsBackend, 1>,
    ) -> (Tensor<NutsBackend, 1>, Tensor<NutsBackend, 1>) {
        let device = position.device();
        let (logp, grad) = self.logp_and_grad_at(position);
        let logp = Tensor::<NutsBackend, 1>::from_data(TensorData::new(vec![logp], [1]), &device);
        let grad = Tensor::<NutsBackend, 1>::from_data(
            TensorData::new(grad.to_vec(), [self.dim()]),
            &device,
        );
        (logp, grad)
    }
}

/// `η = Xβ (+ σ z_g)` for the rows of `x`.
pub fn linear_predictor(
    x: &Array2<f64>,
    group_codes: &[usize],
    layout: ParameterLayout,
    theta: ArrayView1<f64>,
) -> Array1<f64> {
    let beta = theta.slice(ndarray::s![layout.coefficients()]);
    let mut eta = x.dot(&beta);
    if let Some(tau_index) = layout.log_sd() {
        let sigma = theta[tau_index].exp();
        for (e, &g) in eta.iter_mut().zip(group_codes) {
            *e += sigma * theta[layout.n_coefficients + g];
        }
    }
    eta
}

/// `ln C(n, y)` per row, so pointwise log-likelihoods are full log pmfs.
pub fn log_binomial_coefficients(design: &ModelDesign) -> Array1<f64> {
    design
        .trials
        .iter()
        .zip(design.successes.iter())
        .map(|(&n, &y)| ln_binomial(n as u64, y as u64))
        .collect()
}

/// Binomial log pmf of every row of `design` at one parameter draw.
pub fn pointwise_log_likelihood(
    design: &ModelDesign,
    log_choose: &Array1<f64>,
    layout: ParameterLayout,
    theta: ArrayView1<f64>,
) -> Array1<f64> {
    let codes = design
        .group
        .as_ref()
        .map(|g| g.codes.as_slice())
        .unwrap_or(&[]);
    let eta = linear_predictor(&design.x, codes, layout, theta);
    ndarray::Zip::from(&eta)
        .and(&design.successes)
        .and(&design.trials)
        .and(log_choose)
        .map_collect(|&e, &y, &n, &c| c + y * e - n * softplus(e))
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

/// `ln(1 + e^η)` without overflow.
fn softplus(eta: f64) -> f64 {
    if eta > 0.0 {
        eta + (-eta).exp().ln_1p()
    } else {
        eta.exp().ln_1p()
    }
}

/// Unnormalised Student-t log density at `x` and its derivative.
fn student_t(x: f64, df: f64, scale: f64) -> (f64, f64) {
    let r = x / scale;
    let logp = -0.5 * (df + 1.0) * (r * r / df).ln_1p();
    let grad = -(df + 1.0) * x / (df * scale * scale + x * x);
    (logp, grad)
}
