//! Model fitting: design construction, sampling and convergence checks.

use crate::data::Dataset;
use crate::design::{DesignError, ModelDesign, build_design};
use crate::formula::ModelSpec;
use crate::posterior::{BinomialLogitPosterior, ParameterLayout};
use crate::sampler::{Draws, SamplerError, sample};
use ndarray::Array1;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitError {
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error("Sampling failed: {0}")]
    Sampler(#[from] SamplerError),
    #[error("Chains of model '{model}' did not converge: R-hat is {rhat:.3}, the limit is {limit}.")]
    NotConverged { model: String, rhat: f64, limit: f64 },
}

/// Posterior mean, sd and central 95% interval of one parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub lower_95: f64,
    pub upper_95: f64,
}

impl ParameterSummary {
    /// Summarises one parameter from its per-chain draws.
    pub fn from_chains(name: &str, chains: &[Array1<f64>]) -> Self {
        let mut pooled: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
        let n = pooled.len() as f64;
        let mean = pooled.iter().sum::<f64>() / n;
        let sd = if pooled.len() > 1 {
            (pooled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        pooled.sort_by(f64::total_cmp);

        Self {
            name: name.to_string(),
            mean,
            sd,
            lower_95: quantile_sorted(&pooled, 0.025),
            upper_95: quantile_sorted(&pooled, 0.975),
        }
    }
}

/// Quantile of sorted data, interpolating linearly between order statistics.
fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let h = (len - 1) as f64 * prob.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(len - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// A fitted model: its specification, data layout, draws and summaries.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub spec: ModelSpec,
    /// File name of the dataset the model was fitted to.
    pub data_name: String,
    pub design: ModelDesign,
    pub layout: ParameterLayout,
    pub draws: Draws,
    /// One entry per population-level coefficient, in design order.
    pub coefficients: Vec<ParameterSummary>,
    /// `sd(Intercept)` of the grouping, when the model has one.
    pub group_sd: Option<ParameterSummary>,
}

impl FitResult {
    pub fn n_observations(&self) -> usize {
        self.design.n_rows()
    }

    /// Checks the sampler's R-hat against the configured limit.
    pub fn check_convergence(&self) -> Result<(), FitError> {
        check_rhat(&self.spec.name, self.draws.rhat, self.spec.sampler.max_rhat)
    }
}

/// An R-hat that is NaN or infinite counts as non-convergence.
fn check_rhat(model: &str, rhat: f64, limit: f64) -> Result<(), FitError> {
    if rhat.is_nan() || rhat > limit {
        return Err(FitError::NotConverged {
            model: model.to_string(),
            rhat,
            limit,
        });
    }
    Ok(())
}

/// Fits `spec` to `data` and rejects fits that fail the convergence checks.
pub fn fit_model(spec: &ModelSpec, data: &Dataset) -> Result<FitResult, FitError> {
    let fit = sample_model(spec, data)?;
    fit.check_convergence()?;
    Ok(fit)
}

/// Fits `spec` to `data`, logging but not enforcing convergence problems.
/// Used for fold refits, where only hard sampler failures abort.
pub fn fit_model_lenient(spec: &ModelSpec, data: &Dataset) -> Result<FitResult, FitError> {
    let fit = sample_model(spec, data)?;
    if let Err(problem) = fit.check_convergence() {
        log::warn!("Model '{}': {problem}", spec.name);
    }
    Ok(fit)
}

fn sample_model(spec: &ModelSpec, data: &Dataset) -> Result<FitResult, FitError> {
    let design = build_design(&spec.formula, data)?;
    let target = BinomialLogitPosterior::new(&design, &spec.priors);
    let layout = target.layout();

    log::info!(
        "Fitting model '{}': {} ({} observations, {} parameters, {} chains)",
        spec.name,
        spec.formula,
        design.n_rows(),
        layout.dim(),
        spec.sampler.chains
    );

    let draws = sample(&target, &spec.sampler)?;

    let coefficients = layout
        .coefficients()
        .map(|k| ParameterSummary::from_chains(&design.coefficient_names[k], &draws.parameter(k)))
        .collect();

    let group_sd = match (layout.log_sd(), design.group.as_ref()) {
        (Some(tau_index), Some(_)) => {
            let sd_draws: Vec<Array1<f64>> = draws
                .parameter(tau_index)
                .into_iter()
                .map(|tau| tau.mapv(f64::exp))
                .collect();
            Some(ParameterSummary::from_chains("sd(Intercept)", &sd_draws))
        }
        _ => None,
    };

    log::info!(
        "Model '{}' sampled; R-hat {:.3}, ESS {:.0}",
        spec.name,
        draws.rhat,
        draws.ess
    );

    Ok(FitResult {
        spec: spec.clone(),
        data_name: data.source_name().to_string(),
        design,
        layout,
        draws,
        coefficients,
        group_sd,
    })
}
