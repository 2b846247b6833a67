//! NUTS sampling through `mini_mcmc`.
//!
//! The posterior supplies analytical gradients through
//! [`GradientTarget`](mini_mcmc::distributions::GradientTarget). Every chain
//! starts at the origin of the unconstrained space; collected draws are
//! thinned here and the run-level R-hat and ESS are taken from the sampler's
//! run statistics. Chains run on a dedicated rayon pool sized by `cores`.

use crate::config::SamplerConfig;
use crate::posterior::BinomialLogitPosterior;
use burn::backend::{Autodiff, NdArray};
use mini_mcmc::nuts::NUTS;
use ndarray::{Array1, Array2};
use thiserror::Error;

/// Burn backend the posterior is evaluated on.
pub type NutsBackend = Autodiff<NdArray<f64>>;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Log density is not finite at the initial values (logp = {logp}).")]
    NonFiniteInitialDensity { logp: f64 },
    #[error("Could not build a sampler thread pool with {threads} threads: {message}")]
    ThreadPool { threads: usize, message: String },
    #[error("NUTS sampling failed: {0}")]
    Run(String),
    #[error("Sampler returned draws of shape {found:?}; expected {expected:?}.")]
    UnexpectedShape {
        expected: [usize; 3],
        found: [usize; 3],
    },
}

/// Thinned post-warmup draws with run-level diagnostics.
#[derive(Clone, Debug)]
pub struct Draws {
    /// One `[kept_draws, dim]` array per chain.
    pub chains: Vec<Array2<f64>>,
    /// Mean R-hat over parameters. NaN when the sampler could not compute it.
    pub rhat: f64,
    /// Mean effective sample size over parameters.
    pub ess: f64,
}

impl Draws {
    pub fn dim(&self) -> usize {
        self.chains.first().map_or(0, |c| c.ncols())
    }

    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.nrows()).sum()
    }

    /// One parameter's draws, one array per chain.
    pub fn parameter(&self, index: usize) -> Vec<Array1<f64>> {
        self.chains
            .iter()
            .map(|c| c.column(index).to_owned())
            .collect()
    }

    /// All chains stacked into `[total_draws, dim]`.
    pub fn pooled(&self) -> Array2<f64> {
        let mut pooled = Array2::<f64>::zeros((self.total_draws(), self.dim()));
        let mut row = 0;
        for chain in &self.chains {
            for draw in chain.rows() {
                pooled.row_mut(row).assign(&draw);
                row += 1;
            }
        }
        pooled
    }
}

/// Collected draws in sampler order, before thinning.
struct RawDraws {
    values: Vec<f64>,
    shape: [usize; 3],
    rhat: f64,
    ess: f64,
}

/// Runs `config.chains` NUTS chains on `target`.
pub fn sample(
    target: &BinomialLogitPosterior,
    config: &SamplerConfig,
) -> Result<Draws, SamplerError> {
    let dim = target.dim();
    let (logp, _) = target.logp_and_grad(Array1::<f64>::zeros(dim).view());
    if !logp.is_finite() {
        return Err(SamplerError::NonFiniteInitialDensity { logp });
    }

    let threads = config.cores.min(config.chains).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| SamplerError::ThreadPool {
            threads,
            message: e.to_string(),
        })?;

    let raw = pool.install(|| run_nuts(target, config))?;
    let expected = [config.chains, config.post_warmup_iterations(), dim];
    if raw.shape != expected {
        return Err(SamplerError::UnexpectedShape {
            expected,
            found: raw.shape,
        });
    }

    Ok(Draws {
        chains: thin_chains(&raw.values, raw.shape, config.thin),
        rhat: raw.rhat,
        ess: raw.ess,
    })
}

fn run_nuts(
    target: &BinomialLogitPosterior,
    config: &SamplerConfig,
) -> Result<RawDraws, SamplerError> {
    let initial_positions = vec![vec![0.0_f64; target.dim()]; config.chains];
    let mut sampler = NUTS::<f64, NutsBackend, BinomialLogitPosterior>::new(
        target.clone(),
        initial_positions,
        config.target_accept,
    )
    .set_seed(config.seed);

    log::info!(
        "Running NUTS: {} chains, {} warmup and {} collected iterations each, keeping {} after thinning by {}",
        config.chains,
        config.warmup,
        config.post_warmup_iterations(),
        config.kept_draws_per_chain(),
        config.thin
    );
    let (samples, run_stats) = sampler
        .run_progress(config.post_warmup_iterations(), config.warmup)
        .map_err(|e| SamplerError::Run(e.to_string()))?;
    log::info!("NUTS sampling complete: {}", run_stats);

    let shape = samples.dims();
    let values: Vec<f64> = samples
        .into_data()
        .to_vec()
        .map_err(|e| SamplerError::Run(format!("could not read draws: {e:?}")))?;

    Ok(RawDraws {
        values,
        shape,
        rhat: f64::from(run_stats.rhat.mean),
        ess: f64::from(run_stats.ess.mean),
    })
}

/// Splits `[chains, samples, dim]` row-major draws into per-chain arrays,
/// keeping every `thin`-th sample starting with the first.
fn thin_chains(values: &[f64], shape: [usize; 3], thin: usize) -> Vec<Array2<f64>> {
    let [n_chains, n_samples, dim] = shape;
    let kept: Vec<usize> = (0..n_samples).step_by(thin.max(1)).collect();
    (0..n_chains)
        .map(|chain| {
            Array2::from_shape_fn((kept.len(), dim), |(row, d)| {
                values[chain * n_samples * dim + kept[row] * dim + d]
            })
        })
        .collect()
}
