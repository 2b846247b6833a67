//! The modeling backend seen by the pipeline.

use crate::data::Dataset;
use crate::fit::{FitError, FitResult, fit_model};
use crate::formula::ModelSpec;
use crate::kfold::{KFoldError, KFoldEstimate, kfold};
use crate::summary::render_summary;
use rand::rngs::StdRng;

/// Fits model specifications, cross-validates the fits and renders their
/// summaries.
pub trait ModelingService {
    type Fit;

    fn fit(&self, spec: &ModelSpec, data: &Dataset) -> Result<Self::Fit, FitError>;

    /// `data` is the dataset the fit was produced from.
    fn kfold(
        &self,
        fit: &Self::Fit,
        data: &Dataset,
        folds: usize,
        rng: &mut StdRng,
    ) -> Result<KFoldEstimate, KFoldError>;

    fn summarize(&self, fit: &Self::Fit) -> String;
}

/// NUTS backend built on `mini_mcmc`, with `fit_model` enforcing the
/// convergence limits on full-data fits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmcService;

impl ModelingService for HmcService {
    type Fit = FitResult;

    fn fit(&self, spec: &ModelSpec, data: &Dataset) -> Result<FitResult, FitError> {
        fit_model(spec, data)
    }

    fn kfold(
        &self,
        fit: &FitResult,
        data: &Dataset,
        folds: usize,
        rng: &mut StdRng,
    ) -> Result<KFoldEstimate, KFoldError> {
        kfold(fit, data, folds, rng)
    }

    fn summarize(&self, fit: &FitResult) -> String {
        render_summary(fit)
    }
}
