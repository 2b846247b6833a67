//! K-fold cross-validation of a fitted model.
//!
//! Rows are assigned to folds at random (balanced), each fold is held out
//! once while the model is refitted on the remaining rows, and every
//! held-out row is scored by its log predictive density
//! `elpd_i = log( (1/S) Σ_s p(y_i | θ_s) )`.

use crate::data::Dataset;
use crate::design::{DesignError, build_design};
use crate::fit::{FitError, FitResult, fit_model_lenient};
use crate::posterior::{ParameterLayout, log_binomial_coefficients, pointwise_log_likelihood};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::Array1;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::io::IsTerminal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KFoldError {
    #[error("Cannot split {rows} observations into {folds} folds.")]
    TooFewRows { rows: usize, folds: usize },
    #[error("Refitting with fold {fold} held out failed: {source}")]
    Refit {
        fold: usize,
        #[source]
        source: FitError,
    },
    #[error("Building the held-out design of fold {fold} failed: {source}")]
    HeldOutDesign {
        fold: usize,
        #[source]
        source: DesignError,
    },
    #[error("Fold refit changed the parameter layout ({expected:?} vs {found:?}).")]
    LayoutMismatch {
        expected: ParameterLayout,
        found: ParameterLayout,
    },
    #[error("Held-out log predictive density of fold {fold} is not finite.")]
    NonFinite { fold: usize },
}

/// Pointwise and total expected log predictive density of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct KFoldEstimate {
    pub model: String,
    pub pointwise: Array1<f64>,
    pub elpd: f64,
    pub se_elpd: f64,
}

impl KFoldEstimate {
    pub fn from_pointwise(model: &str, pointwise: Array1<f64>) -> Self {
        let n = pointwise.len() as f64;
        let elpd = pointwise.sum();
        let se_elpd = (n * sample_variance(&pointwise)).sqrt();
        Self {
            model: model.to_string(),
            pointwise,
            elpd,
            se_elpd,
        }
    }

    pub fn n_observations(&self) -> usize {
        self.pointwise.len()
    }

    /// The estimate on the deviance scale, `-2 elpd`.
    pub fn kfoldic(&self) -> f64 {
        -2.0 * self.elpd
    }

    pub fn se_kfoldic(&self) -> f64 {
        2.0 * self.se_elpd
    }
}

/// Sample variance (`n - 1` denominator); zero for fewer than two values.
pub fn sample_variance(values: &Array1<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.sum() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)
}

/// Balanced random fold labels `1..=folds` for `n` rows.
pub fn fold_assignment(n: usize, folds: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut labels: Vec<usize> = (0..n).map(|i| i % folds + 1).collect();
    labels.shuffle(rng);
    labels
}

/// Cross-validates `fit` on `data`, refitting its specification once per fold.
///
/// `data` must be the dataset `fit` was fitted on. Fold refits draw their
/// sampler seeds from `rng`, so a seeded `rng` makes the whole computation
/// reproducible.
pub fn kfold(
    fit: &FitResult,
    data: &Dataset,
    folds: usize,
    rng: &mut StdRng,
) -> Result<KFoldEstimate, KFoldError> {
    let n = data.n_rows();
    if folds < 2 || n < folds {
        return Err(KFoldError::TooFewRows { rows: n, folds });
    }

    let labels = fold_assignment(n, folds, rng);
    let mut pointwise = Array1::<f64>::zeros(n);
    let progress = create_progress_bar(folds as u64, &fit.spec.name);

    for fold in 1..=folds {
        let (held_out, training): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&row| labels[row] == fold);

        let spec = fit.spec.with_seed(rng.r#gen());
        let refit = fit_model_lenient(&spec, &data.subset(&training))
            .map_err(|source| KFoldError::Refit { fold, source })?;
        if refit.layout != fit.layout {
            return Err(KFoldError::LayoutMismatch {
                expected: fit.layout,
                found: refit.layout,
            });
        }

        let test_design = build_design(&spec.formula, &data.subset(&held_out))
            .map_err(|source| KFoldError::HeldOutDesign { fold, source })?;
        let log_choose = log_binomial_coefficients(&test_design);
        let draws = refit.draws.pooled();
        let n_draws = draws.nrows();

        // log-lik matrix [draws, held_out]
        let mut log_lik = ndarray::Array2::<f64>::zeros((n_draws, held_out.len()));
        for (s, theta) in draws.rows().into_iter().enumerate() {
            log_lik.row_mut(s).assign(&pointwise_log_likelihood(
                &test_design,
                &log_choose,
                refit.layout,
                theta,
            ));
        }

        for (j, &row) in held_out.iter().enumerate() {
            let elpd = log_sum_exp(log_lik.column(j).iter().copied()) - (n_draws as f64).ln();
            if !elpd.is_finite() {
                return Err(KFoldError::NonFinite { fold });
            }
            pointwise[row] = elpd;
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    let estimate = KFoldEstimate::from_pointwise(&fit.spec.name, pointwise);
    log::info!(
        "{}-fold elpd of '{}': {:.3} (SE {:.3})",
        folds,
        estimate.model,
        estimate.elpd,
        estimate.se_elpd
    );
    Ok(estimate)
}

fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn create_progress_bar(len: u64, model: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(5)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) =
        ProgressStyle::with_template("> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} folds {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(model.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PriorConfig, SamplerConfig};
    use crate::data::{RegionList, load_dataset};
    use crate::fit::fit_model;
    use crate::formula::{Formula, ModelSpec};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn folds_are_balanced() {
        let mut rng = StdRng::seed_from_u64(1);
        let labels = fold_assignment(23, 5, &mut rng);
        for fold in 1..=5 {
            let count = labels.iter().filter(|&&l| l == fold).count();
            assert!(count == 4 || count == 5, "fold {fold} has {count} rows");
        }
        assert_eq!(labels.len(), 23);
    }

    #[test]
    fn estimate_totals_and_standard_errors() {
        let est = KFoldEstimate::from_pointwise("m", ndarray::array![-1.0, -2.0, -3.0]);
        assert_abs_diff_eq!(est.elpd, -6.0);
        // var = 1, n = 3
        assert_abs_diff_eq!(est.se_elpd, 3f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(est.kfoldic(), 12.0);
        assert_abs_diff_eq!(est.se_kfoldic(), 2.0 * 3f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn log_sum_exp_handles_large_magnitudes() {
        let v = [-1000.0, -1000.0];
        assert_abs_diff_eq!(
            log_sum_exp(v.iter().copied()),
            -1000.0 + 2f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn too_many_folds_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "stfips,state,M,F,EQI_1\n01001,AL,10,9,1\n01003,AL,12,13,2\n").unwrap();
        file.flush().unwrap();
        let data = load_dataset(file.path(), &RegionList::from_ids(["01001", "01003"])).unwrap();
        let sampler = SamplerConfig {
            chains: 1,
            cores: 1,
            warmup: 50,
            iterations: 100,
            ..SamplerConfig::default()
        };
        let spec = ModelSpec::new("null", Formula::null(), &sampler, &PriorConfig::default());
        let fit = fit_model_lenient(&spec, &data).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            kfold(&fit, &data, 3, &mut rng),
            Err(KFoldError::TooFewRows { rows: 2, folds: 3 })
        ));
    }

    #[test]
    fn null_model_kfold_scores_every_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "stfips,state,M,F,EQI_1").unwrap();
        let mut ids = Vec::new();
        for i in 0..10 {
            let id = format!("{:05}", 2000 + i);
            writeln!(file, "{id},ST{},{},{},{}", i % 2, 51 + i, 49 + i, i % 3).unwrap();
            ids.push(id);
        }
        file.flush().unwrap();
        let data = load_dataset(file.path(), &RegionList::from_ids(ids)).unwrap();

        let sampler = SamplerConfig {
            chains: 2,
            cores: 2,
            warmup: 150,
            iterations: 350,
            ..SamplerConfig::default()
        };
        let spec = ModelSpec::new("null", Formula::null(), &sampler, &PriorConfig::default());
        let fit = fit_model(&spec, &data).unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        let est = kfold(&fit, &data, 5, &mut rng).unwrap();
        assert_eq!(est.n_observations(), 10);
        assert!(est.pointwise.iter().all(|v| v.is_finite() && *v < 0.0));
        assert_abs_diff_eq!(est.elpd, est.pointwise.sum(), epsilon = 1e-9);
        assert_eq!(est.model, "null");
    }
}
