use crate::kfold::{KFoldEstimate, sample_variance};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CompareError {
    #[error("At least one k-fold estimate is required for a comparison.")]
    Empty,
    #[error(
        "Model '{model}' was evaluated on {found} observations, but '{reference}' on {expected}."
    )]
    MismatchedObservations {
        model: String,
        reference: String,
        expected: usize,
        found: usize,
    },
}

/// One model's line of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub model: String,
    pub elpd_kfold: f64,
    pub se_elpd_kfold: f64,
    pub kfoldic: f64,
    pub se_kfoldic: f64,
    /// `elpd` minus the best model's `elpd`; zero for the best model.
    pub elpd_diff: f64,
    pub se_diff: f64,
}

/// Models ordered from best to worst expected log predictive density.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonTable {
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    pub const COLUMNS: [&'static str; 7] = [
        "model",
        "elpd_kfold",
        "se_elpd_kfold",
        "kfoldic",
        "se_kfoldic",
        "elpd_diff",
        "se_diff",
    ];

    pub fn best(&self) -> &ComparisonRow {
        &self.rows[0]
    }
}

/// Ranks the estimates by elpd and computes paired differences against the
/// best model. Ties keep their input order.
pub fn compare(estimates: &[KFoldEstimate]) -> Result<ComparisonTable, CompareError> {
    let first = estimates.first().ok_or(CompareError::Empty)?;
    for other in &estimates[1..] {
        if other.n_observations() != first.n_observations() {
            return Err(CompareError::MismatchedObservations {
                model: other.model.clone(),
                reference: first.model.clone(),
                expected: first.n_observations(),
                found: other.n_observations(),
            });
        }
    }

    let mut order: Vec<&KFoldEstimate> = estimates.iter().collect();
    order.sort_by(|a, b| b.elpd.total_cmp(&a.elpd));
    let best = order[0];
    let n = best.n_observations() as f64;

    let rows = order
        .iter()
        .map(|est| {
            let diff = &est.pointwise - &best.pointwise;
            ComparisonRow {
                model: est.model.clone(),
                elpd_kfold: est.elpd,
                se_elpd_kfold: est.se_elpd,
                kfoldic: est.kfoldic(),
                se_kfoldic: est.se_kfoldic(),
                elpd_diff: est.elpd - best.elpd,
                se_diff: (n * sample_variance(&diff)).sqrt(),
            }
        })
        .collect();

    Ok(ComparisonTable { rows })
}
