//! # Analysis Pipeline
//!
//! Runs one factor's analysis end to end:
//!
//! 1. load the region list and the birth table (filtered to the regions);
//! 2. resolve the factor index to a column name;
//! 3. fit the intercept-only model and the `factor + (1 | state)` model;
//! 4. write the factor model's summary;
//! 5. repeat k-fold cross-validation of both models `reps` times, appending
//!    each repetition's comparison to the k-fold log.
//!
//! Control flow is strictly sequential; any error aborts the run.

use crate::compare::{CompareError, ComparisonTable, compare};
use crate::config::{AnalysisConfig, ConfigError};
use crate::data::{
    DATASET_FILE, DataError, REGION_LIST_FILE, SchemaError, load_dataset, load_region_list,
};
use crate::fit::FitError;
use crate::formula::{Formula, ModelSpec};
use crate::kfold::KFoldError;
use crate::output::{
    OutputError, append_comparison, ensure_output_dir, kfold_log_path, summary_path, write_summary,
};
use crate::select::{SelectionError, select_factor};
use crate::service::ModelingService;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use thiserror::Error;

/// Name of the intercept-only model in fits and comparison tables.
pub const NULL_MODEL: &str = "null";

#[derive(Error, Debug)]
pub enum CrossValidationError {
    #[error("k-fold of model '{model}' failed: {source}")]
    KFold {
        model: String,
        #[source]
        source: KFoldError,
    },
    #[error(transparent)]
    Compare(#[from] CompareError),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Failed to load input data: {0}")]
    DataLoad(DataError),
    #[error("Input data has an invalid layout: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    IndexOutOfRange(#[from] SelectionError),
    #[error("Fitting model '{model}' failed: {source}")]
    ModelFit {
        model: String,
        #[source]
        source: FitError,
    },
    #[error("Cross-validation of factor '{factor}' failed in repetition {repetition}: {source}")]
    CrossValidation {
        factor: String,
        repetition: u32,
        #[source]
        source: CrossValidationError,
    },
    #[error("Failed to write results: {0}")]
    Output(#[from] OutputError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<DataError> for AnalysisError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::Schema(schema) => AnalysisError::Schema(schema),
            other => AnalysisError::DataLoad(other),
        }
    }
}

/// What to analyse: the data location, the factor and the repetition count.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub data_dir: PathBuf,
    /// 1-based index into the dataset's factor columns.
    pub factor_index: i64,
    pub reps: u32,
}

/// Where a finished run put its results.
#[derive(Debug)]
pub struct RunReport {
    pub factor: String,
    pub summary_path: PathBuf,
    pub kfold_log_path: PathBuf,
    /// One comparison per repetition, in order.
    pub comparisons: Vec<ComparisonTable>,
}

pub fn run<S: ModelingService>(
    options: &RunOptions,
    config: &AnalysisConfig,
    service: &S,
) -> Result<RunReport, AnalysisError> {
    let regions = load_region_list(&options.data_dir.join(REGION_LIST_FILE))?;
    let data = load_dataset(&options.data_dir.join(DATASET_FILE), &regions)?;
    log::info!(
        "Loaded {} observations in {} states ({} regions listed)",
        data.n_rows(),
        data.state().n_levels(),
        regions.len()
    );

    let factor = select_factor(&data, options.factor_index)?.to_string();

    let null_spec = ModelSpec::new(NULL_MODEL, Formula::null(), &config.sampler, &config.priors);
    let factor_spec = ModelSpec::new(
        &factor,
        Formula::factor_with_state(&factor),
        &config.sampler,
        &config.priors,
    );

    let fit = |spec: &ModelSpec| {
        service
            .fit(spec, &data)
            .map_err(|source| AnalysisError::ModelFit {
                model: spec.name.clone(),
                source,
            })
    };
    let null_fit = fit(&null_spec)?;
    let factor_fit = fit(&factor_spec)?;

    let out_dir = ensure_output_dir(&options.data_dir)?;
    let summary = summary_path(&out_dir, &factor);
    write_summary(&summary, &service.summarize(&factor_fit))?;
    log::info!("Wrote model summary to {}", summary.display());

    let log_path = kfold_log_path(&out_dir, &factor);
    let folds = config.kfold.folds;
    let mut rng = StdRng::seed_from_u64(config.sampler.seed);
    let mut comparisons = Vec::with_capacity(options.reps as usize);

    for repetition in 1..=options.reps {
        log::info!(
            "Repetition {repetition}/{}: {folds}-fold cross-validation",
            options.reps
        );
        let cv_error = |source: CrossValidationError| AnalysisError::CrossValidation {
            factor: factor.clone(),
            repetition,
            source,
        };

        let mut estimates = Vec::with_capacity(2);
        for (spec, fit) in [(&null_spec, &null_fit), (&factor_spec, &factor_fit)] {
            let estimate = service
                .kfold(fit, &data, folds, &mut rng)
                .map_err(|source| {
                    cv_error(CrossValidationError::KFold {
                        model: spec.name.clone(),
                        source,
                    })
                })?;
            estimates.push(estimate);
        }

        let table = compare(&estimates).map_err(|e| cv_error(e.into()))?;
        append_comparison(&log_path, &table, repetition)?;
        log::info!(
            "Repetition {repetition}: best model '{}'",
            table.best().model
        );
        comparisons.push(table);
    }

    Ok(RunReport {
        factor,
        summary_path: summary,
        kfold_log_path: log_path,
        comparisons,
    })
}
