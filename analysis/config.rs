//! Run configuration shared by every model fit.
//!
//! All sampler and prior settings live in one explicit value that is threaded
//! into each fit, so the null model and the factor model are always sampled
//! under identical settings. The configuration can be read from a TOML file;
//! any section or field left out falls back to its default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of independent Markov chains. Every chain starts with all
    /// unconstrained parameters at zero.
    pub chains: usize,
    /// Size of the thread pool the chains run on.
    pub cores: usize,
    /// Warmup iterations per chain (discarded).
    pub warmup: usize,
    /// Total iterations per chain, warmup included.
    pub iterations: usize,
    /// Keep every `thin`-th post-warmup draw.
    pub thin: usize,
    pub seed: u64,
    /// Target acceptance probability for NUTS step-size adaptation.
    pub target_accept: f64,
    /// Largest R-hat accepted before a fit is rejected.
    pub max_rhat: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        let cores = num_cpus::get().max(1);
        Self {
            chains: cores,
            cores,
            warmup: 500,
            iterations: 1500,
            thin: 2,
            seed: 1,
            target_accept: 0.8,
            max_rhat: 1.1,
        }
    }
}

impl SamplerConfig {
    /// Post-warmup draws kept per chain after thinning.
    pub fn kept_draws_per_chain(&self) -> usize {
        self.post_warmup_iterations().div_ceil(self.thin)
    }

    pub fn post_warmup_iterations(&self) -> usize {
        self.iterations - self.warmup
    }
}

/// Prior scales. The intercept and the group standard deviation use
/// Student-t(3) priors, population-level coefficients a normal prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    pub intercept_scale: f64,
    pub coefficient_sd: f64,
    pub group_sd_scale: f64,
    pub student_t_df: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            intercept_scale: 2.5,
            coefficient_sd: 5.0,
            group_sd_scale: 2.5,
            student_t_df: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KFoldConfig {
    pub folds: usize,
}

impl Default for KFoldConfig {
    fn default() -> Self {
        Self { folds: 10 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sampler: SamplerConfig,
    pub priors: PriorConfig,
    pub kfold: KFoldConfig,
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampler;
        let invalid = |field: &'static str, reason: String| -> Result<(), ConfigError> {
            Err(ConfigError::InvalidValue { field, reason })
        };

        if s.chains == 0 {
            return invalid("sampler.chains", "at least one chain is required".into());
        }
        if s.cores == 0 {
            return invalid("sampler.cores", "at least one core is required".into());
        }
        if s.warmup >= s.iterations {
            return invalid(
                "sampler.warmup",
                format!(
                    "warmup ({}) must be smaller than iterations ({})",
                    s.warmup, s.iterations
                ),
            );
        }
        if s.thin == 0 {
            return invalid("sampler.thin", "thinning interval must be at least 1".into());
        }
        if !(s.target_accept > 0.0 && s.target_accept < 1.0) {
            return invalid(
                "sampler.target_accept",
                format!("{} is outside (0, 1)", s.target_accept),
            );
        }
        if !(s.max_rhat.is_finite() && s.max_rhat >= 1.0) {
            return invalid(
                "sampler.max_rhat",
                format!("{} must be a finite number of at least 1", s.max_rhat),
            );
        }

        let p = &self.priors;
        for (field, value) in [
            ("priors.intercept_scale", p.intercept_scale),
            ("priors.coefficient_sd", p.coefficient_sd),
            ("priors.group_sd_scale", p.group_sd_scale),
            ("priors.student_t_df", p.student_t_df),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(field, format!("{value} must be a positive finite number"));
            }
        }

        if self.kfold.folds < 2 {
            return invalid(
                "kfold.folds",
                format!("{} folds; at least 2 are required", self.kfold.folds),
            );
        }
        Ok(())
    }
}
