//! Structured regression formulas.
//!
//! A formula is plain data: an outcome, an intercept flag, fixed-effect
//! terms and random-intercept groups. The brms-style text form exists only
//! for display in summaries and logs.

use crate::config::{PriorConfig, SamplerConfig};
use crate::data::{FEMALE_COLUMN, MALE_COLUMN, STATE_COLUMN};
use std::fmt;

/// Successes out of a number of trials given as a sum of count columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinomialOutcome {
    pub successes: String,
    pub trials: Vec<String>,
}

impl BinomialOutcome {
    /// Male births out of all births: `M | trials(M + F)`.
    pub fn male_births() -> Self {
        Self {
            successes: MALE_COLUMN.to_string(),
            trials: vec![MALE_COLUMN.to_string(), FEMALE_COLUMN.to_string()],
        }
    }
}

impl fmt::Display for BinomialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | trials({})", self.successes, self.trials.join(" + "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub outcome: BinomialOutcome,
    pub intercept: bool,
    /// Categorical fixed-effect terms.
    pub fixed: Vec<String>,
    /// Grouping columns, each contributing a random intercept.
    pub random_intercepts: Vec<String>,
}

impl Formula {
    /// `outcome ~ 1`
    pub fn null() -> Self {
        Self {
            outcome: BinomialOutcome::male_births(),
            intercept: true,
            fixed: Vec::new(),
            random_intercepts: Vec::new(),
        }
    }

    /// `outcome ~ 1 + <factor> + (1 | state)`
    pub fn factor_with_state(factor: &str) -> Self {
        Self {
            outcome: BinomialOutcome::male_births(),
            intercept: true,
            fixed: vec![factor.to_string()],
            random_intercepts: vec![STATE_COLUMN.to_string()],
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms: Vec<String> = Vec::new();
        terms.push(if self.intercept { "1" } else { "0" }.to_string());
        terms.extend(self.fixed.iter().cloned());
        terms.extend(self.random_intercepts.iter().map(|g| format!("(1 | {g})")));
        write!(f, "{} ~ {}", self.outcome, terms.join(" + "))
    }
}

/// Response distribution and link. Only the binomial-logit model is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    BinomialLogit,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::BinomialLogit => "binomial",
        }
    }

    pub fn link(&self) -> &'static str {
        match self {
            Family::BinomialLogit => "logit",
        }
    }
}

/// A named model: formula, family and the shared fitting configuration.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub formula: Formula,
    pub family: Family,
    pub sampler: SamplerConfig,
    pub priors: PriorConfig,
}

impl ModelSpec {
    pub fn new(name: &str, formula: Formula, sampler: &SamplerConfig, priors: &PriorConfig) -> Self {
        Self {
            name: name.to_string(),
            formula,
            family: Family::BinomialLogit,
            sampler: sampler.clone(),
            priors: priors.clone(),
        }
    }

    /// The same model with another sampler seed; used for fold refits.
    pub fn with_seed(&self, seed: u64) -> Self {
        let mut spec = self.clone();
        spec.sampler.seed = seed;
        spec
    }
}
