//! Turns a [`Formula`] and a [`Dataset`] into the numeric model structure:
//! a dense treatment-coded fixed-effect matrix, the binomial response, and at
//! most one random-intercept grouping.

use crate::data::{Dataset, FEMALE_COLUMN, Factor, MALE_COLUMN};
use crate::formula::Formula;
use ndarray::{Array1, Array2};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DesignError {
    #[error("Formula refers to column '{0}', which is not a categorical column of the dataset.")]
    UnknownColumn(String),
    #[error("Formula refers to count column '{0}'; only '{MALE}' and '{FEMALE}' hold counts.", MALE = MALE_COLUMN, FEMALE = FEMALE_COLUMN)]
    UnknownCount(String),
    #[error("At most one random-intercept grouping is supported, found {0}.")]
    TooManyGroupings(usize),
    #[error("A model needs at least one coefficient; the formula has no intercept and no terms.")]
    EmptyDesign,
}

/// Random-intercept grouping: one level code per row.
#[derive(Debug, Clone)]
pub struct GroupTerm {
    pub name: String,
    pub levels: Vec<String>,
    pub codes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ModelDesign {
    /// Fixed-effect design matrix `[n_rows, n_coefficients]`.
    pub x: Array2<f64>,
    /// `Intercept`, then `<factor><level>` for every non-reference level.
    pub coefficient_names: Vec<String>,
    /// Whether coefficient 0 is the intercept.
    pub intercept: bool,
    pub successes: Array1<f64>,
    pub trials: Array1<f64>,
    pub group: Option<GroupTerm>,
}

impl ModelDesign {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_groups(&self) -> usize {
        self.group.as_ref().map_or(0, |g| g.levels.len())
    }
}

pub fn build_design(formula: &Formula, data: &Dataset) -> Result<ModelDesign, DesignError> {
    let n = data.n_rows();

    let successes = count_column(data, &formula.outcome.successes)?
        .iter()
        .map(|&c| c as f64)
        .collect::<Array1<f64>>();
    let mut trials = Array1::<f64>::zeros(n);
    for name in &formula.outcome.trials {
        for (t, &c) in trials.iter_mut().zip(count_column(data, name)?) {
            *t += c as f64;
        }
    }

    let fixed: Vec<&Factor> = formula
        .fixed
        .iter()
        .map(|name| categorical_column(data, name))
        .collect::<Result<_, _>>()?;

    let mut coefficient_names = Vec::new();
    if formula.intercept {
        coefficient_names.push("Intercept".to_string());
    }
    for factor in &fixed {
        for level in factor.levels().iter().skip(1) {
            coefficient_names.push(format!("{}{}", factor.name(), level));
        }
    }
    if coefficient_names.is_empty() {
        return Err(DesignError::EmptyDesign);
    }

    let mut x = Array2::<f64>::zeros((n, coefficient_names.len()));
    let mut offset = 0;
    if formula.intercept {
        x.column_mut(0).fill(1.0);
        offset = 1;
    }
    for factor in &fixed {
        // Level 0 is the reference level and has no column.
        for (row, &code) in factor.codes().iter().enumerate() {
            if code > 0 {
                x[[row, offset + code - 1]] = 1.0;
            }
        }
        offset += factor.n_levels().saturating_sub(1);
    }

    let group = match formula.random_intercepts.as_slice() {
        [] => None,
        [name] => {
            let factor = categorical_column(data, name)?;
            Some(GroupTerm {
                name: name.clone(),
                levels: factor.levels().to_vec(),
                codes: factor.codes().to_vec(),
            })
        }
        many => return Err(DesignError::TooManyGroupings(many.len())),
    };

    Ok(ModelDesign {
        x,
        coefficient_names,
        intercept: formula.intercept,
        successes,
        trials,
        group,
    })
}

fn count_column<'a>(data: &'a Dataset, name: &str) -> Result<&'a [u64], DesignError> {
    match name {
        MALE_COLUMN => Ok(data.male()),
        FEMALE_COLUMN => Ok(data.female()),
        other => Err(DesignError::UnknownCount(other.to_string())),
    }
}

fn categorical_column<'a>(data: &'a Dataset, name: &str) -> Result<&'a Factor, DesignError> {
    if data.state().name() == name {
        return Ok(data.state());
    }
    data.factor(name)
        .ok_or_else(|| DesignError::UnknownColumn(name.to_string()))
}
