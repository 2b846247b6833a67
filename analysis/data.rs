//! # Data Loading and Validation Module
//!
//! Reads the two analysis inputs: the list of valid county identifiers and
//! the per-county birth table. The birth table is read with `polars` with
//! every column kept as text, so that FIPS codes keep their leading zeros
//! and EQI values become level labels of categorical factors. EQI factors
//! are never treated as continuous covariates.
//!
//! - Strict Schema: `stfips`, `state`, `M` and `F` are required by name.
//!   Every other column except the dropped `county_name` is a candidate
//!   factor, in the order it appears in the file.
//! - Region filter: rows whose `stfips` is not in the region list are
//!   dropped before any factor levels are computed.

use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Region list shipped next to the birth table.
pub const REGION_LIST_FILE: &str = "fips_with_neighbors.txt";
/// Per-county birth counts and EQI cluster assignments.
pub const DATASET_FILE: &str = "MSDX_day_20180922_SRB_clus_sept.csv";

pub const REGION_COLUMN: &str = "stfips";
pub const STATE_COLUMN: &str = "state";
pub const MALE_COLUMN: &str = "M";
pub const FEMALE_COLUMN: &str = "F";
/// Human-readable county name; dropped on load when present.
pub const NAME_COLUMN: &str = "county_name";

const MISSING_MARKERS: [&str; 2] = ["", "NA"];

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    MissingColumn(String),
    #[error("The input file has no factor columns besides the identifier, state and count columns.")]
    NoFactorColumns,
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Could not read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("The region list '{}' contains no identifiers.", .0.display())]
    EmptyRegionList(PathBuf),
    #[error("Missing value in column '{column}' at data row {row}. Complete data is required.")]
    MissingValue { column: String, row: usize },
    #[error(
        "Column '{column}' must hold non-negative integer counts, found '{value}' at data row {row}."
    )]
    InvalidCount {
        column: String,
        row: usize,
        value: String,
    },
    #[error(
        "No rows of '{}' have an 'stfips' value listed in the region list ({regions} identifiers).",
        .path.display()
    )]
    NoMatchingRows { path: PathBuf, regions: usize },
}

/// Identifiers of the regions retained for analysis.
#[derive(Debug, Clone, Default)]
pub struct RegionList {
    ids: HashSet<String>,
}

impl RegionList {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A categorical column: level labels plus a level code per row.
///
/// Levels are sorted in natural order, so numeric labels sort numerically
/// (`"2" < "10"`). The first level is the reference level of the treatment
/// coding used by the design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    name: String,
    levels: Vec<String>,
    codes: Vec<usize>,
}

impl Factor {
    pub fn from_labels<S: AsRef<str>>(name: &str, labels: &[S]) -> Self {
        let mut levels: Vec<String> = labels
            .iter()
            .map(|l| l.as_ref().to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        levels.sort_by(|a, b| natord::compare(a, b));

        let index: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .map(|(code, level)| (level.as_str(), code))
            .collect();
        let codes = labels.iter().map(|label| index[label.as_ref()]).collect();

        Self {
            name: name.to_string(),
            levels,
            codes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Restricts to `rows`, keeping the full level set so that designs built
    /// on a subset line up with designs built on the whole dataset.
    fn subset(&self, rows: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            levels: self.levels.clone(),
            codes: rows.iter().map(|&r| self.codes[r]).collect(),
        }
    }
}

/// Column-oriented county table restricted to the region list.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// File name the table was read from.
    source: String,
    region_ids: Vec<String>,
    state: Factor,
    male: Vec<u64>,
    female: Vec<u64>,
    factors: Vec<Factor>,
}

impl Dataset {
    pub fn n_rows(&self) -> usize {
        self.region_ids.len()
    }

    pub fn source_name(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> &Factor {
        &self.state
    }

    pub fn male(&self) -> &[u64] {
        &self.male
    }

    pub fn female(&self) -> &[u64] {
        &self.female
    }

    /// Candidate factor names in source-file order.
    pub fn factor_names(&self) -> Vec<&str> {
        self.factors.iter().map(Factor::name).collect()
    }

    pub fn factor(&self, name: &str) -> Option<&Factor> {
        self.factors.iter().find(|f| f.name() == name)
    }

    /// Rows at `rows`, in the given order, with every level set preserved.
    pub fn subset(&self, rows: &[usize]) -> Dataset {
        Dataset {
            source: self.source.clone(),
            region_ids: rows.iter().map(|&r| self.region_ids[r].clone()).collect(),
            state: self.state.subset(rows),
            male: rows.iter().map(|&r| self.male[r]).collect(),
            female: rows.iter().map(|&r| self.female[r]).collect(),
            factors: self.factors.iter().map(|f| f.subset(rows)).collect(),
        }
    }
}

/// Reads a newline-delimited list of region identifiers. Identifiers are
/// kept verbatim (no numeric parsing), blank lines are ignored.
pub fn load_region_list(path: &Path) -> Result<RegionList, DataError> {
    let text = fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let regions = RegionList::from_ids(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty()),
    );
    if regions.is_empty() {
        return Err(DataError::EmptyRegionList(path.to_path_buf()));
    }
    log::info!(
        "Loaded {} region identifiers from '{}'",
        regions.len(),
        path.display()
    );
    Ok(regions)
}

/// Loads the county table and restricts it to `regions`.
pub fn load_dataset(path: &Path, regions: &RegionList) -> Result<Dataset, DataError> {
    log::info!("Loading data from '{}'", path.display());

    let file = File::open(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // Schema inference is disabled so every column arrives as text.
    let mut df = CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .with_parse_options(CsvParseOptions::default().with_separator(b',')),
        )
        .finish()?;

    let column_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let present: HashSet<&str> = column_names.iter().map(String::as_str).collect();

    for required in [REGION_COLUMN, STATE_COLUMN, MALE_COLUMN, FEMALE_COLUMN] {
        if !present.contains(required) {
            return Err(SchemaError::MissingColumn(required.to_string()).into());
        }
    }

    if present.contains(NAME_COLUMN) {
        df = df.drop(NAME_COLUMN)?;
    }

    let factor_names: Vec<&str> = column_names
        .iter()
        .map(String::as_str)
        .filter(|name| {
            ![
                NAME_COLUMN,
                REGION_COLUMN,
                STATE_COLUMN,
                MALE_COLUMN,
                FEMALE_COLUMN,
            ]
            .contains(name)
        })
        .collect();
    if factor_names.is_empty() {
        return Err(SchemaError::NoFactorColumns.into());
    }

    let region_ids = raw_text_column(&df, REGION_COLUMN)?;
    let keep: Vec<usize> = region_ids
        .iter()
        .enumerate()
        .filter(|(_, id)| id.as_deref().is_some_and(|id| regions.contains(id)))
        .map(|(row, _)| row)
        .collect();

    log::info!(
        "Kept {} of {} rows whose '{}' is in the region list",
        keep.len(),
        region_ids.len(),
        REGION_COLUMN
    );
    if keep.is_empty() {
        return Err(DataError::NoMatchingRows {
            path: path.to_path_buf(),
            regions: regions.len(),
        });
    }

    let kept_ids = kept_text_column(&df, REGION_COLUMN, &keep)?;
    let states = kept_text_column(&df, STATE_COLUMN, &keep)?;
    let male = count_column(&df, MALE_COLUMN, &keep)?;
    let female = count_column(&df, FEMALE_COLUMN, &keep)?;

    let mut factors = Vec::with_capacity(factor_names.len());
    for name in &factor_names {
        let labels = kept_text_column(&df, name, &keep)?;
        factors.push(Factor::from_labels(name, &labels));
    }

    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let dataset = Dataset {
        source,
        region_ids: kept_ids,
        state: Factor::from_labels(STATE_COLUMN, &states),
        male,
        female,
        factors,
    };

    log::info!(
        "Dataset ready: {} rows, {} states, {} candidate factors",
        dataset.n_rows(),
        dataset.state().n_levels(),
        factor_names.len()
    );
    Ok(dataset)
}

fn raw_text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| SchemaError::MissingColumn(name.to_string()))?;
    let values = column.as_materialized_series().str()?;
    Ok(values
        .into_iter()
        .map(|value| value.map(|text| text.trim().to_string()))
        .collect())
}

/// Text of the kept rows of a column; missing markers are rejected only for
/// rows that survive the region filter.
fn kept_text_column(df: &DataFrame, name: &str, keep: &[usize]) -> Result<Vec<String>, DataError> {
    let raw = raw_text_column(df, name)?;
    keep.iter()
        .map(|&row| match raw[row].as_deref() {
            Some(text) if !MISSING_MARKERS.contains(&text) => Ok(text.to_string()),
            _ => Err(DataError::MissingValue {
                column: name.to_string(),
                row: row + 1,
            }),
        })
        .collect()
}

/// Parses the kept rows of a count column. Integral decimals such as `12.0`
/// are accepted; negative or fractional values are not.
fn count_column(df: &DataFrame, name: &str, keep: &[usize]) -> Result<Vec<u64>, DataError> {
    let text = kept_text_column(df, name, keep)?;
    keep.iter()
        .zip(&text)
        .map(|(&row, raw)| {
            raw.parse::<u64>()
                .ok()
                .or_else(|| {
                    raw.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
                        .map(|v| v as u64)
                })
                .ok_or_else(|| DataError::InvalidCount {
                    column: name.to_string(),
                    row: row + 1,
                    value: raw.clone(),
                })
        })
        .collect()
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_file(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn regions(ids: &[&str]) -> RegionList {
        RegionList::from_ids(ids.iter().copied())
    }

    #[test]
    fn region_list_keeps_leading_zeros_and_skips_blank_lines() {
        let file = create_test_file("01001\n\n01003 \n").unwrap();
        let list = load_region_list(file.path()).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains("01001"));
        assert!(list.contains("01003"));
        assert!(!list.contains("1001"));
    }

    #[test]
    fn empty_region_list_is_rejected() {
        let file = create_test_file("\n\n").unwrap();
        assert!(matches!(
            load_region_list(file.path()),
            Err(DataError::EmptyRegionList(_))
        ));
    }

    #[test]
    fn rows_outside_region_list_are_dropped() {
        let content = "county_name,stfips,state,M,F,EQI_1,EQI_2\n\
                       Autauga,01001,AL,300,290,1,2\n\
                       Baldwin,01003,AL,1100,1050,2,2\n\
                       Nowhere,99999,ZZ,10,12,3,1\n";
        let file = create_test_file(content).unwrap();
        let data = load_dataset(file.path(), &regions(&["01001", "01003"])).unwrap();

        assert_eq!(data.n_rows(), 2);
        assert_eq!(data.region_ids, vec!["01001", "01003"]);
        assert_eq!(data.male(), &[300, 1100]);
        assert_eq!(data.female(), &[290, 1050]);
        assert_eq!(data.factor_names(), vec!["EQI_1", "EQI_2"]);
        // Levels are computed after filtering, so the dropped row's level is gone.
        assert_eq!(data.factor("EQI_1").unwrap().levels(), &["1", "2"]);
        assert_eq!(data.state().levels(), &["AL"]);
    }

    #[test]
    fn padded_identifiers_match_after_trimming() {
        let content = "stfips,state,M,F,EQI_1\n 01001 ,AL,3,2,1\n1003,AL,4,4,2\n";
        let file = create_test_file(content).unwrap();
        let data = load_dataset(file.path(), &regions(&["01001", "01003"])).unwrap();
        // Trimmed, but never zero-filled: "1003" stays distinct from "01003".
        assert_eq!(data.region_ids, vec!["01001"]);
    }

    #[test]
    fn name_column_is_optional() {
        let content = "stfips,state,M,F,EQI_1\n01001,AL,3,2,1\n";
        let file = create_test_file(content).unwrap();
        let data = load_dataset(file.path(), &regions(&["01001"])).unwrap();
        assert_eq!(data.region_ids, vec!["01001"]);
        assert_eq!(data.state().levels(), &["AL"]);
        assert_eq!((data.male()[0], data.female()[0]), (3, 2));
        assert_eq!(data.factor("EQI_1").unwrap().levels(), &["1"]);
        assert_eq!(
            data.source_name(),
            file.path().file_name().unwrap().to_string_lossy()
        );
    }

    #[test]
    fn numeric_levels_sort_naturally() {
        let factor = Factor::from_labels("EQI", &["10", "2", "1", "2"]);
        assert_eq!(factor.levels(), &["1", "2", "10"]);
        assert_eq!(factor.codes(), &[2, 1, 0, 1]);
    }

    #[test]
    fn subset_keeps_full_level_set() {
        let content = "stfips,state,M,F,EQI_1\n\
                       01001,AL,3,2,1\n\
                       01003,GA,4,4,2\n\
                       01005,GA,5,1,3\n";
        let file = create_test_file(content).unwrap();
        let data = load_dataset(file.path(), &regions(&["01001", "01003", "01005"])).unwrap();
        let sub = data.subset(&[2, 0]);
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(sub.region_ids, vec!["01005", "01001"]);
        assert_eq!(sub.source_name(), data.source_name());
        assert_eq!(sub.factor("EQI_1").unwrap().n_levels(), 3);
        assert_eq!(sub.state().levels(), &["AL", "GA"]);
        assert_eq!(sub.state().codes(), &[1, 0]);
    }

    #[test]
    fn missing_required_column_is_a_schema_error() {
        let content = "stfips,state,M,EQI_1\n01001,AL,3,1\n";
        let file = create_test_file(content).unwrap();
        match load_dataset(file.path(), &regions(&["01001"])) {
            Err(DataError::Schema(SchemaError::MissingColumn(col))) => assert_eq!(col, "F"),
            other => panic!("Expected MissingColumn(F), got {other:?}"),
        }
    }

    #[test]
    fn table_without_factors_is_a_schema_error() {
        let content = "county_name,stfips,state,M,F\nAutauga,01001,AL,3,2\n";
        let file = create_test_file(content).unwrap();
        assert!(matches!(
            load_dataset(file.path(), &regions(&["01001"])),
            Err(DataError::Schema(SchemaError::NoFactorColumns))
        ));
    }

    #[test]
    fn no_matching_rows_is_an_error() {
        let content = "stfips,state,M,F,EQI_1\n01001,AL,3,2,1\n";
        let file = create_test_file(content).unwrap();
        assert!(matches!(
            load_dataset(file.path(), &regions(&["02020"])),
            Err(DataError::NoMatchingRows { regions: 1, .. })
        ));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let content = "stfips,state,M,F,EQI_1\n01001,AL,-3,2,1\n";
        let file = create_test_file(content).unwrap();
        match load_dataset(file.path(), &regions(&["01001"])) {
            Err(DataError::InvalidCount { column, row, value }) => {
                assert_eq!(column, "M");
                assert_eq!(row, 1);
                assert_eq!(value, "-3");
            }
            other => panic!("Expected InvalidCount, got {other:?}"),
        }
    }

    #[test]
    fn integral_decimal_counts_are_accepted() {
        let content = "stfips,state,M,F,EQI_1\n01001,AL,3.0,2,1\n";
        let file = create_test_file(content).unwrap();
        let data = load_dataset(file.path(), &regions(&["01001"])).unwrap();
        assert_eq!(data.male(), &[3]);
    }

    #[test]
    fn na_factor_value_is_rejected() {
        let content = "stfips,state,M,F,EQI_1\n01001,AL,3,2,NA\n";
        let file = create_test_file(content).unwrap();
        match load_dataset(file.path(), &regions(&["01001"])) {
            Err(DataError::MissingValue { column, row }) => {
                assert_eq!(column, "EQI_1");
                assert_eq!(row, 1);
            }
            other => panic!("Expected MissingValue, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_dataset(Path::new("/nonexistent/data.csv"), &regions(&["1"])).unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
    }
}
