//! Result files written under the `KFOLDCV` output directory.

use crate::compare::ComparisonTable;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Output directory, relative to the data directory.
pub const OUTPUT_DIR: &str = "KFOLDCV";

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Could not write '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not write comparison rows to '{}': {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

pub fn summary_path(out_dir: &Path, factor: &str) -> PathBuf {
    out_dir.join(format!("Summ_{factor}_state.out"))
}

pub fn kfold_log_path(out_dir: &Path, factor: &str) -> PathBuf {
    out_dir.join(format!("KFOLD_random_{factor}.out"))
}

/// Creates `<data_dir>/KFOLDCV` if it does not exist yet.
pub fn ensure_output_dir(data_dir: &Path) -> Result<PathBuf, OutputError> {
    let dir = data_dir.join(OUTPUT_DIR);
    fs::create_dir_all(&dir).map_err(|source| OutputError::Io {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Writes the model summary, replacing any previous file.
pub fn write_summary(path: &Path, text: &str) -> Result<(), OutputError> {
    fs::write(path, text).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Adds one repetition's comparison to the tab-delimited log.
///
/// Repetition 1 starts a fresh file with a header line; later repetitions
/// append their rows only.
pub fn append_comparison(
    path: &Path,
    table: &ComparisonTable,
    repetition: u32,
) -> Result<(), OutputError> {
    let first = repetition <= 1;
    let file: File = if first {
        File::create(path)
    } else {
        OpenOptions::new().create(true).append(true).open(path)
    }
    .map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let csv_error = |source: csv::Error| OutputError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(file);

    if first {
        writer
            .write_record(ComparisonTable::COLUMNS)
            .map_err(csv_error)?;
    }

    let mut buffer = ryu::Buffer::new();
    for row in &table.rows {
        let mut record = Vec::with_capacity(ComparisonTable::COLUMNS.len());
        record.push(row.model.clone());
        for value in [
            row.elpd_kfold,
            row.se_elpd_kfold,
            row.kfoldic,
            row.se_kfoldic,
            row.elpd_diff,
            row.se_diff,
        ] {
            record.push(buffer.format(value).to_string());
        }
        writer.write_record(&record).map_err(csv_error)?;
    }

    writer.flush().map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare;
    use crate::kfold::KFoldEstimate;
    use ndarray::array;
    use tempfile::tempdir;

    fn table() -> ComparisonTable {
        compare(&[
            KFoldEstimate::from_pointwise("null", array![-3.0, -2.5]),
            KFoldEstimate::from_pointwise("EQI_2", array![-2.0, -2.5]),
        ])
        .unwrap()
    }

    #[test]
    fn file_names_follow_factor() {
        let dir = Path::new("/data/KFOLDCV");
        assert_eq!(
            summary_path(dir, "EQI_3"),
            PathBuf::from("/data/KFOLDCV/Summ_EQI_3_state.out")
        );
        assert_eq!(
            kfold_log_path(dir, "EQI_3"),
            PathBuf::from("/data/KFOLDCV/KFOLD_random_EQI_3.out")
        );
    }

    #[test]
    fn single_repetition_has_header_and_two_rows() {
        let dir = tempdir().unwrap();
        let path = kfold_log_path(dir.path(), "EQI_2");
        append_comparison(&path, &table(), 1).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "model\telpd_kfold\tse_elpd_kfold\tkfoldic\tse_kfoldic\telpd_diff\tse_diff"
        );
        assert!(lines[1].starts_with("EQI_2\t-4.5\t"));
        assert!(lines[1].ends_with("\t0.0\t0.0"));
        assert!(lines[2].starts_with("null\t-5.5\t"));
    }

    #[test]
    fn later_repetitions_append_without_header() {
        let dir = tempdir().unwrap();
        let path = kfold_log_path(dir.path(), "EQI_2");
        for rep in 1..=3 {
            append_comparison(&path, &table(), rep).unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 7);
        assert_eq!(text.lines().filter(|l| l.starts_with("model\t")).count(), 1);

        // A new run starting at repetition 1 replaces the old log.
        append_comparison(&path, &table(), 1).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn output_dir_is_created() {
        let dir = tempdir().unwrap();
        let out = ensure_output_dir(dir.path()).unwrap();
        assert!(out.is_dir());
        assert!(out.ends_with(OUTPUT_DIR));
        let summary = summary_path(&out, "EQI_1");
        write_summary(&summary, "first").unwrap();
        write_summary(&summary, "second").unwrap();
        assert_eq!(fs::read_to_string(summary).unwrap(), "second");
    }
}
