use crate::data::Dataset;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Factor index {index} is out of range; the dataset has {count} factors (valid: 1..={count}).")]
    IndexOutOfRange { index: i64, count: usize },
}

/// Resolves a 1-based factor index to the factor's column name.
///
/// Factors are the dataset columns other than the identifier, state and
/// count columns, in the order they appear in the source file.
pub fn select_factor(data: &Dataset, index: i64) -> Result<&str, SelectionError> {
    let names = data.factor_names();
    let count = names.len();
    let name = usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| names.get(i).copied())
        .ok_or(SelectionError::IndexOutOfRange { index, count })?;
    log::info!("Selected factor {index} of {count}: {name}");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RegionList, load_dataset};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dataset() -> Dataset {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "stfips,state,M,F,EQI_1,EQI_2\n01001,AL,10,9,1,2\n01003,AL,12,13,2,1\n"
        )
        .unwrap();
        file.flush().unwrap();
        load_dataset(file.path(), &RegionList::from_ids(["01001", "01003"])).unwrap()
    }

    #[test]
    fn indices_follow_source_column_order() {
        let data = dataset();
        assert_eq!(select_factor(&data, 1).unwrap(), "EQI_1");
        assert_eq!(select_factor(&data, 2).unwrap(), "EQI_2");
    }

    #[test]
    fn selection_is_repeatable() {
        let data = dataset();
        assert_eq!(
            select_factor(&data, 2).unwrap(),
            select_factor(&data, 2).unwrap()
        );
    }

    #[test]
    fn negative_index_is_out_of_range() {
        assert_eq!(
            select_factor(&dataset(), -1),
            Err(SelectionError::IndexOutOfRange { index: -1, count: 2 })
        );
    }

    #[test]
    fn zero_and_past_end_are_out_of_range() {
        let data = dataset();
        assert_eq!(
            select_factor(&data, 0),
            Err(SelectionError::IndexOutOfRange { index: 0, count: 2 })
        );
        assert_eq!(
            select_factor(&data, 3),
            Err(SelectionError::IndexOutOfRange { index: 3, count: 2 })
        );
    }
}
