//! Numeric matrix loading and input validation
//!
//! The pipeline consumes already-transformed numeric matrices laid out as
//! feature columns followed by one trailing label column.

use std::path::Path;

use ndarray::{s, Array1, Array2};
use polars::prelude::*;
use tracing::debug;

use crate::error::{Result, TrainerError};
use crate::training::unique_classes;

/// Features and labels of one split
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub labels: Array1<f64>,
}

impl Dataset {
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Split a matrix whose last column is the label
    pub fn from_matrix(matrix: &Array2<f64>) -> Result<Self> {
        let (features, labels) = split_features_label(matrix)?;
        Ok(Self { features, labels })
    }
}

/// Read a CSV with a header row into a dense `f64` matrix
pub fn load_csv_matrix(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    let path = path.as_ref().to_path_buf();
    if !path.exists() {
        return Err(TrainerError::DataError(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(1000))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.clone()))?
        .finish()?;

    let matrix = dataframe_to_matrix(&df)?;
    debug!(path = %path.display(), rows = matrix.nrows(), cols = matrix.ncols(), "Loaded CSV");
    Ok(matrix)
}

/// Convert every column of `df` to `f64`, rejecting nulls
pub fn dataframe_to_matrix(df: &DataFrame) -> Result<Array2<f64>> {
    let (n_rows, n_cols) = df.shape();
    let mut matrix = Array2::<f64>::zeros((n_rows, n_cols));

    for (j, column) in df.get_columns().iter().enumerate() {
        let name = column.name().to_string();
        let cast = column.cast(&DataType::Float64).map_err(|e| {
            TrainerError::DataError(format!("column {} is not numeric: {}", name, e))
        })?;
        let values = cast.f64()?;
        for (i, value) in values.into_iter().enumerate() {
            matrix[[i, j]] = value.ok_or_else(|| {
                TrainerError::DataError(format!("column {} has a missing value at row {}", name, i))
            })?;
        }
    }

    Ok(matrix)
}

/// Separate the trailing label column from the feature columns
pub fn split_features_label(matrix: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>)> {
    if matrix.ncols() < 2 {
        return Err(TrainerError::ShapeError {
            expected: "at least one feature column and a label column".to_string(),
            actual: format!("{} columns", matrix.ncols()),
        });
    }
    let label_col = matrix.ncols() - 1;
    let features = matrix.slice(s![.., ..label_col]).to_owned();
    let labels = matrix.column(label_col).to_owned();
    Ok((features, labels))
}

fn check_finite(name: &str, values: impl IntoIterator<Item = f64>) -> Result<()> {
    if values.into_iter().any(|v| !v.is_finite()) {
        return Err(TrainerError::DataError(format!(
            "{} matrix contains non-finite values",
            name
        )));
    }
    Ok(())
}

/// Check a train/test pair before any fitting
pub fn validate_split(train: &Dataset, test: &Dataset) -> Result<()> {
    if train.n_samples() == 0 {
        return Err(TrainerError::DataError("training matrix is empty".to_string()));
    }
    if test.n_samples() == 0 {
        return Err(TrainerError::DataError("test matrix is empty".to_string()));
    }
    if train.n_features() == 0 {
        return Err(TrainerError::DataError("no feature columns".to_string()));
    }
    if train.n_features() != test.n_features() {
        return Err(TrainerError::ShapeError {
            expected: format!("{} test features", train.n_features()),
            actual: format!("{} test features", test.n_features()),
        });
    }
    if train.labels.len() != train.n_samples() || test.labels.len() != test.n_samples() {
        return Err(TrainerError::ShapeError {
            expected: "one label per row".to_string(),
            actual: format!(
                "train {}/{} test {}/{}",
                train.labels.len(),
                train.n_samples(),
                test.labels.len(),
                test.n_samples()
            ),
        });
    }

    check_finite("training", train.features.iter().chain(train.labels.iter()).copied())?;
    check_finite("test", test.features.iter().chain(test.labels.iter()).copied())?;

    let classes = unique_classes(&train.labels);
    if classes.len() < 2 {
        return Err(TrainerError::DataError(format!(
            "training labels need at least two classes, found {}",
            classes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn dataset(features: Array2<f64>, labels: Array1<f64>) -> Dataset {
        Dataset { features, labels }
    }

    #[test]
    fn test_split_features_label() {
        let m = array![[1.0, 2.0, 0.0], [3.0, 4.0, 1.0]];
        let (x, y) = split_features_label(&m).unwrap();
        assert_eq!(x, array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(y, array![0.0, 1.0]);

        assert!(split_features_label(&array![[1.0], [0.0]]).is_err());
    }

    #[test]
    fn test_load_csv_matrix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train.csv");
        std::fs::write(&path, "air_temp,torque,failure\n298.1,42.8,0\n301.5,60,1\n").unwrap();

        let m = load_csv_matrix(&path).unwrap();
        assert_eq!(m, array![[298.1, 42.8, 0.0], [301.5, 60.0, 1.0]]);
    }

    #[test]
    fn test_load_csv_rejects_missing_values_and_text() {
        let dir = TempDir::new().unwrap();
        let gaps = dir.path().join("gaps.csv");
        std::fs::write(&gaps, "a,b\n1,\n2,1\n").unwrap();
        assert!(matches!(load_csv_matrix(&gaps), Err(TrainerError::DataError(_))));

        assert!(load_csv_matrix(dir.path().join("absent.csv")).is_err());
    }

    #[test]
    fn test_validate_split() {
        let train = dataset(array![[0.0], [1.0]], array![0.0, 1.0]);
        let test = dataset(array![[0.5]], array![1.0]);
        assert!(validate_split(&train, &test).is_ok());

        let wide = dataset(array![[0.5, 0.5]], array![1.0]);
        assert!(matches!(
            validate_split(&train, &wide),
            Err(TrainerError::ShapeError { .. })
        ));

        let single_class = dataset(array![[0.0], [1.0]], array![1.0, 1.0]);
        assert!(validate_split(&single_class, &test).is_err());

        let nan = dataset(array![[f64::NAN], [1.0]], array![0.0, 1.0]);
        assert!(validate_split(&nan, &test).is_err());

        let empty = dataset(Array2::zeros((0, 1)), Array1::zeros(0));
        assert!(validate_split(&train, &empty).is_err());
    }
}
