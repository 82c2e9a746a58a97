//! CSV reader producing forest training data.

use std::path::{Path, PathBuf};

use grove_forest::Data;
use tracing::{debug, info, instrument};

use crate::IoError;

/// A loaded CSV: header names alongside the numeric [`Data`].
#[derive(Debug, Clone)]
pub struct Dataset {
    column_names: Vec<String>,
    data: Data,
}

impl Dataset {
    /// Return the header names, one per data column.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Borrow the data.
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Mutably borrow the data, e.g. to designate outcome or treatment columns.
    pub fn data_mut(&mut self) -> &mut Data {
        &mut self.data
    }

    /// Consume the dataset and return its data.
    pub fn into_data(self) -> Data {
        self.data
    }

    /// Return the position of the column called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::UnknownColumn`] if no header matches.
    pub fn column_index(&self, name: &str) -> Result<usize, IoError> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| IoError::UnknownColumn {
                name: name.to_string(),
            })
    }

    /// Remove the column called `name` and return its values.
    ///
    /// Column designations on the data are cleared, since indices shift.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::UnknownColumn`] if no header matches.
    pub fn remove_column(&mut self, name: &str) -> Result<Vec<f64>, IoError> {
        let index = self.column_index(name)?;
        let removed = self.data.column(index).to_vec();

        let num_rows = self.data.num_rows();
        let num_cols = self.data.num_cols();
        let values: Vec<f64> = (0..num_cols)
            .filter(|&col| col != index)
            .flat_map(|col| self.data.column(col).iter().copied())
            .collect();
        self.data = Data::new(values, num_rows, num_cols - 1)?;
        self.column_names.remove(index);
        Ok(removed)
    }
}

/// Reads a CSV file with a header row into a [`Dataset`].
///
/// Every cell must be a finite number or a missing-value marker: an empty
/// cell, `NA` or `NaN` (any case). Missing values are stored as `NaN`.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::InvalidValue`] | Cell is infinite or not a number |
pub struct DataReader {
    path: PathBuf,
}

impl DataReader {
    /// Create a new reader for the given CSV file path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read the file and return only the data.
    pub fn read(&self) -> Result<Data, IoError> {
        self.read_dataset().map(Dataset::into_data)
    }

    /// Read the file, keeping the header names.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read_dataset(&self) -> Result<Dataset, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) so our own InconsistentRowLength check fires instead
        // of a low-level CsvParse error.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| self.parse_error(e))?;
        let column_names: Vec<String> = header.iter().map(str::to_string).collect();
        let num_cols = column_names.len();
        debug!(num_cols, "read CSV header");

        let mut rows: Vec<Vec<f64>> = Vec::new();
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| self.parse_error(e))?;
            if record.len() != num_cols {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected: num_cols,
                    got: record.len(),
                });
            }

            let row = record
                .iter()
                .enumerate()
                .map(|(col_index, raw)| {
                    parse_cell(raw).ok_or_else(|| IoError::InvalidValue {
                        path: self.path.clone(),
                        row_index,
                        col_index,
                        raw: raw.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>, IoError>>()?;
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        let data = Data::from_rows(&rows)?;
        let missing = (0..data.num_cols())
            .map(|c| data.column(c).iter().filter(|v| v.is_nan()).count())
            .sum::<usize>();
        info!(
            num_rows = data.num_rows(),
            num_cols = data.num_cols(),
            missing,
            "dataset loaded"
        );

        Ok(Dataset { column_names, data })
    }

    fn parse_error(&self, e: csv::Error) -> IoError {
        IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        }
    }
}

/// Parse one cell; `None` if it is neither a finite number nor a missing marker.
fn parse_cell(raw: &str) -> Option<f64> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
