//! I/O error types for grove-io.

use std::path::PathBuf;

use grove_forest::ForestError;

/// Errors from CSV loading and prediction output.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The CSV file could not be opened.
    #[error("cannot open {path}")]
    FileNotFound {
        /// Path of the CSV file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the CSV parser encounters a malformed record.
    #[error("malformed CSV in {path} near byte {offset}")]
    CsvParse {
        /// Path to the CSV file.
        path: PathBuf,
        /// Byte position reported by the parser.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when the file has a header and nothing else.
    #[error("{path} has a header but no data rows")]
    EmptyDataset {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Returned when a record is shorter or longer than the header.
    #[error("inconsistent row length in {path}: row {row_index} has {got} columns, expected {expected}")]
    InconsistentRowLength {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based data row, header not counted.
        row_index: usize,
        /// Header width.
        expected: usize,
        /// Width of the offending record.
        got: usize,
    },

    /// Returned when a cell is neither a finite number nor a missing-value marker.
    #[error("invalid value in {path}: row {row_index}, column {col_index}, raw value \"{raw}\"")]
    InvalidValue {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based data row, header not counted.
        row_index: usize,
        /// Zero-based column index.
        col_index: usize,
        /// Cell text as read.
        raw: String,
    },

    /// Returned when a column name is not in the header.
    #[error("no column named \"{name}\"")]
    UnknownColumn {
        /// The requested column name.
        name: String,
    },

    /// Returned when the parsed values cannot form a dataset.
    #[error("invalid dataset")]
    Data {
        /// Underlying forest error.
        #[from]
        source: ForestError,
    },

    /// Returned when the prediction file cannot be created.
    #[error("cannot create {path}")]
    WriteFile {
        /// File or directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a prediction record cannot be written.
    #[error("CSV write error in {path}")]
    CsvWrite {
        /// Path to the output file.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },
}
