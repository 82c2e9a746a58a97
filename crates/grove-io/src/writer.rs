//! CSV writer for forest predictions.

use std::fs;
use std::path::{Path, PathBuf};

use grove_forest::Prediction;
use tracing::{info, instrument};

use crate::IoError;

/// Writes one CSV row per [`Prediction`].
///
/// Columns are `prediction` (or `prediction_0`, `prediction_1`, ... for
/// multi-valued predictions) followed by matching `variance` columns when
/// the first prediction carries variance estimates. Undefined values are
/// written as `NaN`.
pub struct PredictionWriter {
    path: PathBuf,
}

impl PredictionWriter {
    /// Create a writer targeting `path`. Parent directories are created on write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write `predictions` to the target file, replacing it if it exists.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::WriteFile`] | the file or its directory cannot be created |
    /// | [`IoError::CsvWrite`] | a record cannot be written |
    #[instrument(skip_all, fields(path = %self.path.display(), n_predictions = predictions.len()))]
    pub fn write(&self, predictions: &[Prediction]) -> Result<(), IoError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| IoError::WriteFile {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = fs::File::create(&self.path).map_err(|e| IoError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;
        let mut wtr = csv::Writer::from_writer(file);

        let width = predictions.first().map_or(1, |p| p.predictions().len());
        let with_variance = predictions
            .first()
            .is_some_and(|p| p.variance_estimates().is_some());

        wtr.write_record(header(width, with_variance))
            .map_err(|e| self.csv_error(e))?;

        for prediction in predictions {
            let mut record: Vec<String> =
                prediction.predictions().iter().map(|v| format_value(*v)).collect();
            if with_variance {
                match prediction.variance_estimates() {
                    Some(variances) => record.extend(variances.iter().map(|v| format_value(*v))),
                    None => record.extend(std::iter::repeat_n(format_value(f64::NAN), width)),
                }
            }
            wtr.write_record(&record).map_err(|e| self.csv_error(e))?;
        }

        wtr.flush().map_err(|e| IoError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;

        info!("predictions written");
        Ok(())
    }

    fn csv_error(&self, e: csv::Error) -> IoError {
        IoError::CsvWrite {
            path: self.path.clone(),
            source: e,
        }
    }
}

fn header(width: usize, with_variance: bool) -> Vec<String> {
    let names = |base: &str| -> Vec<String> {
        if width == 1 {
            vec![base.to_string()]
        } else {
            (0..width).map(|i| format!("{base}_{i}")).collect()
        }
    };
    let mut header = names("prediction");
    if with_variance {
        header.extend(names("variance"));
    }
    header
}

fn format_value(v: f64) -> String {
    if v.is_nan() { "NaN".to_string() } else { v.to_string() }
}
