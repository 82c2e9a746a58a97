//! In-memory tabular data consumed by training and prediction.

use crate::error::ForestError;

/// Immutable column-major matrix of `f64` values.
///
/// `NaN` marks a missing value. One column must be designated as the
/// outcome before training; treatment, instrument and weight columns are
/// optional. Designated columns are reserved: they are never used as split
/// variables and do not count towards [`Data::num_variables`].
#[derive(Debug, Clone)]
pub struct Data {
    values: Vec<f64>,
    num_rows: usize,
    num_cols: usize,
    outcome_index: Option<usize>,
    treatment_index: Option<usize>,
    instrument_index: Option<usize>,
    weight_index: Option<usize>,
}

impl Data {
    /// Wrap a column-major buffer: `values[col * num_rows + row]`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::DataShapeMismatch`] if `values.len() != num_rows * num_cols`.
    pub fn new(values: Vec<f64>, num_rows: usize, num_cols: usize) -> Result<Self, ForestError> {
        if values.len() != num_rows * num_cols {
            return Err(ForestError::DataShapeMismatch {
                num_rows,
                num_cols,
                got: values.len(),
            });
        }
        Ok(Self {
            values,
            num_rows,
            num_cols,
            outcome_index: None,
            treatment_index: None,
            instrument_index: None,
            weight_index: None,
        })
    }

    /// Build from row-major rows, transposing into column-major storage.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::RaggedRow`] if rows have inconsistent lengths.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ForestError> {
        let num_rows = rows.len();
        let num_cols = rows.first().map_or(0, Vec::len);
        for (row, values) in rows.iter().enumerate() {
            if values.len() != num_cols {
                return Err(ForestError::RaggedRow {
                    row,
                    expected: num_cols,
                    got: values.len(),
                });
            }
        }
        let values = (0..num_cols)
            .flat_map(|col| rows.iter().map(move |r| r[col]))
            .collect();
        Self::new(values, num_rows, num_cols)
    }

    fn check_column(&self, index: usize) -> Result<(), ForestError> {
        if index >= self.num_cols {
            return Err(ForestError::ColumnOutOfRange {
                index,
                num_cols: self.num_cols,
            });
        }
        Ok(())
    }

    /// Designate the outcome column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] for a nonexistent column.
    pub fn set_outcome_index(&mut self, index: usize) -> Result<(), ForestError> {
        self.check_column(index)?;
        self.outcome_index = Some(index);
        Ok(())
    }

    /// Designate the treatment column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] for a nonexistent column.
    pub fn set_treatment_index(&mut self, index: usize) -> Result<(), ForestError> {
        self.check_column(index)?;
        self.treatment_index = Some(index);
        Ok(())
    }

    /// Designate the instrument column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] for a nonexistent column.
    pub fn set_instrument_index(&mut self, index: usize) -> Result<(), ForestError> {
        self.check_column(index)?;
        self.instrument_index = Some(index);
        Ok(())
    }

    /// Designate the sample weight column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] for a nonexistent column.
    pub fn set_weight_index(&mut self, index: usize) -> Result<(), ForestError> {
        self.check_column(index)?;
        self.weight_index = Some(index);
        Ok(())
    }

    /// Return the number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Return the number of columns, reserved ones included.
    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Return the value at `(row, col)`; `NaN` when missing.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is out of range.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(
            row < self.num_rows && col < self.num_cols,
            "({row}, {col}) out of range for {} x {} data",
            self.num_rows,
            self.num_cols
        );
        self.values[col * self.num_rows + row]
    }

    /// Return `true` if the value at `(row, col)` is missing.
    #[must_use]
    pub fn is_missing(&self, row: usize, col: usize) -> bool {
        self.get(row, col).is_nan()
    }

    /// Borrow one full column.
    #[must_use]
    pub fn column(&self, col: usize) -> &[f64] {
        &self.values[col * self.num_rows..(col + 1) * self.num_rows]
    }

    /// Return the outcome column index, if set.
    #[must_use]
    pub fn outcome_index(&self) -> Option<usize> {
        self.outcome_index
    }

    /// Return the treatment column index, if set.
    #[must_use]
    pub fn treatment_index(&self) -> Option<usize> {
        self.treatment_index
    }

    /// Return the instrument column index, if set.
    #[must_use]
    pub fn instrument_index(&self) -> Option<usize> {
        self.instrument_index
    }

    /// Return the weight column index, if set.
    #[must_use]
    pub fn weight_index(&self) -> Option<usize> {
        self.weight_index
    }

    /// Borrow the outcome column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::OutcomeNotSet`] when no outcome was designated.
    pub fn outcomes(&self) -> Result<&[f64], ForestError> {
        self.outcome_index
            .map(|c| self.column(c))
            .ok_or(ForestError::OutcomeNotSet)
    }

    /// Borrow the treatment column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::TreatmentNotSet`] when no treatment was designated.
    pub fn treatments(&self) -> Result<&[f64], ForestError> {
        self.treatment_index
            .map(|c| self.column(c))
            .ok_or(ForestError::TreatmentNotSet)
    }

    /// Borrow the instrument column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InstrumentNotSet`] when no instrument was designated.
    pub fn instruments(&self) -> Result<&[f64], ForestError> {
        self.instrument_index
            .map(|c| self.column(c))
            .ok_or(ForestError::InstrumentNotSet)
    }

    /// Return the weight of `row`, `1.0` when no weight column is set.
    #[must_use]
    pub fn weight(&self, row: usize) -> f64 {
        self.weight_index.map_or(1.0, |c| self.get(row, c))
    }

    fn is_reserved(&self, col: usize) -> bool {
        [
            self.outcome_index,
            self.treatment_index,
            self.instrument_index,
            self.weight_index,
        ]
        .contains(&Some(col))
    }

    /// Return the columns eligible for splitting, in ascending order.
    #[must_use]
    pub fn split_variables(&self) -> Vec<usize> {
        (0..self.num_cols).filter(|&c| !self.is_reserved(c)).collect()
    }

    /// Return the number of columns eligible for splitting.
    #[must_use]
    pub fn num_variables(&self) -> usize {
        (0..self.num_cols).filter(|&c| !self.is_reserved(c)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Data {
        Data::from_rows(&[
            vec![1.0, 2.0, 3.0],
            vec![4.0, f64::NAN, 6.0],
        ])
        .unwrap()
    }

    #[test]
    fn from_rows_is_column_major() {
        let data = sample();
        assert_eq!(data.num_rows(), 2);
        assert_eq!(data.num_cols(), 3);
        assert_eq!(data.get(1, 2), 6.0);
        assert_eq!(data.column(0), &[1.0, 4.0]);
    }

    #[test]
    fn nan_is_missing() {
        let data = sample();
        assert!(data.is_missing(1, 1));
        assert!(!data.is_missing(0, 1));
    }

    #[test]
    fn reserved_columns_are_not_split_variables() {
        let mut data = sample();
        assert_eq!(data.num_variables(), 3);
        data.set_outcome_index(2).unwrap();
        data.set_weight_index(0).unwrap();
        assert_eq!(data.split_variables(), vec![1]);
        assert_eq!(data.num_variables(), 1);
        assert_eq!(data.outcomes().unwrap(), &[3.0, 6.0]);
        assert_eq!(data.weight(1), 4.0);
    }

    #[test]
    fn out_of_range_column_rejected() {
        let mut data = sample();
        let err = data.set_outcome_index(3).unwrap_err();
        assert!(matches!(err, ForestError::ColumnOutOfRange { index: 3, num_cols: 3 }));
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = Data::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, ForestError::RaggedRow { row: 1, expected: 2, got: 1 }));
    }

    #[test]
    fn shape_mismatch_rejected() {
        let err = Data::new(vec![1.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, ForestError::DataShapeMismatch { got: 5, .. }));
    }

    #[test]
    fn unset_outcome_is_an_error() {
        assert!(matches!(sample().outcomes(), Err(ForestError::OutcomeNotSet)));
        assert_eq!(sample().weight(0), 1.0);
    }
}
