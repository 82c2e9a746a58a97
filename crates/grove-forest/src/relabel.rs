//! Relabeling strategies: map a node's samples to the responses a
//! splitting rule scores.

use std::fmt;

use crate::data::Data;
use crate::error::ForestError;

/// Turns the samples of a node into one response per sample.
///
/// Returning `None` stops splitting: the node becomes a leaf.
pub trait RelabelingStrategy: Send + Sync + fmt::Debug {
    /// Compute responses for `samples`, in the same order.
    fn relabel(&self, samples: &[usize], data: &Data) -> Option<Vec<f64>>;

    /// Check that `data` has every column this strategy reads.
    ///
    /// # Errors
    ///
    /// Returns the `*NotSet` variant for the first missing column.
    fn validate(&self, data: &Data) -> Result<(), ForestError> {
        data.outcomes().map(|_| ())
    }
}

/// Uses the outcome column as-is (regression forests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRelabeling;

impl RelabelingStrategy for NoopRelabeling {
    fn relabel(&self, samples: &[usize], data: &Data) -> Option<Vec<f64>> {
        let outcomes = data.outcomes().ok()?;
        Some(samples.iter().map(|&s| outcomes[s]).collect())
    }
}

/// Below this magnitude the first-stage covariance is treated as zero.
const FIRST_STAGE_EPSILON: f64 = 1e-10;

/// Influence-function responses for instrumental-variable forests.
///
/// With node means of outcome Y, treatment W and instrument Z, the local
/// effect is `tau = cov(Z, Y) / cov(Z, W)` and each sample's response is
/// `(z - z̄) * ((y - ȳ) - tau * (w - w̄))`. A causal forest is the special case
/// where the treatment serves as its own instrument.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentalRelabeling {
    treatment_as_instrument: bool,
}

impl InstrumentalRelabeling {
    /// Relabeling for an explicit instrument column.
    #[must_use]
    pub fn instrumental() -> Self {
        Self {
            treatment_as_instrument: false,
        }
    }

    /// Relabeling for a causal forest (instrument = treatment).
    #[must_use]
    pub fn causal() -> Self {
        Self {
            treatment_as_instrument: true,
        }
    }

    fn instrument_column<'a>(&self, data: &'a Data) -> Result<&'a [f64], ForestError> {
        if self.treatment_as_instrument {
            data.treatments()
        } else {
            data.instruments()
        }
    }
}

impl RelabelingStrategy for InstrumentalRelabeling {
    fn relabel(&self, samples: &[usize], data: &Data) -> Option<Vec<f64>> {
        if samples.is_empty() {
            return None;
        }
        let outcomes = data.outcomes().ok()?;
        let treatments = data.treatments().ok()?;
        let instruments = self.instrument_column(data).ok()?;

        let mut total_weight = 0.0;
        let (mut sum_y, mut sum_w, mut sum_z) = (0.0, 0.0, 0.0);
        for &s in samples {
            let weight = data.weight(s);
            total_weight += weight;
            sum_y += weight * outcomes[s];
            sum_w += weight * treatments[s];
            sum_z += weight * instruments[s];
        }
        if total_weight <= 0.0 {
            return None;
        }
        let mean_y = sum_y / total_weight;
        let mean_w = sum_w / total_weight;
        let mean_z = sum_z / total_weight;

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for &s in samples {
            let weight = data.weight(s);
            let z = instruments[s] - mean_z;
            numerator += weight * z * (outcomes[s] - mean_y);
            denominator += weight * z * (treatments[s] - mean_w);
        }
        if denominator.abs() <= FIRST_STAGE_EPSILON {
            return None;
        }
        let local_effect = numerator / denominator;

        Some(
            samples
                .iter()
                .map(|&s| {
                    let residual = (outcomes[s] - mean_y) - local_effect * (treatments[s] - mean_w);
                    (instruments[s] - mean_z) * residual
                })
                .collect(),
        )
    }

    fn validate(&self, data: &Data) -> Result<(), ForestError> {
        data.outcomes()?;
        data.treatments()?;
        self.instrument_column(data)?;
        Ok(())
    }
}

/// Labels each outcome with the index of the node-level quantile bucket it
/// falls in (quantile forests).
///
/// Responses are class indices in `0..=quantiles.len()` stored as `f64`.
#[derive(Debug, Clone)]
pub struct QuantileRelabeling {
    quantiles: Vec<f64>,
}

impl QuantileRelabeling {
    /// Create a relabeling for the given quantile levels.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidQuantiles`] unless the levels are
    /// non-empty, strictly increasing and inside (0, 1).
    pub fn new(quantiles: Vec<f64>) -> Result<Self, ForestError> {
        validate_quantiles(&quantiles)?;
        Ok(Self { quantiles })
    }

    /// Return the number of distinct labels this relabeling can produce.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.quantiles.len() + 1
    }
}

impl RelabelingStrategy for QuantileRelabeling {
    fn relabel(&self, samples: &[usize], data: &Data) -> Option<Vec<f64>> {
        if samples.is_empty() {
            return None;
        }
        let outcomes = data.outcomes().ok()?;
        let mut sorted: Vec<f64> = samples.iter().map(|&s| outcomes[s]).collect();
        sorted.sort_unstable_by(f64::total_cmp);

        let n = sorted.len();
        let mut cutoffs: Vec<f64> = self
            .quantiles
            .iter()
            .map(|&q| {
                let position = ((n as f64 * q).ceil() as usize).max(1) - 1;
                sorted[position.min(n - 1)]
            })
            .collect();
        cutoffs.dedup();

        let labels: Vec<f64> = samples
            .iter()
            .map(|&s| cutoffs.partition_point(|&c| c < outcomes[s]) as f64)
            .collect();

        let first = labels[0];
        if labels.iter().all(|&l| l == first) {
            return None;
        }
        Some(labels)
    }
}

/// Check that quantile levels are usable.
pub(crate) fn validate_quantiles(quantiles: &[f64]) -> Result<(), ForestError> {
    let in_range = quantiles.iter().all(|&q| q > 0.0 && q < 1.0);
    let increasing = quantiles.windows(2).all(|w| w[0] < w[1]);
    if quantiles.is_empty() || !in_range || !increasing {
        return Err(ForestError::InvalidQuantiles {
            quantiles: quantiles.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with(columns: &[Vec<f64>]) -> Data {
        let num_rows = columns[0].len();
        let values: Vec<f64> = columns.iter().flatten().copied().collect();
        Data::new(values, num_rows, columns.len()).unwrap()
    }

    #[test]
    fn noop_returns_outcomes() {
        let mut data = data_with(&[vec![0.0, 1.0, 2.0], vec![5.0, 6.0, 7.0]]);
        data.set_outcome_index(1).unwrap();
        let responses = NoopRelabeling.relabel(&[2, 0], &data).unwrap();
        assert_eq!(responses, vec![7.0, 5.0]);
    }

    #[test]
    fn causal_requires_treatment() {
        let mut data = data_with(&[vec![0.0, 1.0], vec![5.0, 6.0]]);
        data.set_outcome_index(1).unwrap();
        assert!(matches!(
            InstrumentalRelabeling::causal().validate(&data),
            Err(ForestError::TreatmentNotSet)
        ));
        data.set_treatment_index(0).unwrap();
        assert!(InstrumentalRelabeling::causal().validate(&data).is_ok());
        assert!(matches!(
            InstrumentalRelabeling::instrumental().validate(&data),
            Err(ForestError::InstrumentNotSet)
        ));
    }

    #[test]
    fn causal_responses_sum_to_zero() {
        // y = 2 * w + x, so the local effect is exactly recoverable.
        let w = vec![0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let x = vec![0.5, 0.1, 0.9, 0.3, 0.7, 0.2];
        let y: Vec<f64> = w.iter().zip(&x).map(|(w, x)| 2.0 * w + x).collect();
        let mut data = data_with(&[x, w, y]);
        data.set_treatment_index(1).unwrap();
        data.set_outcome_index(2).unwrap();

        let samples: Vec<usize> = (0..6).collect();
        let responses = InstrumentalRelabeling::causal().relabel(&samples, &data).unwrap();
        let total: f64 = responses.iter().sum();
        assert!(total.abs() < 1e-10, "total = {total}");
    }

    #[test]
    fn constant_treatment_stops_splitting() {
        let mut data = data_with(&[vec![1.0, 1.0, 1.0], vec![3.0, 4.0, 5.0]]);
        data.set_treatment_index(0).unwrap();
        data.set_outcome_index(1).unwrap();
        assert!(InstrumentalRelabeling::causal().relabel(&[0, 1, 2], &data).is_none());
    }

    #[test]
    fn quantile_labels_follow_cutoffs() {
        let mut data = data_with(&[vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]]);
        data.set_outcome_index(0).unwrap();
        let relabeling = QuantileRelabeling::new(vec![0.25, 0.5, 0.75]).unwrap();
        assert_eq!(relabeling.num_classes(), 4);

        let samples: Vec<usize> = (0..8).collect();
        let labels = relabeling.relabel(&samples, &data).unwrap();
        // Cutoffs are 2, 4, 6.
        assert_eq!(labels, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn quantile_constant_outcome_stops() {
        let mut data = data_with(&[vec![3.0; 5]]);
        data.set_outcome_index(0).unwrap();
        let relabeling = QuantileRelabeling::new(vec![0.5]).unwrap();
        assert!(relabeling.relabel(&[0, 1, 2, 3, 4], &data).is_none());
    }

    #[test]
    fn invalid_quantiles_rejected() {
        assert!(QuantileRelabeling::new(vec![]).is_err());
        assert!(QuantileRelabeling::new(vec![0.5, 0.5]).is_err());
        assert!(QuantileRelabeling::new(vec![0.0, 0.5]).is_err());
        assert!(QuantileRelabeling::new(vec![0.1, 0.9]).is_ok());
    }
}
