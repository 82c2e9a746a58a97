//! Prediction strategies: turn the leaves a row falls into across the
//! forest into point estimates and variance estimates.

use std::f64::consts::{PI, SQRT_2};
use std::fmt;

use statrs::function::erf::erfc;

use crate::data::Data;
use crate::error::ForestError;
use crate::relabel::validate_quantiles;

/// Estimates for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    predictions: Vec<f64>,
    variance_estimates: Option<Vec<f64>>,
}

impl Prediction {
    /// Create a prediction from its point estimates and optional variances.
    #[must_use]
    pub fn new(predictions: Vec<f64>, variance_estimates: Option<Vec<f64>>) -> Self {
        Self {
            predictions,
            variance_estimates,
        }
    }

    /// The prediction for a row that no tree could estimate: every value is `NaN`.
    #[must_use]
    pub fn undefined(prediction_length: usize, with_variance: bool) -> Self {
        Self {
            predictions: vec![f64::NAN; prediction_length],
            variance_estimates: with_variance.then(|| vec![f64::NAN; prediction_length]),
        }
    }

    /// Return the point estimates.
    #[must_use]
    pub fn predictions(&self) -> &[f64] {
        &self.predictions
    }

    /// Return the variance estimates, if they were requested.
    #[must_use]
    pub fn variance_estimates(&self) -> Option<&[f64]> {
        self.variance_estimates.as_deref()
    }

    /// Return `true` if no tree contributed to this prediction.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        self.predictions.iter().all(|p| p.is_nan())
    }
}

/// Computes estimates from the training samples sharing a row's leaves.
///
/// `leaves` has one entry per tree, in forest order: `Some(samples)` when the
/// tree contributes to the row, `None` when it is excluded (out-of-bag) or
/// its leaf is empty. Sample ids index into the training data.
pub trait PredictionStrategy: Send + Sync + fmt::Debug {
    /// Number of values predicted per row.
    fn prediction_length(&self) -> usize;

    /// Check that the training data has every column this strategy reads.
    ///
    /// # Errors
    ///
    /// Returns the `*NotSet` variant for the first missing column.
    fn validate(&self, train_data: &Data) -> Result<(), ForestError> {
        train_data.outcomes().map(|_| ())
    }

    /// Point estimates for one row. At least one entry of `leaves` is `Some`.
    fn predict(&self, train_data: &Data, leaves: &[Option<&[usize]>]) -> Vec<f64>;

    /// Whether [`PredictionStrategy::compute_variance`] produces estimates.
    fn has_variance(&self) -> bool {
        true
    }

    /// Variance estimates for one row, or `None` if this strategy has none.
    ///
    /// Trees `g * ci_group_size .. (g + 1) * ci_group_size` form group `g`.
    fn compute_variance(
        &self,
        train_data: &Data,
        leaves: &[Option<&[usize]>],
        ci_group_size: usize,
    ) -> Option<Vec<f64>>;
}

/// Averages leaf outcome means across trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionPredictionStrategy;

impl RegressionPredictionStrategy {
    fn leaf_means(train_data: &Data, leaves: &[Option<&[usize]>]) -> Vec<Option<f64>> {
        let Ok(outcomes) = train_data.outcomes() else {
            return vec![None; leaves.len()];
        };
        leaves
            .iter()
            .map(|leaf| {
                let samples = (*leaf)?;
                let mut total_weight = 0.0;
                let mut sum = 0.0;
                for &s in samples {
                    let weight = train_data.weight(s);
                    total_weight += weight;
                    sum += weight * outcomes[s];
                }
                (total_weight > 0.0).then(|| sum / total_weight)
            })
            .collect()
    }
}

impl PredictionStrategy for RegressionPredictionStrategy {
    fn prediction_length(&self) -> usize {
        1
    }

    fn predict(&self, train_data: &Data, leaves: &[Option<&[usize]>]) -> Vec<f64> {
        let means = Self::leaf_means(train_data, leaves);
        vec![mean_of_present(means.iter().copied())]
    }

    fn compute_variance(
        &self,
        train_data: &Data,
        leaves: &[Option<&[usize]>],
        ci_group_size: usize,
    ) -> Option<Vec<f64>> {
        let means = Self::leaf_means(train_data, leaves);
        let average = mean_of_present(means.iter().copied());
        let psi: Vec<Option<f64>> = means.iter().map(|m| m.map(|m| m - average)).collect();
        Some(vec![little_bags_variance(&psi, ci_group_size)])
    }
}

/// Per-leaf averages used by instrumental prediction.
#[derive(Debug, Clone, Copy)]
struct InstrumentalLeaf {
    y: f64,
    w: f64,
    z: f64,
    yz: f64,
    wz: f64,
}

/// Below this magnitude the first-stage covariance is treated as zero.
const FIRST_STAGE_EPSILON: f64 = 1e-10;

/// Local instrumental-variable effect estimates.
///
/// Each tree contributes leaf means of Y, W, Z, YZ and WZ; the estimate is
/// `(YZ - Y * Z) / (WZ - W * Z)` on the across-tree averages. A causal
/// predictor reads the treatment column as the instrument.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentalPredictionStrategy {
    treatment_as_instrument: bool,
}

impl InstrumentalPredictionStrategy {
    /// Prediction for an explicit instrument column.
    #[must_use]
    pub fn instrumental() -> Self {
        Self {
            treatment_as_instrument: false,
        }
    }

    /// Prediction for a causal forest (instrument = treatment).
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

    fn leaf_averages(&self, train_data: &Data, leaves: &[Option<&[usize]>]) -> Vec<Option<InstrumentalLeaf>> {
        let (Ok(outcomes), Ok(treatments), Ok(instruments)) = (
            train_data.outcomes(),
            train_data.treatments(),
            self.instrument_column(train_data),
        ) else {
            return vec![None; leaves.len()];
        };

        leaves
            .iter()
            .map(|leaf| {
                let samples = (*leaf)?;
                let mut total_weight = 0.0;
                let mut sums = InstrumentalLeaf {
                    y: 0.0,
                    w: 0.0,
                    z: 0.0,
                    yz: 0.0,
                    wz: 0.0,
                };
                for &s in samples {
                    let weight = train_data.weight(s);
                    let (y, w, z) = (outcomes[s], treatments[s], instruments[s]);
                    total_weight += weight;
                    sums.y += weight * y;
                    sums.w += weight * w;
                    sums.z += weight * z;
                    sums.yz += weight * y * z;
                    sums.wz += weight * w * z;
                }
                (total_weight > 0.0).then(|| InstrumentalLeaf {
                    y: sums.y / total_weight,
                    w: sums.w / total_weight,
                    z: sums.z / total_weight,
                    yz: sums.yz / total_weight,
                    wz: sums.wz / total_weight,
                })
            })
            .collect()
    }
}

fn average_leaves(leaves: &[Option<InstrumentalLeaf>]) -> Option<InstrumentalLeaf> {
    let present: Vec<&InstrumentalLeaf> = leaves.iter().flatten().collect();
    if present.is_empty() {
        return None;
    }
    let n = present.len() as f64;
    let mean = |f: fn(&InstrumentalLeaf) -> f64| present.iter().map(|l| f(l)).sum::<f64>() / n;
    Some(InstrumentalLeaf {
        y: mean(|l| l.y),
        w: mean(|l| l.w),
        z: mean(|l| l.z),
        yz: mean(|l| l.yz),
        wz: mean(|l| l.wz),
    })
}

fn first_stage(average: &InstrumentalLeaf) -> f64 {
    average.wz - average.w * average.z
}

fn local_effect(average: &InstrumentalLeaf) -> f64 {
    let denominator = first_stage(average);
    if denominator.abs() <= FIRST_STAGE_EPSILON {
        return f64::NAN;
    }
    (average.yz - average.y * average.z) / denominator
}

impl PredictionStrategy for InstrumentalPredictionStrategy {
    fn prediction_length(&self) -> usize {
        1
    }

    fn validate(&self, train_data: &Data) -> Result<(), ForestError> {
        train_data.outcomes()?;
        train_data.treatments()?;
        self.instrument_column(train_data)?;
        Ok(())
    }

    fn predict(&self, train_data: &Data, leaves: &[Option<&[usize]>]) -> Vec<f64> {
        let averages = self.leaf_averages(train_data, leaves);
        vec![average_leaves(&averages).map_or(f64::NAN, |a| local_effect(&a))]
    }

    fn compute_variance(
        &self,
        train_data: &Data,
        leaves: &[Option<&[usize]>],
        ci_group_size: usize,
    ) -> Option<Vec<f64>> {
        let averages = self.leaf_averages(train_data, leaves);
        let Some(average) = average_leaves(&averages) else {
            return Some(vec![f64::NAN]);
        };
        let tau = local_effect(&average);
        let first_stage = first_stage(&average);
        if tau.is_nan() {
            return Some(vec![f64::NAN]);
        }
        let main_effect = average.y - average.w * tau;

        // Delta-method influence of each tree on the ratio estimate.
        let psi: Vec<Option<f64>> = averages
            .iter()
            .map(|leaf| {
                leaf.map(|l| {
                    let psi_1 = l.yz - l.wz * tau - l.z * main_effect;
                    let psi_2 = l.y - l.w * tau - main_effect;
                    (psi_1 - average.z * psi_2) / first_stage
                })
            })
            .collect();
        Some(vec![little_bags_variance(&psi, ci_group_size)])
    }
}

/// Weighted outcome quantiles under the forest kernel.
///
/// Each contributing tree spreads a weight of one evenly (by sample weight)
/// across the training samples in its leaf. No variance estimate.
#[derive(Debug, Clone)]
pub struct QuantilePredictionStrategy {
    quantiles: Vec<f64>,
}

impl QuantilePredictionStrategy {
    /// Create a strategy predicting the given quantile levels.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidQuantiles`] unless the levels are
    /// non-empty, strictly increasing and inside (0, 1).
    pub fn new(quantiles: Vec<f64>) -> Result<Self, ForestError> {
        validate_quantiles(&quantiles)?;
        Ok(Self { quantiles })
    }

    /// Return the predicted quantile levels.
    #[must_use]
    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }
}

impl PredictionStrategy for QuantilePredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.quantiles.len()
    }

    fn predict(&self, train_data: &Data, leaves: &[Option<&[usize]>]) -> Vec<f64> {
        let Ok(outcomes) = train_data.outcomes() else {
            return vec![f64::NAN; self.quantiles.len()];
        };

        let mut kernel: Vec<(usize, f64)> = Vec::new();
        for samples in leaves.iter().flatten() {
            let leaf_weight: f64 = samples.iter().map(|&s| train_data.weight(s)).sum();
            if leaf_weight <= 0.0 {
                continue;
            }
            kernel.extend(samples.iter().map(|&s| (s, train_data.weight(s) / leaf_weight)));
        }
        let total: f64 = kernel.iter().map(|&(_, w)| w).sum();
        if kernel.is_empty() || total <= 0.0 {
            return vec![f64::NAN; self.quantiles.len()];
        }

        kernel.sort_by(|a, b| outcomes[a.0].total_cmp(&outcomes[b.0]));

        let mut result = Vec::with_capacity(self.quantiles.len());
        let mut cumulative = 0.0;
        let mut position = 0;
        for &q in &self.quantiles {
            let target = q * total;
            while position < kernel.len() && cumulative + kernel[position].1 < target {
                cumulative += kernel[position].1;
                position += 1;
            }
            let index = position.min(kernel.len() - 1);
            result.push(outcomes[kernel[index].0]);
        }
        result
    }

    fn has_variance(&self) -> bool {
        false
    }

    fn compute_variance(
        &self,
        _train_data: &Data,
        _leaves: &[Option<&[usize]>],
        _ci_group_size: usize,
    ) -> Option<Vec<f64>> {
        None
    }
}

fn mean_of_present(values: impl Iterator<Item = Option<f64>>) -> f64 {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Bootstrap-of-little-bags variance of a forest average.
///
/// `psi[t]` is tree `t`'s centered contribution, `None` when the tree did not
/// contribute. Only groups whose trees all contributed are used; with no
/// such group the variance is `NaN`.
pub(crate) fn little_bags_variance(psi: &[Option<f64>], ci_group_size: usize) -> f64 {
    let mut num_good_groups = 0usize;
    let mut psi_squared = 0.0;
    let mut group_psi_squared = 0.0;

    for group in psi.chunks_exact(ci_group_size) {
        let Some(values) = group.iter().copied().collect::<Option<Vec<f64>>>() else {
            continue;
        };
        num_good_groups += 1;
        let group_psi = values.iter().sum::<f64>() / ci_group_size as f64;
        group_psi_squared += group_psi * group_psi;
        psi_squared += values.iter().map(|v| v * v).sum::<f64>();
    }

    if num_good_groups == 0 {
        return f64::NAN;
    }

    let var_between = group_psi_squared / num_good_groups as f64;
    let var_total = psi_squared / (num_good_groups * ci_group_size) as f64;
    let group_noise = (var_total - var_between) / (ci_group_size - 1) as f64;
    objective_bayes_debias(var_between, group_noise, num_good_groups)
}

/// Debias `var_between - group_noise` with a flat prior on the true variance
/// restricted to be non-negative.
pub(crate) fn objective_bayes_debias(var_between: f64, group_noise: f64, num_good_groups: usize) -> f64 {
    let initial_estimate = var_between - group_noise;
    let initial_se = var_between.max(group_noise) * (2.0 / num_good_groups as f64).sqrt();
    if initial_se <= 0.0 {
        return initial_estimate.max(0.0);
    }

    let ratio = initial_estimate / initial_se;
    let numerator = (-ratio * ratio / 2.0).exp() / (2.0 * PI).sqrt();
    let denominator = 0.5 * erfc(-ratio / SQRT_2);
    if denominator <= 0.0 {
        return 0.0;
    }
    initial_estimate + initial_se * numerator / denominator
}
