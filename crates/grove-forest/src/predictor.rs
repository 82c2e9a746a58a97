//! Batch prediction with optional out-of-bag exclusion.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{info, instrument};

use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::pool;
use crate::prediction::{
    InstrumentalPredictionStrategy, Prediction, PredictionStrategy, QuantilePredictionStrategy,
    RegressionPredictionStrategy,
};

/// Runs a [`PredictionStrategy`] over every row of a dataset.
#[derive(Debug)]
pub struct ForestPredictor {
    strategy: Box<dyn PredictionStrategy>,
    num_threads: usize,
}

impl ForestPredictor {
    /// Create a predictor using `strategy` on `num_threads` workers (0 = rayon's default pool).
    #[must_use]
    pub fn new(strategy: Box<dyn PredictionStrategy>, num_threads: usize) -> Self {
        Self {
            strategy,
            num_threads,
        }
    }

    /// Predictor for regression forests.
    #[must_use]
    pub fn regression(num_threads: usize) -> Self {
        Self::new(Box::new(RegressionPredictionStrategy), num_threads)
    }

    /// Predictor for causal forests.
    #[must_use]
    pub fn causal(num_threads: usize) -> Self {
        Self::new(Box::new(InstrumentalPredictionStrategy::causal()), num_threads)
    }

    /// Predictor for instrumental-variable forests.
    #[must_use]
    pub fn instrumental(num_threads: usize) -> Self {
        Self::new(
            Box::new(InstrumentalPredictionStrategy::instrumental()),
            num_threads,
        )
    }

    /// Predictor for quantile forests.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidQuantiles`] for an unusable quantile list.
    pub fn quantile(quantiles: Vec<f64>, num_threads: usize) -> Result<Self, ForestError> {
        Ok(Self::new(
            Box::new(QuantilePredictionStrategy::new(quantiles)?),
            num_threads,
        ))
    }

    /// Predict every row of `data` using all trees.
    ///
    /// Leaf samples index into `train_data`, the dataset the forest was
    /// trained on. The split variables of `data` are matched to the forest's
    /// by position, so `data` may omit or move the reserved columns.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::VarianceRequiresCiGroups`] | variance requested and `ci_group_size <= 1` |
    /// | [`ForestError::TrainingRowMismatch`] | `train_data` does not have the forest's training row count |
    /// | [`ForestError::PredictionVariableMismatch`] | `data` has a different number of split variables |
    /// | `*NotSet` | `train_data` lacks a column the strategy reads |
    /// | [`ForestError::ThreadPool`] | the worker pool cannot be built |
    #[instrument(skip_all, fields(num_rows = data.num_rows(), n_trees = forest.num_trees()))]
    pub fn predict(
        &self,
        forest: &Forest,
        train_data: &Data,
        data: &Data,
        estimate_variance: bool,
    ) -> Result<Vec<Prediction>, ForestError> {
        self.predict_rows(forest, train_data, data, false, estimate_variance)
    }

    /// Predict every row of the training data using only trees that did not
    /// draw that row.
    ///
    /// A row drawn by every tree gets [`Prediction::undefined`].
    ///
    /// # Errors
    ///
    /// Same as [`ForestPredictor::predict`].
    #[instrument(skip_all, fields(num_rows = data.num_rows(), n_trees = forest.num_trees()))]
    pub fn predict_oob(
        &self,
        forest: &Forest,
        data: &Data,
        estimate_variance: bool,
    ) -> Result<Vec<Prediction>, ForestError> {
        self.predict_rows(forest, data, data, true, estimate_variance)
    }

    fn predict_rows(
        &self,
        forest: &Forest,
        train_data: &Data,
        data: &Data,
        oob: bool,
        estimate_variance: bool,
    ) -> Result<Vec<Prediction>, ForestError> {
        if estimate_variance && forest.ci_group_size() <= 1 {
            return Err(ForestError::VarianceRequiresCiGroups {
                ci_group_size: forest.ci_group_size(),
            });
        }
        if train_data.num_rows() != forest.num_samples() {
            return Err(ForestError::TrainingRowMismatch {
                expected: forest.num_samples(),
                got: train_data.num_rows(),
            });
        }
        let columns = column_map(forest, data)?;
        self.strategy.validate(train_data)?;

        let predictions: Vec<Prediction> = pool::install(self.num_threads, || {
            (0..data.num_rows())
                .into_par_iter()
                .map(|row| {
                    self.predict_row(
                        forest,
                        train_data,
                        data,
                        &columns,
                        row,
                        oob,
                        estimate_variance,
                    )
                })
                .collect()
        })?;

        let undefined = predictions.iter().filter(|p| p.is_undefined()).count();
        info!(
            n_predictions = predictions.len(),
            undefined,
            oob,
            estimate_variance,
            "prediction complete"
        );
        Ok(predictions)
    }

    #[allow(clippy::too_many_arguments)]
    fn predict_row(
        &self,
        forest: &Forest,
        train_data: &Data,
        data: &Data,
        columns: &[Option<usize>],
        row: usize,
        oob: bool,
        estimate_variance: bool,
    ) -> Prediction {
        let leaves: Vec<Option<&[usize]>> = forest
            .trees()
            .iter()
            .map(|tree| {
                if oob && tree.is_in_bag(row) {
                    return None;
                }
                let leaf = tree.find_leaf_by(|col| {
                    columns
                        .get(col)
                        .copied()
                        .flatten()
                        .map_or(f64::NAN, |c| data.get(row, c))
                });
                let samples = tree.leaf_samples(leaf);
                (!samples.is_empty()).then_some(samples)
            })
            .collect();

        if leaves.iter().all(Option::is_none) {
            return Prediction::undefined(
                self.strategy.prediction_length(),
                estimate_variance && self.strategy.has_variance(),
            );
        }

        let predictions = self.strategy.predict(train_data, &leaves);
        let variance_estimates = if estimate_variance {
            self.strategy
                .compute_variance(train_data, &leaves, forest.ci_group_size())
        } else {
            None
        };
        Prediction::new(predictions, variance_estimates)
    }
}

/// Map each training column the forest splits on to its column in `data`.
///
/// Split variables are paired by rank, so the k-th split variable of the
/// forest reads the k-th split variable of `data`.
fn column_map(forest: &Forest, data: &Data) -> Result<Vec<Option<usize>>, ForestError> {
    let targets = data.split_variables();
    if targets.len() != forest.num_variables() {
        return Err(ForestError::PredictionVariableMismatch {
            expected: forest.num_variables(),
            got: targets.len(),
        });
    }
    let width = forest.split_variables().last().map_or(0, |&c| c + 1);
    let mut columns = vec![None; width];
    for (&trained, target) in forest.split_variables().iter().zip(targets) {
        columns[trained] = Some(target);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeIndex, VariableIndex};
    use crate::tree::Tree;

    /// Column 0: feature, column 1: outcome.
    fn data() -> Data {
        let rows = vec![
            vec![0.0, 1.0],
            vec![1.0, 3.0],
            vec![2.0, 10.0],
            vec![3.0, 20.0],
        ];
        let mut data = Data::from_rows(&rows).unwrap();
        data.set_outcome_index(1).unwrap();
        data
    }

    fn stump(left: Vec<usize>, right: Vec<usize>, drawn: Vec<usize>) -> Tree {
        Tree::new(
            vec![
                Node::Split {
                    variable: VariableIndex::new(0),
                    threshold: 1.5,
                    send_missing_left: false,
                    left: NodeIndex::new(1),
                    right: NodeIndex::new(2),
                },
                Node::Leaf { samples: left },
                Node::Leaf { samples: right },
            ],
            drawn,
        )
    }

    #[test]
    fn predict_uses_leaf_means() {
        let tree = stump(vec![0, 1], vec![2, 3], vec![0, 1, 2, 3]);
        let forest = Forest::new(vec![tree], vec![0], 4, 1);
        let data = data();
        let preds = ForestPredictor::regression(1)
            .predict(&forest, &data, &data, false)
            .unwrap();
        assert_eq!(preds.len(), 4);
        assert_eq!(preds[0].predictions(), &[2.0]);
        assert_eq!(preds[3].predictions(), &[15.0]);
        assert!(preds[0].variance_estimates().is_none());
    }

    #[test]
    fn oob_skips_trees_that_drew_the_row() {
        let forest = Forest::new(
            vec![
                stump(vec![0], vec![2], vec![0, 2]),
                stump(vec![1], vec![3], vec![1, 3]),
            ],
            vec![0],
            4,
            1,
        );
        let preds = ForestPredictor::regression(1)
            .predict_oob(&forest, &data(), false)
            .unwrap();
        // Row 0 only sees the second tree, whose left leaf holds row 1.
        assert_eq!(preds[0].predictions(), &[3.0]);
        assert_eq!(preds[3].predictions(), &[10.0]);
    }

    #[test]
    fn row_in_every_tree_is_undefined() {
        let tree = stump(vec![0, 1], vec![2, 3], vec![0, 1, 2, 3]);
        let forest = Forest::new(vec![tree], vec![0], 4, 1);
        let preds = ForestPredictor::regression(0)
            .predict_oob(&forest, &data(), false)
            .unwrap();
        assert!(preds.iter().all(Prediction::is_undefined));
    }

    #[test]
    fn empty_leaves_do_not_contribute() {
        let forest = Forest::new(
            vec![
                stump(vec![], vec![2, 3], vec![2, 3]),
                stump(vec![1], vec![3], vec![1, 3]),
            ],
            vec![0],
            4,
            1,
        );
        let data = data();
        let preds = ForestPredictor::regression(1)
            .predict(&forest, &data, &data, false)
            .unwrap();
        assert_eq!(preds[0].predictions(), &[3.0]);
    }

    #[test]
    fn variance_needs_ci_groups() {
        let forest = Forest::new(vec![stump(vec![0], vec![2], vec![0, 2])], vec![0], 4, 1);
        let data = data();
        let err = ForestPredictor::regression(1)
            .predict(&forest, &data, &data, true)
            .unwrap_err();
        assert!(matches!(err, ForestError::VarianceRequiresCiGroups { ci_group_size: 1 }));
    }

    #[test]
    fn variance_reported_per_row() {
        let forest = Forest::new(
            vec![
                stump(vec![0, 1], vec![2, 3], vec![0, 1, 2, 3]),
                stump(vec![0], vec![3], vec![0, 3]),
                stump(vec![1], vec![2], vec![1, 2]),
                stump(vec![0, 1], vec![2], vec![0, 1, 2]),
            ],
            vec![0],
            4,
            2,
        );
        let data = data();
        let preds = ForestPredictor::regression(2)
            .predict(&forest, &data, &data, true)
            .unwrap();
        for p in &preds {
            let v = p.variance_estimates().unwrap();
            assert_eq!(v.len(), 1);
            assert!(v[0] >= 0.0, "variance = {}", v[0]);
        }
    }

    #[test]
    fn variable_count_must_match() {
        let forest = Forest::new(vec![stump(vec![0], vec![2], vec![0, 2])], vec![0, 2], 4, 1);
        let data = data();
        let err = ForestPredictor::regression(1)
            .predict(&forest, &data, &data, false)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::PredictionVariableMismatch { expected: 2, got: 1 }
        ));
    }

    #[test]
    fn split_variables_are_matched_by_position() {
        // Training layout: x0, y, x1. The stump splits on x1 (column 2).
        let rows = vec![
            vec![5.0, 1.0, 0.0],
            vec![6.0, 3.0, 1.0],
            vec![7.0, 10.0, 2.0],
            vec![8.0, 20.0, 3.0],
        ];
        let mut train = Data::from_rows(&rows).unwrap();
        train.set_outcome_index(1).unwrap();
        let tree = Tree::new(
            vec![
                Node::Split {
                    variable: VariableIndex::new(2),
                    threshold: 1.5,
                    send_missing_left: false,
                    left: NodeIndex::new(1),
                    right: NodeIndex::new(2),
                },
                Node::Leaf { samples: vec![0, 1] },
                Node::Leaf { samples: vec![2, 3] },
            ],
            vec![0, 1, 2, 3],
        );
        let forest = Forest::new(vec![tree], vec![0, 2], 4, 1);

        // Prediction file without the outcome column: x0, x1.
        let test = Data::from_rows(&[vec![5.0, 0.0], vec![8.0, 3.0]]).unwrap();
        let preds = ForestPredictor::regression(1)
            .predict(&forest, &train, &test, false)
            .unwrap();
        assert_eq!(preds[0].predictions(), &[2.0]);
        assert_eq!(preds[1].predictions(), &[15.0]);
    }

    #[test]
    fn training_rows_must_match_forest() {
        let forest = Forest::new(vec![stump(vec![0], vec![2], vec![0, 2])], vec![0], 200, 1);
        let data = data();
        let err = ForestPredictor::regression(1)
            .predict_oob(&forest, &data, false)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::TrainingRowMismatch { expected: 200, got: 4 }
        ));
    }

    #[test]
    fn undefined_rows_follow_strategy_variance_support() {
        let tree = stump(vec![0, 1], vec![2, 3], vec![0, 1, 2, 3]);
        let forest = Forest::new(vec![tree], vec![0], 4, 2);
        let preds = ForestPredictor::quantile(vec![0.5], 1)
            .unwrap()
            .predict_oob(&forest, &data(), true)
            .unwrap();
        assert!(preds.iter().all(Prediction::is_undefined));
        assert!(preds.iter().all(|p| p.variance_estimates().is_none()));
    }
}
