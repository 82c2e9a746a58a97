//! Accuracy regression tests for grove-forest.
//!
//! These tests verify that algorithmic changes do not degrade estimates on
//! deterministic synthetic datasets.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use grove_forest::{Data, Forest, ForestError, ForestOptions, ForestPredictor, ForestTrainer, Node};

// ---------------------------------------------------------------------------
// Helpers: deterministic synthetic datasets
// ---------------------------------------------------------------------------

/// Columns 0-4 uniform features, column 5 outcome `10 * [x0 > 0.5]`.
fn make_step(n_rows: usize, seed: u64) -> Data {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let rows: Vec<Vec<f64>> = (0..n_rows)
        .map(|_| {
            let mut row: Vec<f64> = (0..5).map(|_| rng.r#gen::<f64>()).collect();
            row.push(if row[0] > 0.5 { 10.0 } else { 0.0 });
            row
        })
        .collect();
    let mut data = Data::from_rows(&rows).unwrap();
    data.set_outcome_index(5).unwrap();
    data
}

/// Columns 0-2 features, 3 treatment, 4 instrument, 5 outcome `2 * w + x0 + noise`.
///
/// The treatment follows the instrument 80% of the time.
fn make_treatment(n_rows: usize, seed: u64) -> Data {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let rows: Vec<Vec<f64>> = (0..n_rows)
        .map(|_| {
            let x: Vec<f64> = (0..3).map(|_| rng.r#gen::<f64>()).collect();
            let z = f64::from(u8::from(rng.gen_bool(0.5)));
            let w = if rng.gen_bool(0.8) { z } else { 1.0 - z };
            let y = 2.0 * w + x[0] + 0.1 * (rng.r#gen::<f64>() - 0.5);
            vec![x[0], x[1], x[2], w, z, y]
        })
        .collect();
    let mut data = Data::from_rows(&rows).unwrap();
    data.set_treatment_index(3).unwrap();
    data.set_instrument_index(4).unwrap();
    data.set_outcome_index(5).unwrap();
    data
}

fn options(num_trees: usize) -> ForestOptions {
    ForestOptions::new(num_trees).unwrap().with_seed(42)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    sum / n as f64
}

// ---------------------------------------------------------------------------
// Regression
// ---------------------------------------------------------------------------

/// Predictions recover both plateaus of a step function away from the edge.
#[test]
fn regression_recovers_step() {
    let data = make_step(400, 1);
    let forest = ForestTrainer::regression().train(&data, &options(100)).unwrap();
    let predictions = ForestPredictor::regression(0)
        .predict(&forest, &data, &data, false)
        .unwrap();

    let low = mean(
        (0..data.num_rows())
            .filter(|&r| data.get(r, 0) < 0.3)
            .map(|r| predictions[r].predictions()[0]),
    );
    let high = mean(
        (0..data.num_rows())
            .filter(|&r| data.get(r, 0) > 0.7)
            .map(|r| predictions[r].predictions()[0]),
    );
    assert!(low < 2.0, "low plateau = {low}");
    assert!(high > 8.0, "high plateau = {high}");
}

/// Training is reproducible regardless of the worker count.
#[test]
fn same_seed_same_predictions_across_thread_counts() {
    let data = make_step(200, 2);
    let one = ForestTrainer::regression()
        .train(&data, &options(20).with_num_threads(1))
        .unwrap();
    let four = ForestTrainer::regression()
        .train(&data, &options(20).with_num_threads(4))
        .unwrap();
    assert_eq!(one, four);

    let p1 = ForestPredictor::regression(1).predict_oob(&one, &data, true).unwrap();
    let p4 = ForestPredictor::regression(4).predict_oob(&four, &data, true).unwrap();
    for (a, b) in p1.iter().zip(&p4) {
        assert_eq!(a.predictions()[0].to_bits(), b.predictions()[0].to_bits());
    }
}

/// With pruning on, no tree keeps a leaf without estimation samples.
#[test]
fn honest_pruned_trees_have_no_empty_leaves() {
    let data = make_step(200, 3);
    let forest = ForestTrainer::regression()
        .train(&data, &options(20).with_min_node_size(1))
        .unwrap();
    for tree in forest.trees() {
        for node in tree.nodes() {
            if let Node::Leaf { samples } = node {
                assert!(!samples.is_empty());
            }
        }
    }
}

/// Saving and loading keeps the forest and its predictions.
#[test]
fn persistence_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("forest.bin");
    let data = make_step(150, 4);
    let forest = ForestTrainer::regression().train(&data, &options(10)).unwrap();

    forest.save(&path).unwrap();
    let loaded = Forest::load(&path).unwrap();
    assert_eq!(loaded.num_trees(), forest.num_trees());
    assert_eq!(loaded.split_variables(), forest.split_variables());
    assert_eq!(loaded.num_samples(), forest.num_samples());
    assert_eq!(loaded.ci_group_size(), forest.ci_group_size());

    let predictor = ForestPredictor::regression(1);
    let before = predictor.predict(&forest, &data, &data, true).unwrap();
    let after = predictor.predict(&loaded, &data, &data, true).unwrap();
    assert_eq!(before, after);
}

/// A prediction file without the outcome column lines up with a forest
/// trained with the outcome between two features.
#[test]
fn prediction_data_may_omit_the_outcome_column() {
    let step = make_step(200, 8);
    let rows: Vec<Vec<f64>> = (0..step.num_rows())
        .map(|r| vec![step.get(r, 0), step.get(r, 5), step.get(r, 1)])
        .collect();
    let mut train = Data::from_rows(&rows).unwrap();
    train.set_outcome_index(1).unwrap();
    let forest = ForestTrainer::regression().train(&train, &options(20)).unwrap();
    assert_eq!(forest.split_variables(), &[0, 2]);

    let features: Vec<Vec<f64>> = rows.iter().map(|r| vec![r[0], r[2]]).collect();
    let test = Data::from_rows(&features).unwrap();
    let predictor = ForestPredictor::regression(2);
    let with_outcome = predictor.predict(&forest, &train, &train, false).unwrap();
    let without_outcome = predictor.predict(&forest, &train, &test, false).unwrap();
    assert_eq!(with_outcome, without_outcome);
}

/// Prediction refuses training data of a different size.
#[test]
fn training_data_must_match_forest_rows() {
    let data = make_step(200, 9);
    let forest = ForestTrainer::regression().train(&data, &options(10)).unwrap();
    let smaller = make_step(50, 9);
    let err = ForestPredictor::regression(1)
        .predict_oob(&forest, &smaller, false)
        .unwrap_err();
    assert!(matches!(
        err,
        ForestError::TrainingRowMismatch { expected: 200, got: 50 }
    ));
}

/// Missing feature values are routed instead of rejected.
#[test]
fn missing_values_are_predicted() {
    let data = make_step(200, 5);
    let forest = ForestTrainer::regression().train(&data, &options(20)).unwrap();

    let mut test_rows = vec![vec![f64::NAN, 0.5, 0.5, 0.5, 0.5, 0.0]];
    test_rows.push(vec![0.9, f64::NAN, f64::NAN, 0.5, 0.5, 0.0]);
    let mut test = Data::from_rows(&test_rows).unwrap();
    test.set_outcome_index(5).unwrap();

    let predictions = ForestPredictor::regression(1)
        .predict(&forest, &data, &test, false)
        .unwrap();
    assert!(predictions.iter().all(|p| p.predictions()[0].is_finite()));
    assert!(predictions[1].predictions()[0] > 5.0);
}

// ---------------------------------------------------------------------------
// Causal and instrumental
// ---------------------------------------------------------------------------

/// A constant treatment effect of 2 is recovered on average.
#[test]
fn causal_recovers_constant_effect() {
    let data = make_treatment(500, 6);
    let forest = ForestTrainer::causal().train(&data, &options(100)).unwrap();
    let predictions = ForestPredictor::causal(0)
        .predict(&forest, &data, &data, true)
        .unwrap();

    let effect = mean(predictions.iter().map(|p| p.predictions()[0]));
    assert!((effect - 2.0).abs() < 0.5, "mean effect = {effect}");
    assert!(
        predictions
            .iter()
            .all(|p| p.variance_estimates().unwrap()[0] >= 0.0)
    );
}

/// The instrumental forest recovers the effect through a noisy first stage.
#[test]
fn instrumental_recovers_constant_effect() {
    let data = make_treatment(500, 7);
    let forest = ForestTrainer::instrumental().train(&data, &options(100)).unwrap();
    let predictions = ForestPredictor::instrumental(0)
        .predict(&forest, &data, &data, false)
        .unwrap();

    let effect = mean(predictions.iter().map(|p| p.predictions()[0]));
    assert!((effect - 2.0).abs() < 1.0, "mean effect = {effect}");
}

// ---------------------------------------------------------------------------
// Quantile
// ---------------------------------------------------------------------------

/// Predicted quantiles are non-decreasing in the quantile level.
#[test]
fn quantile_predictions_are_monotone() {
    let data = make_step(300, 8);
    let quantiles = vec![0.1, 0.5, 0.9];
    let forest = ForestTrainer::quantile(quantiles.clone())
        .unwrap()
        .train(&data, &options(50))
        .unwrap();
    let predictions = ForestPredictor::quantile(quantiles, 0)
        .unwrap()
        .predict(&forest, &data, &data, false)
        .unwrap();

    for p in &predictions {
        let q = p.predictions();
        assert_eq!(q.len(), 3);
        assert!(q[0] <= q[1] && q[1] <= q[2], "quantiles {q:?}");
    }
}
