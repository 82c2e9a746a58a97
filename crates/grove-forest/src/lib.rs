//! Generalized random forests: train, merge, predict.
//!
//! Trees are grown on subsamples drawn in CI groups (optionally by cluster),
//! split with pluggable relabeling and splitting strategies, and estimated
//! honestly on a held-out half of each tree's sample. Prediction supports
//! out-of-bag exclusion and bootstrap-of-little-bags variance estimates.

mod data;
mod error;
mod forest;
mod node;
mod options;
mod pool;
mod prediction;
mod predictor;
mod relabel;
mod sampler;
mod serialize;
mod split;
mod trainer;
mod tree;

pub use data::Data;
pub use error::ForestError;
pub use forest::Forest;
pub use node::{Node, NodeIndex, VariableIndex};
pub use options::ForestOptions;
pub use prediction::{
    InstrumentalPredictionStrategy, Prediction, PredictionStrategy, QuantilePredictionStrategy,
    RegressionPredictionStrategy,
};
pub use predictor::ForestPredictor;
pub use relabel::{InstrumentalRelabeling, NoopRelabeling, QuantileRelabeling, RelabelingStrategy};
pub use sampler::RandomSampler;
pub use split::{
    ProbabilitySplittingRule, RegressionSplittingRule, SplitCandidate, SplitConstraints,
    SplittingRule,
};
pub use trainer::ForestTrainer;
pub use tree::Tree;
