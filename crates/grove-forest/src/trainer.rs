//! Forest training with parallel CI-group construction.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::options::ForestOptions;
use crate::pool;
use crate::relabel::{InstrumentalRelabeling, NoopRelabeling, QuantileRelabeling, RelabelingStrategy};
use crate::sampler::RandomSampler;
use crate::split::{ProbabilitySplittingRule, RegressionSplittingRule, SplitConstraints, SplittingRule};
use crate::tree::{Honesty, Tree, TreeTrainer};

/// Grows forests from a relabeling strategy and a splitting rule.
///
/// The strategies are fixed at construction; every call to
/// [`ForestTrainer::train`] is independent and may run concurrently with
/// others.
#[derive(Debug)]
pub struct ForestTrainer {
    relabeling: Box<dyn RelabelingStrategy>,
    splitting_rule: Box<dyn SplittingRule>,
}

impl ForestTrainer {
    /// Combine any relabeling strategy with any splitting rule.
    #[must_use]
    pub fn new(
        relabeling: Box<dyn RelabelingStrategy>,
        splitting_rule: Box<dyn SplittingRule>,
    ) -> Self {
        Self {
            relabeling,
            splitting_rule,
        }
    }

    /// Regression forest: outcomes split by variance reduction.
    #[must_use]
    pub fn regression() -> Self {
        Self::new(Box::new(NoopRelabeling), Box::new(RegressionSplittingRule))
    }

    /// Causal forest: the treatment column is its own instrument.
    #[must_use]
    pub fn causal() -> Self {
        Self::new(
            Box::new(InstrumentalRelabeling::causal()),
            Box::new(RegressionSplittingRule),
        )
    }

    /// Instrumental-variable forest.
    #[must_use]
    pub fn instrumental() -> Self {
        Self::new(
            Box::new(InstrumentalRelabeling::instrumental()),
            Box::new(RegressionSplittingRule),
        )
    }

    /// Quantile forest: outcomes relabeled into quantile buckets, split by Gini.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidQuantiles`] for an unusable quantile list.
    pub fn quantile(quantiles: Vec<f64>) -> Result<Self, ForestError> {
        let relabeling = QuantileRelabeling::new(quantiles)?;
        let splitting_rule = ProbabilitySplittingRule::new(relabeling.num_classes());
        Ok(Self::new(Box::new(relabeling), Box::new(splitting_rule)))
    }

    /// Train a forest on `data`.
    ///
    /// Trees are grown one CI group at a time; groups run in parallel on a
    /// pool of `options.num_threads()` workers and are collected in group
    /// order, so the result depends only on the seed.
    ///
    /// # Errors
    ///
    /// Any configuration error from [`ForestOptions::validate`], a missing
    /// column required by the relabeling strategy, or
    /// [`ForestError::ThreadPool`] if the worker pool cannot be built.
    #[instrument(skip_all, fields(num_trees = options.num_trees(), num_rows = data.num_rows()))]
    pub fn train(&self, data: &Data, options: &ForestOptions) -> Result<Forest, ForestError> {
        let mtry = options.validate(data)?;
        self.relabeling.validate(data)?;

        let split_variables = data.split_variables();
        let sampler = RandomSampler::new(&options.clusters, options.samples_per_cluster);
        let tree_trainer = TreeTrainer {
            relabeling: self.relabeling.as_ref(),
            splitting_rule: self.splitting_rule.as_ref(),
            sampler: &sampler,
            split_variables: &split_variables,
            mtry,
            constraints: SplitConstraints {
                min_node_size: options.min_node_size,
                alpha: options.alpha,
                imbalance_penalty: options.imbalance_penalty,
            },
            honesty: options.honesty.then_some(Honesty {
                fraction: options.honesty_fraction,
                prune_empty_leaves: options.honesty_prune_leaves,
            }),
        };

        let num_groups = options.num_trees / options.ci_group_size;
        info!(
            num_groups,
            ci_group_size = options.ci_group_size,
            num_variables = split_variables.len(),
            mtry,
            clustered = sampler.is_clustered(),
            "training forest"
        );

        // One seed per CI group, drawn upfront so results do not depend on scheduling.
        let mut master_rng = ChaCha8Rng::seed_from_u64(options.seed);
        let group_seeds: Vec<u64> = (0..num_groups).map(|_| master_rng.r#gen()).collect();

        let groups: Vec<Vec<Tree>> = pool::install(options.num_threads, || {
            group_seeds
                .into_par_iter()
                .enumerate()
                .map(|(group, seed)| {
                    let trees = train_ci_group(&tree_trainer, &sampler, data, options, seed);
                    debug!(group, n_trees = trees.len(), "ci group trained");
                    trees
                })
                .collect()
        })?;

        let trees: Vec<Tree> = groups.into_iter().flatten().collect();
        info!(n_trees = trees.len(), "forest training complete");

        Ok(Forest::new(
            trees,
            split_variables,
            data.num_rows(),
            options.ci_group_size,
        ))
    }
}

/// Grow the `ci_group_size` trees of one group.
///
/// With CI groups the group first draws half of the clusters; each tree then
/// subsamples `2 * sample_fraction` of that half, so every tree still sees
/// `sample_fraction` of the data overall.
fn train_ci_group(
    tree_trainer: &TreeTrainer<'_>,
    sampler: &RandomSampler,
    data: &Data,
    options: &ForestOptions,
    seed: u64,
) -> Vec<Tree> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    if options.ci_group_size == 1 {
        let clusters = sampler.sample_clusters(data.num_rows(), options.sample_fraction, &mut rng);
        return vec![tree_trainer.train(data, &clusters, &mut rng)];
    }

    let half = sampler.sample_clusters(data.num_rows(), 0.5, &mut rng);
    let tree_seeds: Vec<u64> = (0..options.ci_group_size).map(|_| rng.r#gen()).collect();

    tree_seeds
        .into_iter()
        .map(|tree_seed| {
            let mut tree_rng = ChaCha8Rng::seed_from_u64(tree_seed);
            let clusters = sampler.subsample(&half, 2.0 * options.sample_fraction, &mut tree_rng);
            tree_trainer.train(data, &clusters, &mut tree_rng)
        })
        .collect()
}
