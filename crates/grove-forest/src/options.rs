//! Training options for forests.

use crate::data::Data;
use crate::error::ForestError;

/// Configuration for forest training.
///
/// Construct via [`ForestOptions::new`] and chain `with_*` methods, or pass
/// every value at once with [`ForestOptions::from_values`]. Values are
/// checked against the training data by [`ForestOptions::validate`], which
/// the trainer calls before any tree is grown.
///
/// # Defaults
///
/// | Parameter              | Default                               |
/// |------------------------|---------------------------------------|
/// | `ci_group_size`        | 2                                     |
/// | `sample_fraction`      | 0.5                                   |
/// | `mtry`                 | `None` (`min(ceil(sqrt(p)) + 20, p)`) |
/// | `min_node_size`        | 5                                     |
/// | `honesty`              | `true`                                |
/// | `honesty_fraction`     | 0.5                                   |
/// | `honesty_prune_leaves` | `true`                                |
/// | `alpha`                | 0.05                                  |
/// | `imbalance_penalty`    | 0.0                                   |
/// | `num_threads`          | 0 (all cores)                         |
/// | `seed`                 | 42                                    |
/// | `clusters`             | empty (no clustering)                 |
/// | `samples_per_cluster`  | 0 (smallest cluster size)             |
#[derive(Debug, Clone, PartialEq)]
pub struct ForestOptions {
    pub(crate) num_trees: usize,
    pub(crate) ci_group_size: usize,
    pub(crate) sample_fraction: f64,
    pub(crate) mtry: Option<usize>,
    pub(crate) min_node_size: usize,
    pub(crate) honesty: bool,
    pub(crate) honesty_fraction: f64,
    pub(crate) honesty_prune_leaves: bool,
    pub(crate) alpha: f64,
    pub(crate) imbalance_penalty: f64,
    pub(crate) num_threads: usize,
    pub(crate) seed: u64,
    pub(crate) clusters: Vec<usize>,
    pub(crate) samples_per_cluster: usize,
}

impl ForestOptions {
    /// Create options for `num_trees` trees with default values elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `num_trees` is zero.
    pub fn new(num_trees: usize) -> Result<Self, ForestError> {
        if num_trees == 0 {
            return Err(ForestError::InvalidTreeCount { num_trees });
        }
        Ok(Self {
            num_trees,
            ci_group_size: 2,
            sample_fraction: 0.5,
            mtry: None,
            min_node_size: 5,
            honesty: true,
            honesty_fraction: 0.5,
            honesty_prune_leaves: true,
            alpha: 0.05,
            imbalance_penalty: 0.0,
            num_threads: 0,
            seed: 42,
            clusters: Vec::new(),
            samples_per_cluster: 0,
        })
    }

    /// Create options from every value at once.
    ///
    /// `clusters` holds one cluster id per row, or is empty to disable
    /// cluster sampling. `samples_per_cluster == 0` means "use the size of
    /// the smallest cluster".
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `num_trees` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn from_values(
        num_trees: usize,
        ci_group_size: usize,
        sample_fraction: f64,
        mtry: usize,
        min_node_size: usize,
        honesty: bool,
        honesty_fraction: f64,
        alpha: f64,
        imbalance_penalty: f64,
        num_threads: usize,
        seed: u64,
        clusters: Vec<usize>,
        samples_per_cluster: usize,
    ) -> Result<Self, ForestError> {
        Ok(Self::new(num_trees)?
            .with_ci_group_size(ci_group_size)
            .with_sample_fraction(sample_fraction)
            .with_mtry(mtry)
            .with_min_node_size(min_node_size)
            .with_honesty(honesty)
            .with_honesty_fraction(honesty_fraction)
            .with_alpha(alpha)
            .with_imbalance_penalty(imbalance_penalty)
            .with_num_threads(num_threads)
            .with_seed(seed)
            .with_clusters(clusters, samples_per_cluster))
    }

    // --- Setters ---

    /// Set the number of trees sharing one half-sample (1 disables CI groups).
    #[must_use]
    pub fn with_ci_group_size(mut self, ci_group_size: usize) -> Self {
        self.ci_group_size = ci_group_size;
        self
    }

    /// Set the fraction of clusters (or rows) sampled per tree.
    #[must_use]
    pub fn with_sample_fraction(mut self, sample_fraction: f64) -> Self {
        self.sample_fraction = sample_fraction;
        self
    }

    /// Set the number of candidate variables drawn at each split.
    #[must_use]
    pub fn with_mtry(mut self, mtry: usize) -> Self {
        self.mtry = Some(mtry);
        self
    }

    /// Set the target minimum number of samples per leaf.
    #[must_use]
    pub fn with_min_node_size(mut self, min_node_size: usize) -> Self {
        self.min_node_size = min_node_size;
        self
    }

    /// Enable or disable honest splitting.
    #[must_use]
    pub fn with_honesty(mut self, honesty: bool) -> Self {
        self.honesty = honesty;
        self
    }

    /// Set the fraction of each tree's sample used to choose splits.
    #[must_use]
    pub fn with_honesty_fraction(mut self, honesty_fraction: f64) -> Self {
        self.honesty_fraction = honesty_fraction;
        self
    }

    /// Collapse splits whose honest half left a child empty.
    #[must_use]
    pub fn with_honesty_prune_leaves(mut self, prune: bool) -> Self {
        self.honesty_prune_leaves = prune;
        self
    }

    /// Set the minimum fraction of a node's samples on each side of a split.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the penalty applied to unbalanced splits.
    #[must_use]
    pub fn with_imbalance_penalty(mut self, imbalance_penalty: f64) -> Self {
        self.imbalance_penalty = imbalance_penalty;
        self
    }

    /// Set the number of worker threads (0 = rayon's default pool).
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set per-row cluster ids and the number of rows drawn from each cluster.
    #[must_use]
    pub fn with_clusters(mut self, clusters: Vec<usize>, samples_per_cluster: usize) -> Self {
        self.clusters = clusters;
        self.samples_per_cluster = samples_per_cluster;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    /// Return the CI group size.
    #[must_use]
    pub fn ci_group_size(&self) -> usize {
        self.ci_group_size
    }

    /// Return the per-tree sample fraction.
    #[must_use]
    pub fn sample_fraction(&self) -> f64 {
        self.sample_fraction
    }

    /// Return the configured mtry, if set explicitly.
    #[must_use]
    pub fn mtry(&self) -> Option<usize> {
        self.mtry
    }

    /// Return the minimum node size.
    #[must_use]
    pub fn min_node_size(&self) -> usize {
        self.min_node_size
    }

    /// Return whether honesty is enabled.
    #[must_use]
    pub fn honesty(&self) -> bool {
        self.honesty
    }

    /// Return the honesty fraction.
    #[must_use]
    pub fn honesty_fraction(&self) -> f64 {
        self.honesty_fraction
    }

    /// Return whether empty honest leaves are pruned.
    #[must_use]
    pub fn honesty_prune_leaves(&self) -> bool {
        self.honesty_prune_leaves
    }

    /// Return alpha.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Return the imbalance penalty.
    #[must_use]
    pub fn imbalance_penalty(&self) -> f64 {
        self.imbalance_penalty
    }

    /// Return the number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the per-row cluster ids (empty when clustering is off).
    #[must_use]
    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    /// Return the configured samples per cluster.
    #[must_use]
    pub fn samples_per_cluster(&self) -> usize {
        self.samples_per_cluster
    }

    /// Resolve mtry against the number of split variables.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidMtry`] if the value is zero or exceeds `num_variables`.
    pub fn resolve_mtry(&self, num_variables: usize) -> Result<usize, ForestError> {
        let mtry = self.mtry.unwrap_or_else(|| {
            let default = (num_variables as f64).sqrt().ceil() as usize + 20;
            default.min(num_variables)
        });
        if mtry == 0 || mtry > num_variables {
            return Err(ForestError::InvalidMtry {
                mtry,
                num_variables,
            });
        }
        Ok(mtry)
    }

    /// Check every option against the training data.
    ///
    /// # Errors
    ///
    /// | Variant                                    | When                                                   |
    /// |--------------------------------------------|--------------------------------------------------------|
    /// | [`ForestError::EmptyDataset`]              | data has no rows                                       |
    /// | [`ForestError::OutcomeNotSet`]             | no outcome column                                      |
    /// | [`ForestError::InvalidCiGroupSize`]        | `ci_group_size` is zero                                |
    /// | [`ForestError::TreesNotDivisibleByCiGroup`]| `num_trees % ci_group_size != 0`                       |
    /// | [`ForestError::InvalidSampleFraction`]     | outside (0, 1], or above 0.5 with CI groups            |
    /// | [`ForestError::InvalidMtry`]               | mtry is 0 or above the number of split variables       |
    /// | [`ForestError::InvalidMinNodeSize`]        | `min_node_size` is zero                                |
    /// | [`ForestError::InvalidHonestyFraction`]    | honesty on and fraction outside (0, 1)                 |
    /// | [`ForestError::InvalidAlpha`]              | alpha outside [0, 0.25)                                |
    /// | [`ForestError::InvalidImbalancePenalty`]   | penalty negative or not finite                         |
    /// | [`ForestError::ClusterCountMismatch`]      | clusters given but not one per row                     |
    pub fn validate(&self, data: &Data) -> Result<usize, ForestError> {
        if data.num_rows() == 0 {
            return Err(ForestError::EmptyDataset);
        }
        data.outcomes()?;

        if self.ci_group_size == 0 {
            return Err(ForestError::InvalidCiGroupSize {
                ci_group_size: self.ci_group_size,
            });
        }
        if self.num_trees % self.ci_group_size != 0 {
            return Err(ForestError::TreesNotDivisibleByCiGroup {
                num_trees: self.num_trees,
                ci_group_size: self.ci_group_size,
            });
        }

        // Each CI group draws half of the data, so a tree can take at most half.
        let upper = if self.ci_group_size > 1 { 0.5 } else { 1.0 };
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= upper) {
            return Err(ForestError::InvalidSampleFraction {
                fraction: self.sample_fraction,
                upper,
            });
        }

        let mtry = self.resolve_mtry(data.num_variables())?;

        if self.min_node_size == 0 {
            return Err(ForestError::InvalidMinNodeSize {
                min_node_size: self.min_node_size,
            });
        }
        if self.honesty && !(self.honesty_fraction > 0.0 && self.honesty_fraction < 1.0) {
            return Err(ForestError::InvalidHonestyFraction {
                fraction: self.honesty_fraction,
            });
        }
        if !(0.0..0.25).contains(&self.alpha) {
            return Err(ForestError::InvalidAlpha { alpha: self.alpha });
        }
        if !(self.imbalance_penalty >= 0.0 && self.imbalance_penalty.is_finite()) {
            return Err(ForestError::InvalidImbalancePenalty {
                penalty: self.imbalance_penalty,
            });
        }
        if !self.clusters.is_empty() && self.clusters.len() != data.num_rows() {
            return Err(ForestError::ClusterCountMismatch {
                expected: data.num_rows(),
                got: self.clusters.len(),
            });
        }

        Ok(mtry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(num_cols: usize) -> Data {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|r| (0..num_cols).map(|c| (r * c) as f64).collect())
            .collect();
        let mut data = Data::from_rows(&rows).unwrap();
        data.set_outcome_index(num_cols - 1).unwrap();
        data
    }

    fn base() -> ForestOptions {
        ForestOptions::new(4).unwrap().with_mtry(2)
    }

    #[test]
    fn zero_trees_rejected() {
        assert!(matches!(
            ForestOptions::new(0),
            Err(ForestError::InvalidTreeCount { num_trees: 0 })
        ));
    }

    #[test]
    fn from_values_matches_builder() {
        let full = ForestOptions::from_values(
            2, 2, 0.35, 3, 1, true, 0.5, 0.10, 0.07, 4, 42, Vec::new(), 0,
        )
        .unwrap();
        let built = ForestOptions::new(2)
            .unwrap()
            .with_ci_group_size(2)
            .with_sample_fraction(0.35)
            .with_mtry(3)
            .with_min_node_size(1)
            .with_alpha(0.10)
            .with_imbalance_penalty(0.07)
            .with_num_threads(4);
        assert_eq!(full, built);
    }

    #[test]
    fn valid_options_resolve_mtry() {
        assert_eq!(base().validate(&data(4)).unwrap(), 2);
    }

    #[test]
    fn default_mtry_is_capped_by_variables() {
        let options = ForestOptions::new(4).unwrap();
        assert_eq!(options.resolve_mtry(3).unwrap(), 3);
        assert_eq!(options.resolve_mtry(100).unwrap(), 30);
    }

    #[test]
    fn trees_must_divide_into_ci_groups() {
        let err = ForestOptions::new(3)
            .unwrap()
            .with_mtry(1)
            .validate(&data(3))
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::TreesNotDivisibleByCiGroup { num_trees: 3, ci_group_size: 2 }
        ));
    }

    #[test]
    fn ci_groups_cap_fraction_at_half() {
        let err = base().with_sample_fraction(0.6).validate(&data(3)).unwrap_err();
        assert!(matches!(err, ForestError::InvalidSampleFraction { .. }));
        assert!(base().with_sample_fraction(0.5).validate(&data(3)).is_ok());

        let ok = base().with_ci_group_size(1).with_sample_fraction(1.0);
        assert!(ok.validate(&data(3)).is_ok());
    }

    #[test]
    fn mtry_above_variables_rejected() {
        let err = base().with_mtry(3).validate(&data(3)).unwrap_err();
        assert!(matches!(err, ForestError::InvalidMtry { mtry: 3, num_variables: 2 }));
    }

    #[test]
    fn alpha_and_penalty_ranges() {
        assert!(matches!(
            base().with_alpha(0.25).validate(&data(3)),
            Err(ForestError::InvalidAlpha { .. })
        ));
        assert!(matches!(
            base().with_imbalance_penalty(-1.0).validate(&data(3)),
            Err(ForestError::InvalidImbalancePenalty { .. })
        ));
    }

    #[test]
    fn honesty_fraction_checked_only_with_honesty() {
        assert!(matches!(
            base().with_honesty_fraction(1.0).validate(&data(3)),
            Err(ForestError::InvalidHonestyFraction { .. })
        ));
        let off = base().with_honesty(false).with_honesty_fraction(1.0);
        assert!(off.validate(&data(3)).is_ok());
    }

    #[test]
    fn cluster_list_must_cover_rows() {
        let err = base()
            .with_clusters(vec![0, 1, 2], 0)
            .validate(&data(3))
            .unwrap_err();
        assert!(matches!(err, ForestError::ClusterCountMismatch { expected: 10, got: 3 }));
    }

    #[test]
    fn missing_outcome_rejected() {
        let data = Data::from_rows(&[vec![1.0, 2.0]]).unwrap();
        assert!(matches!(base().validate(&data), Err(ForestError::OutcomeNotSet)));
    }
}
