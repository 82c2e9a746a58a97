//! Row and cluster subsampling for tree construction.
//!
//! Without clustering every row is its own cluster, so the same code path
//! draws "cluster ids" that are simply row ids.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;

/// Draws per-tree samples, respecting cluster grouping.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    /// Rows of each cluster, ordered by cluster id. Empty when clustering is off.
    clusters: Vec<Vec<usize>>,
    samples_per_cluster: usize,
}

impl RandomSampler {
    /// Build a sampler from per-row cluster ids.
    ///
    /// An empty `cluster_ids` disables clustering. Cluster ids need not be
    /// contiguous. `samples_per_cluster == 0` resolves to the size of the
    /// smallest cluster.
    #[must_use]
    pub fn new(cluster_ids: &[usize], samples_per_cluster: usize) -> Self {
        let mut by_id: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &id) in cluster_ids.iter().enumerate() {
            by_id.entry(id).or_default().push(row);
        }
        let clusters: Vec<Vec<usize>> = by_id.into_values().collect();
        let samples_per_cluster = if samples_per_cluster == 0 {
            clusters.iter().map(Vec::len).min().unwrap_or(0)
        } else {
            samples_per_cluster
        };
        Self {
            clusters,
            samples_per_cluster,
        }
    }

    /// Return `true` when rows are grouped into clusters.
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        !self.clusters.is_empty()
    }

    /// Return the number of rows drawn from each sampled cluster.
    #[must_use]
    pub fn samples_per_cluster(&self) -> usize {
        self.samples_per_cluster
    }

    /// Draw `ceil(n * fraction)` of the `n` sampling units without replacement.
    ///
    /// Units are clusters when clustering is on, rows otherwise.
    pub fn sample_clusters(&self, num_rows: usize, fraction: f64, rng: &mut impl Rng) -> Vec<usize> {
        let num_units = if self.is_clustered() {
            self.clusters.len()
        } else {
            num_rows
        };
        let units: Vec<usize> = (0..num_units).collect();
        self.subsample(&units, fraction, rng)
    }

    /// Draw `ceil(len * fraction)` of `ids` without replacement.
    pub fn subsample(&self, ids: &[usize], fraction: f64, rng: &mut impl Rng) -> Vec<usize> {
        self.subsample_with_oob(ids, fraction, rng).0
    }

    /// Split `ids` into a subsample of `ceil(len * fraction)` and its complement.
    pub fn subsample_with_oob(
        &self,
        ids: &[usize],
        fraction: f64,
        rng: &mut impl Rng,
    ) -> (Vec<usize>, Vec<usize>) {
        let size = subsample_size(ids.len(), fraction);
        let mut shuffled = ids.to_vec();
        let (chosen, rest) = shuffled.partial_shuffle(rng, size);
        (chosen.to_vec(), rest.to_vec())
    }

    /// Expand sampled clusters into rows, drawing up to `samples_per_cluster`
    /// rows from each cluster without replacement.
    pub fn sample_from_clusters(&self, cluster_ids: &[usize], rng: &mut impl Rng) -> Vec<usize> {
        if !self.is_clustered() {
            return cluster_ids.to_vec();
        }
        let mut samples = Vec::with_capacity(cluster_ids.len() * self.samples_per_cluster);
        for &cluster in cluster_ids {
            let rows = &self.clusters[cluster];
            if rows.len() <= self.samples_per_cluster {
                samples.extend_from_slice(rows);
            } else {
                samples.extend(rows.choose_multiple(rng, self.samples_per_cluster).copied());
            }
        }
        samples
    }

    /// Return every row belonging to the given clusters, sorted and deduplicated.
    #[must_use]
    pub fn samples_in_clusters(&self, cluster_ids: &[usize]) -> Vec<usize> {
        let mut rows: Vec<usize> = if self.is_clustered() {
            cluster_ids
                .iter()
                .flat_map(|&c| self.clusters[c].iter().copied())
                .collect()
        } else {
            cluster_ids.to_vec()
        };
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

fn subsample_size(len: usize, fraction: f64) -> usize {
    ((len as f64 * fraction).ceil() as usize).min(len)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn unclustered_sample_size_rounds_up() {
        let sampler = RandomSampler::new(&[], 0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let drawn = sampler.sample_clusters(10, 0.35, &mut rng);
        assert_eq!(drawn.len(), 4);
        let mut unique = drawn.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4, "sampling is without replacement");
        assert!(drawn.iter().all(|&r| r < 10));
    }

    #[test]
    fn subsample_with_oob_partitions_input() {
        let sampler = RandomSampler::new(&[], 0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let ids: Vec<usize> = (0..9).collect();
        let (chosen, rest) = sampler.subsample_with_oob(&ids, 0.5, &mut rng);
        assert_eq!(chosen.len(), 5);
        assert_eq!(rest.len(), 4);
        let mut all: Vec<usize> = chosen.into_iter().chain(rest).collect();
        all.sort_unstable();
        assert_eq!(all, ids);
    }

    #[test]
    fn same_seed_same_draw() {
        let sampler = RandomSampler::new(&[], 0);
        let a = sampler.sample_clusters(100, 0.3, &mut ChaCha8Rng::seed_from_u64(1));
        let b = sampler.sample_clusters(100, 0.3, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn clusters_are_sampled_as_units() {
        // Three clusters with non-contiguous ids.
        let ids = vec![10, 10, 10, 20, 20, 30, 30, 30, 30];
        let sampler = RandomSampler::new(&ids, 0);
        assert!(sampler.is_clustered());
        assert_eq!(sampler.samples_per_cluster(), 2);

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let drawn = sampler.sample_clusters(ids.len(), 1.0, &mut rng);
        assert_eq!(drawn.len(), 3);

        let rows = sampler.sample_from_clusters(&drawn, &mut rng);
        assert_eq!(rows.len(), 6);
        for cluster_id in [10, 20, 30] {
            let n = rows.iter().filter(|&&r| ids[r] == cluster_id).count();
            assert_eq!(n, 2);
        }
    }

    #[test]
    fn samples_in_clusters_expands_whole_clusters() {
        let ids = vec![0, 1, 0, 1, 2];
        let sampler = RandomSampler::new(&ids, 1);
        assert_eq!(sampler.samples_in_clusters(&[1, 0]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unclustered_expansion_is_identity() {
        let sampler = RandomSampler::new(&[], 0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(sampler.sample_from_clusters(&[4, 1, 3], &mut rng), vec![4, 1, 3]);
        assert_eq!(sampler.samples_in_clusters(&[4, 1, 3, 1]), vec![1, 3, 4]);
    }
}
