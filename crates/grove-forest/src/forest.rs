//! The fitted forest and forest merging.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::ForestError;
use crate::tree::Tree;

/// A fitted forest.
///
/// Trees are stored in CI-group order: trees `g * ci_group_size ..
/// (g + 1) * ci_group_size` share one half-sample. Variance estimation
/// relies on this layout, so merged forests keep each input's groups intact.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Forest {
    pub(crate) trees: Vec<Tree>,
    /// Training column positions of the split variables, ascending.
    pub(crate) split_variables: Vec<usize>,
    /// Row count of the training data; leaf samples index below it.
    pub(crate) num_samples: usize,
    pub(crate) ci_group_size: usize,
}

impl Forest {
    pub(crate) fn new(
        trees: Vec<Tree>,
        split_variables: Vec<usize>,
        num_samples: usize,
        ci_group_size: usize,
    ) -> Self {
        Self {
            trees,
            split_variables,
            num_samples,
            ci_group_size,
        }
    }

    /// Concatenate the trees of several forests into one.
    ///
    /// Trees keep their input order, so the result has the sum of the
    /// inputs' tree counts.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::EmptyMerge`] | `forests` is empty |
    /// | [`ForestError::IncompatibleForests`] | split variables, training row count or `ci_group_size` differ from the first forest |
    #[instrument(skip_all, fields(n_forests = forests.len()))]
    pub fn merge(forests: &[Forest]) -> Result<Forest, ForestError> {
        merge_all(forests.iter())
    }

    /// Like [`Forest::merge`], for forests held behind [`Arc`].
    ///
    /// # Errors
    ///
    /// Same as [`Forest::merge`].
    #[instrument(skip_all, fields(n_forests = forests.len()))]
    pub fn merge_shared(forests: &[Arc<Forest>]) -> Result<Forest, ForestError> {
        merge_all(forests.iter().map(AsRef::as_ref))
    }

    /// Borrow the trees.
    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of split variables the forest was trained on.
    #[must_use]
    pub fn num_variables(&self) -> usize {
        self.split_variables.len()
    }

    /// Return the training column positions of the split variables.
    #[must_use]
    pub fn split_variables(&self) -> &[usize] {
        &self.split_variables
    }

    /// Return the number of rows in the training data.
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Return the number of trees per CI group.
    #[must_use]
    pub fn ci_group_size(&self) -> usize {
        self.ci_group_size
    }
}

fn merge_all<'a>(mut forests: impl Iterator<Item = &'a Forest>) -> Result<Forest, ForestError> {
    let first = forests.next().ok_or(ForestError::EmptyMerge)?;
    let mut trees = first.trees.clone();

    for (offset, forest) in forests.enumerate() {
        if forest.split_variables != first.split_variables
            || forest.num_samples != first.num_samples
            || forest.ci_group_size != first.ci_group_size
        {
            return Err(ForestError::IncompatibleForests {
                index: offset + 1,
                expected_split_variables: first.split_variables.clone(),
                split_variables: forest.split_variables.clone(),
                expected_num_samples: first.num_samples,
                num_samples: forest.num_samples,
                expected_ci_group_size: first.ci_group_size,
                ci_group_size: forest.ci_group_size,
            });
        }
        trees.extend(forest.trees.iter().cloned());
    }

    info!(n_trees = trees.len(), "forests merged");
    Ok(Forest::new(
        trees,
        first.split_variables.clone(),
        first.num_samples,
        first.ci_group_size,
    ))
}
