//! Forest persistence via bincode.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::error::ForestError;
use crate::forest::Forest;
use crate::node::Node;

/// Current binary format version.
const FORMAT_VERSION: u32 = 2;

/// Versioned envelope for the serialized forest.
#[derive(serde::Serialize, serde::Deserialize)]
struct ForestEnvelope {
    /// Format version for compatibility checking.
    format_version: u32,
    /// The serialized forest.
    forest: Forest,
}

/// Borrowing twin of [`ForestEnvelope`] so saving does not clone every tree.
#[derive(serde::Serialize)]
struct ForestEnvelopeRef<'a> {
    format_version: u32,
    forest: &'a Forest,
}

impl Forest {
    /// Save the forest to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeModel`] | bincode encoding failed |
    /// | [`ForestError::WriteModel`] | file write failed |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        let path = path.as_ref();

        let envelope = ForestEnvelopeRef {
            format_version: FORMAT_VERSION,
            forest: self,
        };
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| ForestError::SerializeModel { source: e })?;

        std::fs::write(path, &bytes).map_err(|e| ForestError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(
            size_bytes = bytes.len(),
            n_trees = self.trees.len(),
            "forest saved"
        );
        Ok(())
    }

    /// Load a forest from a binary file written by [`Forest::save`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ReadModel`] | file read failed |
    /// | [`ForestError::DeserializeModel`] | bincode decoding failed |
    /// | [`ForestError::IncompatibleModelVersion`] | format version mismatch |
    /// | [`ForestError::CorruptModel`] | a tree's arena, split variables or samples are invalid |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|e| ForestError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        // Check the version before decoding the body so old files fail cleanly.
        let format_version: u32 =
            bincode::deserialize(&bytes).map_err(|e| ForestError::DeserializeModel {
                path: path.to_path_buf(),
                source: e,
            })?;
        if format_version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: format_version,
                path: path.to_path_buf(),
            });
        }

        let envelope: ForestEnvelope =
            bincode::deserialize(&bytes).map_err(|e| ForestError::DeserializeModel {
                path: path.to_path_buf(),
                source: e,
            })?;

        if let Some(reason) = find_defect(&envelope.forest) {
            return Err(ForestError::CorruptModel {
                path: path.to_path_buf(),
                reason,
            });
        }

        debug!(
            n_trees = envelope.forest.trees.len(),
            num_variables = envelope.forest.num_variables(),
            num_samples = envelope.forest.num_samples,
            ci_group_size = envelope.forest.ci_group_size,
            "forest loaded"
        );
        Ok(envelope.forest)
    }
}

fn is_strictly_increasing(values: &[usize]) -> bool {
    values.windows(2).all(|w| w[0] < w[1])
}

/// Describe the first structural defect in `forest`, if any.
///
/// Children must come after their parent in the arena, which rules out
/// cycles; split variables must be ones the forest was trained on; every
/// sample id must be below the training row count.
fn find_defect(forest: &Forest) -> Option<String> {
    if !is_strictly_increasing(&forest.split_variables) {
        return Some(format!("split variables {:?} are not ascending", forest.split_variables));
    }
    if forest.ci_group_size == 0 || forest.trees.len() % forest.ci_group_size != 0 {
        return Some(format!(
            "{} trees do not form groups of {}",
            forest.trees.len(),
            forest.ci_group_size
        ));
    }

    let num_samples = forest.num_samples;
    for (t, tree) in forest.trees.iter().enumerate() {
        if tree.nodes.is_empty() {
            return Some(format!("tree {t} has no nodes"));
        }
        if !is_strictly_increasing(&tree.drawn_samples) {
            return Some(format!("tree {t} drawn samples are not sorted and distinct"));
        }
        if tree.drawn_samples.last().is_some_and(|&s| s >= num_samples) {
            return Some(format!("tree {t} draws a row outside {num_samples} training rows"));
        }
        for (i, node) in tree.nodes.iter().enumerate() {
            match node {
                Node::Leaf { samples } => {
                    if samples.iter().any(|&s| s >= num_samples) {
                        return Some(format!(
                            "tree {t} node {i} holds a row outside {num_samples} training rows"
                        ));
                    }
                }
                Node::Split {
                    variable,
                    left,
                    right,
                    ..
                } => {
                    for child in [left.index(), right.index()] {
                        if child <= i || child >= tree.nodes.len() {
                            return Some(format!(
                                "tree {t} node {i} has invalid child {child} ({} nodes)",
                                tree.nodes.len()
                            ));
                        }
                    }
                    if forest.split_variables.binary_search(&variable.index()).is_err() {
                        return Some(format!(
                            "tree {t} node {i} splits on column {variable}, not a split variable"
                        ));
                    }
                }
            }
        }
    }
    None
}
