use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::{
    data::Data,
    node::{Node, NodeIndex, routes_left},
    relabel::RelabelingStrategy,
    sampler::RandomSampler,
    split::{SplitConstraints, SplittingRule, draw_candidate_variables},
};

/// A fitted tree.
///
/// Stored as an arena-based `Vec<Node>` with the root at index 0. Leaves hold
/// the rows used to estimate them; `drawn_samples` holds every row that was
/// part of the tree's sample (both honesty halves), which is what
/// out-of-bag prediction excludes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) drawn_samples: Vec<usize>,
}

impl Tree {
    /// Assemble a tree; `drawn_samples` must be sorted and deduplicated.
    pub(crate) fn new(nodes: Vec<Node>, drawn_samples: Vec<usize>) -> Self {
        debug_assert!(drawn_samples.windows(2).all(|w| w[0] < w[1]));
        Self {
            nodes,
            drawn_samples,
        }
    }

    /// Borrow the node arena.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Borrow the root node.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.nodes[NodeIndex::ROOT.index()]
    }

    /// Return the sorted rows this tree was grown and estimated from.
    #[must_use]
    pub fn drawn_samples(&self) -> &[usize] {
        &self.drawn_samples
    }

    /// Return `true` if `row` was part of this tree's sample.
    #[must_use]
    pub fn is_in_bag(&self, row: usize) -> bool {
        self.drawn_samples.binary_search(&row).is_ok()
    }

    /// Route `row` of `data` from the root to a leaf.
    ///
    /// At each `Split`, goes left when the row's value is `<= threshold`,
    /// or when it is missing and the split sends missing values left.
    #[must_use]
    pub fn find_leaf(&self, data: &Data, row: usize) -> NodeIndex {
        route(&self.nodes, |col| data.get(row, col))
    }

    /// Like [`Tree::find_leaf`], reading split values through `value_of(column)`.
    #[must_use]
    pub fn find_leaf_by(&self, value_of: impl Fn(usize) -> f64) -> NodeIndex {
        route(&self.nodes, value_of)
    }

    /// Return the samples of the node at `leaf` (empty for split nodes).
    #[must_use]
    pub fn leaf_samples(&self, leaf: NodeIndex) -> &[usize] {
        self.nodes[leaf.index()].samples()
    }

    /// Return the total number of nodes in the tree (both splits and leaves).
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the maximum depth of the tree.
    ///
    /// A single-node tree (just a root leaf) has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }

        // BFS: (node_index, current_depth)
        let mut max_depth = 0usize;
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((NodeIndex::ROOT, 0usize));

        while let Some((node_idx, d)) = queue.pop_front() {
            match &self.nodes[node_idx.index()] {
                Node::Leaf { .. } => max_depth = max_depth.max(d),
                Node::Split { left, right, .. } => {
                    queue.push_back((*left, d + 1));
                    queue.push_back((*right, d + 1));
                }
            }
        }

        max_depth
    }
}

/// Grows single trees for one forest training run.
///
/// Borrowed pieces are shared read-only by every worker thread; all
/// per-tree state lives in the RNG and buffers passed to [`TreeTrainer::train`].
#[derive(Debug)]
pub(crate) struct TreeTrainer<'a> {
    pub(crate) relabeling: &'a dyn RelabelingStrategy,
    pub(crate) splitting_rule: &'a dyn SplittingRule,
    pub(crate) sampler: &'a RandomSampler,
    pub(crate) split_variables: &'a [usize],
    pub(crate) mtry: usize,
    pub(crate) constraints: SplitConstraints,
    pub(crate) honesty: Option<Honesty>,
}

/// Honest estimation settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Honesty {
    /// Fraction of the tree's clusters used to choose splits.
    pub(crate) fraction: f64,
    /// Collapse splits that end up with an empty child.
    pub(crate) prune_empty_leaves: bool,
}

impl TreeTrainer<'_> {
    /// Grow one tree from the sampled `clusters` (row ids without clustering).
    pub(crate) fn train(&self, data: &Data, clusters: &[usize], rng: &mut ChaCha8Rng) -> Tree {
        let (growing_clusters, populating_clusters) = match self.honesty {
            Some(honesty) => self.sampler.subsample_with_oob(clusters, honesty.fraction, rng),
            None => (clusters.to_vec(), Vec::new()),
        };

        let growing = self.sampler.sample_from_clusters(&growing_clusters, rng);
        let mut nodes: Vec<Node> = Vec::new();
        self.grow(data, growing, rng, &mut nodes);

        if let Some(honesty) = self.honesty {
            let populating = self.sampler.sample_from_clusters(&populating_clusters, rng);
            repopulate_leaves(&mut nodes, data, &populating);
            if honesty.prune_empty_leaves {
                nodes = prune_empty_leaves(nodes);
            }
        }

        let drawn_samples = self.sampler.samples_in_clusters(clusters);
        trace!(
            n_nodes = nodes.len(),
            n_drawn = drawn_samples.len(),
            "tree grown"
        );
        Tree::new(nodes, drawn_samples)
    }

    /// Recursively grow the subtree for `samples`.
    ///
    /// Returns the [`NodeIndex`] of the node just created in `arena`.
    fn grow(
        &self,
        data: &Data,
        samples: Vec<usize>,
        rng: &mut ChaCha8Rng,
        arena: &mut Vec<Node>,
    ) -> NodeIndex {
        let make_leaf = |arena: &mut Vec<Node>, samples: Vec<usize>| -> NodeIndex {
            let idx = arena.len();
            arena.push(Node::Leaf { samples });
            NodeIndex::new(idx)
        };

        if samples.len() < 2 * self.constraints.min_node_size {
            return make_leaf(arena, samples);
        }

        let Some(responses) = self.relabeling.relabel(&samples, data) else {
            return make_leaf(arena, samples);
        };
        let first = responses[0];
        if responses.iter().all(|&r| r == first) {
            return make_leaf(arena, samples);
        }

        let candidates = draw_candidate_variables(self.split_variables, self.mtry, rng);
        let Some(split) = self.splitting_rule.find_best_split(
            data,
            &samples,
            &responses,
            &candidates,
            &self.constraints,
        ) else {
            return make_leaf(arena, samples);
        };

        let column = data.column(split.variable.index());
        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| routes_left(column[s], split.threshold, split.send_missing_left));
        if left_samples.is_empty() || right_samples.is_empty() {
            return make_leaf(arena, samples);
        }

        // Arena pattern: reserve index, recurse, then overwrite with the split.
        let node_idx = arena.len();
        arena.push(Node::Leaf {
            samples: Vec::new(),
        });

        let left = self.grow(data, left_samples, rng, arena);
        let right = self.grow(data, right_samples, rng, arena);

        arena[node_idx] = Node::Split {
            variable: split.variable,
            threshold: split.threshold,
            send_missing_left: split.send_missing_left,
            left,
            right,
        };

        NodeIndex::new(node_idx)
    }
}

/// Walk `nodes` from the root to a leaf, reading split values through `value_of`.
fn route(nodes: &[Node], value_of: impl Fn(usize) -> f64) -> NodeIndex {
    let mut idx = NodeIndex::ROOT;
    loop {
        match &nodes[idx.index()] {
            Node::Leaf { .. } => return idx,
            Node::Split {
                variable,
                threshold,
                send_missing_left,
                left,
                right,
            } => {
                idx = if routes_left(value_of(variable.index()), *threshold, *send_missing_left) {
                    *left
                } else {
                    *right
                };
            }
        }
    }
}

/// Empty every leaf, then route `samples` through the splits to refill them.
fn repopulate_leaves(nodes: &mut [Node], data: &Data, samples: &[usize]) {
    for node in nodes.iter_mut() {
        if let Node::Leaf { samples } = node {
            samples.clear();
        }
    }
    for &row in samples {
        let leaf = route(nodes, |col| data.get(row, col));
        if let Node::Leaf { samples } = &mut nodes[leaf.index()] {
            samples.push(row);
        }
    }
}

/// Replace every split with an empty child by its other child, then compact
/// the arena so the root is back at index 0.
///
/// A tree whose leaves are all empty collapses to a single empty leaf.
fn prune_empty_leaves(mut nodes: Vec<Node>) -> Vec<Node> {
    match resolve_non_empty(&mut nodes, NodeIndex::ROOT) {
        Some(root) => {
            let mut compacted = Vec::with_capacity(nodes.len());
            copy_subtree(&nodes, root, &mut compacted);
            compacted
        }
        None => vec![Node::Leaf {
            samples: Vec::new(),
        }],
    }
}

/// Return the node standing in for the subtree at `idx`, or `None` if it holds no samples.
fn resolve_non_empty(nodes: &mut [Node], idx: NodeIndex) -> Option<NodeIndex> {
    let (left, right) = match &nodes[idx.index()] {
        Node::Leaf { samples } => return (!samples.is_empty()).then_some(idx),
        Node::Split { left, right, .. } => (*left, *right),
    };
    let left = resolve_non_empty(nodes, left);
    let right = resolve_non_empty(nodes, right);
    match (left, right) {
        (Some(l), Some(r)) => {
            if let Node::Split { left, right, .. } = &mut nodes[idx.index()] {
                *left = l;
                *right = r;
            }
            Some(idx)
        }
        (Some(child), None) | (None, Some(child)) => Some(child),
        (None, None) => None,
    }
}

fn copy_subtree(nodes: &[Node], idx: NodeIndex, out: &mut Vec<Node>) -> NodeIndex {
    let at = out.len();
    out.push(nodes[idx.index()].clone());
    if let Node::Split { left, right, .. } = &nodes[idx.index()] {
        let new_left = copy_subtree(nodes, *left, out);
        let new_right = copy_subtree(nodes, *right, out);
        if let Node::Split { left, right, .. } = &mut out[at] {
            *left = new_left;
            *right = new_right;
        }
    }
    NodeIndex::new(at)
}
