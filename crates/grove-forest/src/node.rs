use std::fmt;

/// Zero-based data column used by a split.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct VariableIndex(usize);

impl VariableIndex {
    /// Create a new variable index from a zero-based column position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VariableIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a `Vec<Node>` arena, identifying a specific node in a tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// The root of every tree.
    pub const ROOT: NodeIndex = NodeIndex(0);

    /// Create a new node index from a zero-based arena position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node in a tree arena.
///
/// Trees are stored as `Vec<Node>` where children are referenced by
/// [`NodeIndex`] rather than pointers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// An interior split node.
    Split {
        /// Column the split tests.
        variable: VariableIndex,
        /// Non-missing values `<= threshold` go left. `NaN` splits on missingness alone.
        threshold: f64,
        /// Direction taken by rows whose value is missing.
        send_missing_left: bool,
        /// Index of the left child node.
        left: NodeIndex,
        /// Index of the right child node.
        right: NodeIndex,
    },
    /// A terminal leaf node.
    Leaf {
        /// Rows used to estimate this leaf (the honest half when honesty is on).
        samples: Vec<usize>,
    },
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Return the leaf samples; empty for split nodes.
    #[must_use]
    pub fn samples(&self) -> &[usize] {
        match self {
            Node::Leaf { samples } => samples,
            Node::Split { .. } => &[],
        }
    }
}

/// Return `true` when `value` is routed to the left child of a split.
#[inline]
pub(crate) fn routes_left(value: f64, threshold: f64, send_missing_left: bool) -> bool {
    if value.is_nan() {
        send_missing_left
    } else {
        value <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::{Node, NodeIndex, VariableIndex, routes_left};

    #[test]
    fn variable_index_roundtrip() {
        let v = VariableIndex::new(7);
        assert_eq!(v.index(), 7);
        assert_eq!(v.to_string(), "7");
    }

    #[test]
    fn node_index_root_is_zero() {
        assert_eq!(NodeIndex::ROOT.index(), 0);
        assert_eq!(NodeIndex::new(3).to_string(), "3");
    }

    #[test]
    fn leaf_exposes_samples() {
        let leaf = Node::Leaf {
            samples: vec![1, 4],
        };
        assert!(leaf.is_leaf());
        assert_eq!(leaf.samples(), &[1, 4]);
    }

    #[test]
    fn split_has_no_samples() {
        let split = Node::Split {
            variable: VariableIndex::new(0),
            threshold: 1.0,
            send_missing_left: false,
            left: NodeIndex::new(1),
            right: NodeIndex::new(2),
        };
        assert!(!split.is_leaf());
        assert!(split.samples().is_empty());
    }

    #[test]
    fn routing_with_missing_values() {
        assert!(routes_left(1.0, 1.0, false));
        assert!(!routes_left(1.5, 1.0, true));
        assert!(routes_left(f64::NAN, 1.0, true));
        assert!(!routes_left(f64::NAN, 1.0, false));
        // Missingness split: every observed value goes right.
        assert!(!routes_left(-1e300, f64::NAN, true));
        assert!(routes_left(f64::NAN, f64::NAN, true));
    }
}
