//! Model trees
//!
//! A model tree partitions the cases by tests on attribute values and carries a linear model at
//! every node. Every test has three outcomes:
//!
//! * a test on a continuous attribute sends not-applicable values to branch 1, values up to the
//!   cut to branch 2 and larger values to branch 3
//! * a test on a discrete attribute with two categories sends each code to the branch of the
//!   same number, so branch 1 again receives the not-applicable values
//! * a subset test on a discrete attribute with more categories sends each code to the branch
//!   whose subset contains it
//!
//! Nodes live in an arena and refer to each other by [`NodeId`](type.NodeId.html). Pruning turns
//! a branch node back into a leaf; the nodes of the removed subtree stay in the arena but can no
//! longer be reached from the root.
use cubist::{Dataset, Value};
use cubist_linear::LinearModel;
use ndarray::ArrayView1;

mod builder;
mod iter;
mod split;

pub(crate) use builder::{adjust_thresholds, Environment, TreeBuilder};
pub use iter::NodeIter;

/// Index of a node in the arena of a [`ModelTree`](struct.ModelTree.html)
pub type NodeId = usize;

/// Test carried out at a node
#[derive(Clone, Debug, PartialEq)]
pub enum Test {
    Leaf,
    /// Test on a discrete attribute with two categories
    Discrete { attribute: usize },
    /// Test of a continuous attribute against a cut
    Threshold { attribute: usize, cut: f64 },
    /// Subset test on a discrete attribute
    ///
    /// `subsets[v - 1]` flags the codes of branch `v`.
    Subset {
        attribute: usize,
        subsets: Vec<Vec<bool>>,
    },
}

impl Test {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Test::Leaf)
    }

    /// The tested attribute
    pub fn attribute(&self) -> Option<usize> {
        match self {
            Test::Leaf => None,
            Test::Discrete { attribute }
            | Test::Threshold { attribute, .. }
            | Test::Subset { attribute, .. } => Some(*attribute),
        }
    }

    /// Branch a value belongs to when the cases of a node are divided
    ///
    /// Codes which belong to no branch, such as missing values, give `None`.
    pub fn group(&self, value: Value) -> Option<usize> {
        match self {
            Test::Leaf => None,
            Test::Discrete { .. } => {
                let code = value.code();
                if (1..=3).contains(&code) {
                    Some(code)
                } else {
                    None
                }
            }
            Test::Threshold { cut, .. } => Some(threshold_outcome(value, *cut)),
            Test::Subset { subsets, .. } => {
                let code = value.code();
                subsets
                    .iter()
                    .position(|s| s.get(code).copied().unwrap_or(false))
                    .map(|v| v + 1)
            }
        }
    }
}

/// Outcome of a threshold test: 1 for not applicable, 2 up to the cut, 3 above it
pub(crate) fn threshold_outcome(value: Value, cut: f64) -> usize {
    if value.is_not_applicable() {
        1
    } else if value.as_f64() <= cut {
        2
    } else {
        3
    }
}

/// A node of a model tree
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) branches: Vec<NodeId>,
    pub(crate) test: Test,
    pub(crate) cases: usize,
    pub(crate) mean: f64,
    pub(crate) sd: f64,
    pub(crate) model: LinearModel,
    /// The model before smoothing, which descendants are blended with
    pub(crate) model_copy: Option<LinearModel>,
    pub(crate) params: f64,
    pub(crate) coeffs: f64,
    pub(crate) tree_err: f64,
    pub(crate) leaf_err: f64,
    pub(crate) utility: f64,
}

impl Node {
    pub(crate) fn leaf(
        parent: Option<NodeId>,
        cases: usize,
        mean: f64,
        sd: f64,
        model: LinearModel,
    ) -> Self {
        Node {
            parent,
            branches: Vec::new(),
            test: Test::Leaf,
            cases,
            mean,
            sd,
            model,
            model_copy: None,
            params: 0.0,
            coeffs: 0.0,
            tree_err: 0.0,
            leaf_err: 0.0,
            utility: 0.0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.test.is_leaf()
    }

    pub fn test(&self) -> &Test {
        &self.test
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children of a branch node, branch 1 first
    pub fn branches(&self) -> &[NodeId] {
        &self.branches
    }

    /// Number of training cases that reached this node
    pub fn cases(&self) -> usize {
        self.cases
    }

    /// Weighted mean of the target over the cases of this node
    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sd(&self) -> f64 {
        self.sd
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    /// Sum of the absolute errors of the subtree on its training cases
    pub fn tree_err(&self) -> f64 {
        self.tree_err
    }
}

/// A model tree grown over the training cases
#[derive(Clone, Debug, PartialEq)]
pub struct ModelTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl ModelTree {
    pub(crate) fn new() -> Self {
        ModelTree {
            nodes: Vec::new(),
            root: 0,
        }
    }

    pub(crate) fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Node reached by outcome `v` of the test at `id`
    pub fn branch(&self, id: NodeId, v: usize) -> NodeId {
        self.nodes[id].branches[v - 1]
    }

    /// Turns the branch node `id` into a leaf
    pub(crate) fn unsprout(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        node.test = Test::Leaf;
        node.branches.clear();
    }

    /// Iterates over the nodes of the subtree below `id`, `id` included
    pub fn iter_from(&self, id: NodeId) -> NodeIter<'_> {
        NodeIter::new(self, id)
    }

    pub fn iter(&self) -> NodeIter<'_> {
        self.iter_from(self.root)
    }

    /// Number of nodes in the subtree below `id`
    pub fn size(&self, id: NodeId) -> usize {
        self.iter_from(id).count()
    }

    /// Number of leaves below `id` that were reached by training cases
    pub fn leaves(&self, id: NodeId) -> usize {
        self.iter_from(id)
            .filter(|(_, node)| node.is_leaf() && node.cases > 0)
            .count()
    }

    /// Greatest number of tests on a path from the root to a leaf
    pub fn depth(&self) -> usize {
        fn depth_below(tree: &ModelTree, id: NodeId) -> usize {
            tree.nodes[id]
                .branches
                .iter()
                .map(|&b| 1 + depth_below(tree, b))
                .max()
                .unwrap_or(0)
        }
        depth_below(self, self.root)
    }

    /// Value of the tree for a case, clamped to `[floor, ceiling]`
    ///
    /// The case follows the tests down to a leaf, except that a discrete value leading to an
    /// empty branch stops at the node of the test and uses its model.
    pub fn value(&self, case: ArrayView1<'_, Value>, floor: f64, ceiling: f64) -> f64 {
        let mut id = self.root;
        loop {
            let node = &self.nodes[id];
            let next = match &node.test {
                Test::Leaf => None,
                Test::Discrete { attribute } => {
                    let v = case[*attribute].code();
                    if v != 0 && v <= 3 && self.nodes[node.branches[v - 1]].cases >= 1 {
                        Some(v)
                    } else {
                        None
                    }
                }
                Test::Threshold { attribute, cut } => {
                    Some(threshold_outcome(case[*attribute], *cut))
                }
                Test::Subset {
                    attribute,
                    subsets,
                } => {
                    let v = case[*attribute].code();
                    if v == 1 {
                        Some(1)
                    } else if subsets[1].get(v).copied().unwrap_or(false) {
                        Some(2)
                    } else {
                        Some(3)
                    }
                }
            };

            match next {
                Some(v) => id = node.branches[v - 1],
                None => return node.model.value(case, floor, ceiling),
            }
        }
    }

    /// Values of the tree for every case of a dataset
    pub fn predict(&self, dataset: &Dataset, floor: f64, ceiling: f64) -> Vec<f64> {
        (0..dataset.nsamples())
            .map(|i| self.value(dataset.row(i), floor, ceiling))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// x <= 5 ? (colour a or b ? 1 : 2) : 10 + x
    fn small_tree() -> ModelTree {
        let mut tree = ModelTree::new();
        let constant = |v| LinearModel::constant(v, 2);
        let root = tree.add(Node::leaf(None, 10, 5.0, 1.0, constant(5.0)));
        tree.node_mut(root).test = Test::Threshold {
            attribute: 0,
            cut: 5.0,
        };

        let na = tree.add(Node::leaf(Some(root), 0, 5.0, 1.0, constant(5.0)));
        let lo = tree.add(Node::leaf(Some(root), 6, 1.5, 1.0, constant(1.5)));
        let hi = tree.add(Node::leaf(
            Some(root),
            4,
            17.0,
            1.0,
            LinearModel {
                intercept: 10.0,
                coefficients: array![1.0, 0.0],
            },
        ));
        tree.node_mut(root).branches = vec![na, lo, hi];

        tree.node_mut(lo).test = Test::Subset {
            attribute: 1,
            subsets: vec![
                vec![false, true, false, false, false],
                vec![false, false, true, true, false],
                vec![false, false, false, false, true],
            ],
        };
        let lo_na = tree.add(Node::leaf(Some(lo), 0, 1.5, 1.0, constant(1.5)));
        let lo_ab = tree.add(Node::leaf(Some(lo), 3, 1.0, 1.0, constant(1.0)));
        let lo_c = tree.add(Node::leaf(Some(lo), 3, 2.0, 1.0, constant(2.0)));
        tree.node_mut(lo).branches = vec![lo_na, lo_ab, lo_c];

        tree
    }

    #[test]
    fn cases_follow_the_tests() {
        let tree = small_tree();
        let value = |x: Value, c: usize| tree.value(array![x, Value::Discrete(c)].view(), 0.0, 100.0);

        assert_abs_diff_eq!(value(Value::Continuous(2.0), 2), 1.0);
        assert_abs_diff_eq!(value(Value::Continuous(5.0), 3), 1.0);
        assert_abs_diff_eq!(value(Value::Continuous(2.0), 4), 2.0);
        assert_abs_diff_eq!(value(Value::Continuous(7.0), 2), 17.0);
        // not applicable reaches the empty branch, which predicts the parent mean
        assert_abs_diff_eq!(value(Value::NotApplicable, 2), 5.0);
        assert_abs_diff_eq!(
            tree.value(array![Value::Continuous(95.0), Value::Discrete(2)].view(), 0.0, 100.0),
            100.0
        );
    }

    #[test]
    fn counts() {
        let tree = small_tree();

        assert_eq!(tree.size(tree.root()), 7);
        assert_eq!(tree.leaves(tree.root()), 3);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn unsprouted_nodes_are_unreachable() {
        let mut tree = small_tree();
        let lo = tree.branch(tree.root(), 2);
        tree.unsprout(lo);

        assert_eq!(tree.size(tree.root()), 4);
        assert_eq!(tree.leaves(tree.root()), 2);
        assert_abs_diff_eq!(
            tree.value(array![Value::Continuous(2.0), Value::Discrete(4)].view(), 0.0, 100.0),
            1.5
        );
    }

    #[test]
    fn grouping() {
        let subset = Test::Subset {
            attribute: 0,
            subsets: vec![
                vec![false, true, false, false],
                vec![false, false, true, false],
                vec![false, false, false, true],
            ],
        };
        assert_eq!(subset.group(Value::NotApplicable), Some(1));
        assert_eq!(subset.group(Value::Discrete(3)), Some(3));
        assert_eq!(subset.group(Value::Missing), None);

        let discrete = Test::Discrete { attribute: 0 };
        assert_eq!(discrete.group(Value::Discrete(2)), Some(2));
        assert_eq!(discrete.group(Value::Discrete(7)), None);
    }
}
