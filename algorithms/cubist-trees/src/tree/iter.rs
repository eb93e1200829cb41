use std::iter::Iterator;

use super::{ModelTree, Node, NodeId};

/// Depth-first iterator over the nodes of a model tree, with their ids
pub struct NodeIter<'a> {
    tree: &'a ModelTree,
    queue: Vec<NodeId>,
}

impl<'a> NodeIter<'a> {
    pub fn new(tree: &'a ModelTree, start: NodeId) -> Self {
        NodeIter {
            tree,
            queue: vec![start],
        }
    }
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        self.queue.pop().map(|id| {
            let node = tree.node(id);
            self.queue.extend(node.branches.iter().rev());

            (id, node)
        })
    }
}
