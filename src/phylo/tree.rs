//! Rooted phylogenetic tree stored in an arena.
//!
//! Nodes live in a contiguous vector and refer to each other through
//! [NodeIndex]. Trees coming from NexSON or Newick are not necessarily
//! binary, so every node keeps an ordered list of children.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Index of a node in a [Tree] (arena).
pub type NodeIndex = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    pub label: Option<String>,
    /// Length of the incoming edge, non-negative when present.
    pub branch_length: Option<f64>,
}

impl Node {
    fn new(parent: Option<NodeIndex>, label: Option<String>, branch_length: Option<f64>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            label,
            branch_length,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeIndex,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Creates a tree consisting of an unlabelled root only.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None, None, None)],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Appends a new child below `parent` and returns its index.
    pub fn add_child(
        &mut self,
        parent: NodeIndex,
        label: Option<String>,
        branch_length: Option<f64>,
    ) -> NodeIndex {
        let index = self.nodes.len();
        self.nodes
            .push(Node::new(Some(parent), label, branch_length));
        self.nodes[parent].children.push(index);
        index
    }

    /// Leaves in depth-first (left to right) order.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node.is_leaf() {
                leaves.push(index);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        leaves
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().len()
    }

    /// Labels of all leaves; unlabelled leaves are skipped.
    pub fn leaf_labels(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(|index| self.nodes[index].label.as_deref())
            .collect()
    }

    /// Number of distinct leaf labels, i.e. the size of the taxon namespace.
    pub fn taxon_count(&self) -> usize {
        self.leaf_labels().into_iter().collect::<BTreeSet<_>>().len()
    }

    /// Applies `rename` to every leaf label. Returning `None` keeps the old label.
    pub fn relabel_leaves<F>(&mut self, mut rename: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        for index in self.leaves() {
            let node = &mut self.nodes[index];
            if let Some(new_label) = node.label.as_deref().and_then(&mut rename) {
                node.label = Some(new_label);
            }
        }
    }

    /// Returns a copy whose leaf labels went through `mapping`.
    pub fn with_leaf_labels(&self, mapping: &HashMap<String, String>) -> Tree {
        let mut relabelled = self.clone();
        relabelled.relabel_leaves(|label| mapping.get(label).cloned());
        relabelled
    }

    /// Removes every leaf for which `keep` is false.
    ///
    /// Internal nodes left without leaves are dropped, internal nodes left
    /// with a single child are suppressed and their branch lengths summed.
    /// Returns the labels of the removed leaves.
    pub fn prune_leaves<F>(&mut self, keep: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut removed = Vec::new();
        for index in self.leaves() {
            let label = self.nodes[index].label.as_deref().unwrap_or_default();
            if !keep(label) {
                removed.push(label.to_string());
            }
        }
        if removed.is_empty() {
            return removed;
        }

        let mut pruned = Tree::new();
        let root = self.root;
        pruned.nodes[0].label = self.nodes[root].label.clone();
        pruned.nodes[0].branch_length = self.nodes[root].branch_length;
        for &child in &self.nodes[root].children {
            self.copy_kept(child, pruned.root, &keep, &mut pruned);
        }
        pruned.collapse_root_chain();

        *self = pruned;
        removed
    }

    fn has_kept_leaf<F: Fn(&str) -> bool>(&self, index: NodeIndex, keep: &F) -> bool {
        let node = &self.nodes[index];
        if node.is_leaf() {
            return keep(node.label.as_deref().unwrap_or_default());
        }
        node.children
            .iter()
            .any(|&child| self.has_kept_leaf(child, keep))
    }

    fn copy_kept<F: Fn(&str) -> bool>(
        &self,
        index: NodeIndex,
        new_parent: NodeIndex,
        keep: &F,
        out: &mut Tree,
    ) {
        if !self.has_kept_leaf(index, keep) {
            return;
        }

        // Walk down chains that would become unary after pruning.
        let mut current = index;
        let mut length = self.nodes[index].branch_length;
        loop {
            let kept_children: Vec<NodeIndex> = self.nodes[current]
                .children
                .iter()
                .copied()
                .filter(|&child| self.has_kept_leaf(child, keep))
                .collect();
            if kept_children.len() != 1 {
                break;
            }
            current = kept_children[0];
            length = sum_lengths(length, self.nodes[current].branch_length);
        }

        let node = &self.nodes[current];
        let copied = out.add_child(new_parent, node.label.clone(), length);
        for &child in &node.children {
            self.copy_kept(child, copied, keep, out);
        }
    }

    fn collapse_root_chain(&mut self) {
        while self.nodes[self.root].children.len() == 1 {
            let child = self.nodes[self.root].children[0];
            if self.nodes[child].is_leaf() {
                break;
            }
            self.nodes[child].parent = None;
            self.nodes[child].branch_length = None;
            self.root = child;
        }
    }
}

fn sum_lengths(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ((A:1,B:2):0.5,(C:1,D:1):0.5);
    fn quartet() -> Tree {
        let mut tree = Tree::new();
        let ab = tree.add_child(0, None, Some(0.5));
        tree.add_child(ab, Some("A".to_string()), Some(1.0));
        tree.add_child(ab, Some("B".to_string()), Some(2.0));
        let cd = tree.add_child(0, None, Some(0.5));
        tree.add_child(cd, Some("C".to_string()), Some(1.0));
        tree.add_child(cd, Some("D".to_string()), Some(1.0));
        tree
    }

    #[test]
    fn test_leaves_in_order() {
        let tree = quartet();
        assert_eq!(tree.leaf_labels(), vec!["A", "B", "C", "D"]);
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(tree.taxon_count(), 4);
    }

    #[test]
    fn test_taxon_count_ignores_repeated_labels() {
        let mut tree = quartet();
        tree.relabel_leaves(|label| (label == "D").then(|| "C".to_string()));
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(tree.taxon_count(), 3);
    }

    #[test]
    fn test_prune_suppresses_unary_nodes() {
        let mut tree = quartet();
        let removed = tree.prune_leaves(|label| label != "B");
        assert_eq!(removed, vec!["B".to_string()]);
        assert_eq!(tree.leaf_labels(), vec!["A", "C", "D"]);

        let a = tree
            .leaves()
            .into_iter()
            .find(|&i| tree.node(i).label.as_deref() == Some("A"))
            .unwrap();
        assert_eq!(tree.node(a).parent, Some(tree.root()));
        assert_eq!(tree.node(a).branch_length, Some(1.5));
    }

    #[test]
    fn test_prune_whole_clade_collapses_root() {
        let mut tree = quartet();
        tree.prune_leaves(|label| label == "C" || label == "D");
        assert_eq!(tree.leaf_labels(), vec!["C", "D"]);
        assert_eq!(tree.node(tree.root()).children.len(), 2);
    }

    #[test]
    fn test_with_leaf_labels() {
        let tree = quartet();
        let mapping = HashMap::from([("A".to_string(), "Alpha".to_string())]);
        let renamed = tree.with_leaf_labels(&mapping);
        assert_eq!(renamed.leaf_labels(), vec!["Alpha", "B", "C", "D"]);
        assert_eq!(tree.leaf_labels()[0], "A");
    }
}
