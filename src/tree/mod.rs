use std::fmt::{Display, Formatter};
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod local_trees;
pub(crate) mod matching;
mod spr;

pub use local_trees::{LocalTreeSpr, LocalTrees};
pub use spr::{apply_spr, Spr};

/// Node id correspondence between two trees. Entry `i` is the id in the second tree of
/// node `i` in the first tree, or `None` if that node has no counterpart.
pub type Mapping = Vec<Option<NodeId>>;

/// An index into the node array of a [`LocalTree`]. Leaves occupy the ids `0..nleaves` and
/// keep their id in every block, internal nodes follow after them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Create a node id from a raw index.
    pub fn from_usize(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index of the node
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A single node of a local tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalNode {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Option<[NodeId; 2]>,
    /// discrete time index of the node
    pub(crate) age: usize,
    /// branch of the population model the edge above this node belongs to
    pub(crate) pop_path: usize,
}

impl LocalNode {
    fn leaf(parent: Option<NodeId>, age: usize, pop_path: usize) -> Self {
        Self {
            parent,
            children: None,
            age,
            pop_path,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Option<[NodeId; 2]> {
        self.children
    }

    pub fn age(&self) -> usize {
        self.age
    }

    pub fn pop_path(&self) -> usize {
        self.pop_path
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Old-to-new node id table produced by structural edits that reuse or compact node ids.
/// Every consumer holding a node id of the tree before the edit has to pass it through
/// [`Displacement::apply`] before using it with the edited tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Displacement(Vec<Option<NodeId>>);

impl Displacement {
    fn identity(len: usize) -> Self {
        Self((0..len).map(|i| Some(NodeId(i))).collect())
    }

    /// The id of `node` after the edit, `None` if the node was deleted.
    pub fn apply(&self, node: NodeId) -> Option<NodeId> {
        self.0.get(node.0).copied().flatten()
    }

    /// Number of ids before the edit
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Ids touched by [`LocalTree::add_tree_branch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchInsert {
    pub newleaf: NodeId,
    pub newcoal: NodeId,
    pub displacement: Displacement,
}

/// A rooted binary tree over the lineages present in one genomic block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTree {
    nodes: Vec<LocalNode>,
    root: NodeId,
    nleaves: usize,
}

impl LocalTree {
    /// A tree consisting of a single leaf.
    pub fn single_leaf() -> Self {
        Self {
            nodes: vec![LocalNode::leaf(None, 0, 0)],
            root: NodeId(0),
            nleaves: 1,
        }
    }

    /// Build a tree from a parent array and node ages. Leaves are the first `(n + 1) / 2`
    /// entries, the root is the only node without parent.
    ///
    /// # Errors
    /// Returns a precondition error if the arrays do not describe a binary tree with
    /// leaves in front.
    pub fn from_parents(parents: &[Option<usize>], ages: &[usize]) -> Result<Self> {
        if parents.is_empty() || parents.len() != ages.len() || parents.len() % 2 == 0 {
            return Err(Error::precondition(format!(
                "cannot build a binary tree from {} parents and {} ages",
                parents.len(),
                ages.len()
            )));
        }

        let nnodes = parents.len();
        let nleaves = (nnodes + 1) / 2;
        let mut nodes: Vec<LocalNode> = ages
            .iter()
            .zip(parents)
            .map(|(&age, &parent)| LocalNode::leaf(parent.map(NodeId), age, 0))
            .collect();

        let mut child_lists = vec![Vec::with_capacity(2); nnodes];
        let mut root = None;
        for (i, parent) in parents.iter().enumerate() {
            match parent {
                Some(p) if *p < nnodes && *p != i => child_lists[*p].push(NodeId(i)),
                Some(p) => {
                    return Err(Error::precondition(format!(
                        "node {i} has invalid parent {p}"
                    )))
                }
                None if root.is_none() => root = Some(NodeId(i)),
                None => return Err(Error::precondition("tree has more than one root")),
            }
        }

        for (i, children) in child_lists.into_iter().enumerate() {
            match (i < nleaves, children.as_slice()) {
                (true, []) => {}
                (false, [c0, c1]) => nodes[i].children = Some([*c0, *c1]),
                _ => {
                    return Err(Error::precondition(format!(
                        "node {i} has {} children",
                        children.len()
                    )))
                }
            }
        }

        let tree = Self {
            nodes,
            root: root.ok_or_else(|| Error::precondition("tree has no root"))?,
            nleaves,
        };
        tree.validate()?;
        Ok(tree)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.nleaves
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_root(&self, node: NodeId) -> bool {
        node == self.root
    }

    /// Whether the id refers to a node of this tree
    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        node.0 < self.nleaves
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> Option<[NodeId; 2]> {
        self.nodes[node.0].children
    }

    pub fn age(&self, node: NodeId) -> usize {
        self.nodes[node.0].age
    }

    /// The other child of the node's parent, `None` for the root.
    pub fn sibling(&self, node: NodeId) -> Option<NodeId> {
        let [c0, c1] = self.children(self.parent(node)?)?;
        Some(if c0 == node { c1 } else { c0 })
    }

    /// Whether `node` lies in the subtree rooted at `ancestor` (a node is its own
    /// descendant).
    pub fn is_descendant(&self, mut node: NodeId, ancestor: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.parent(node) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Node ids in post order (children before parents), starting at `start`.
    pub fn postorder_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(start, false)];
        while let Some((node, expanded)) = stack.pop() {
            match (expanded, self.children(node)) {
                (false, Some([c0, c1])) => {
                    stack.push((node, true));
                    stack.push((c1, false));
                    stack.push((c0, false));
                }
                _ => order.push(node),
            }
        }
        order
    }

    pub fn postorder(&self) -> Vec<NodeId> {
        self.postorder_from(self.root)
    }

    /// Check the binary tree invariant, parent/child agreement and that no node is older
    /// than its parent.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.len() != 2 * self.nleaves - 1 {
            return Err(Error::structure(format!(
                "tree with {} leaves has {} nodes",
                self.nleaves,
                self.nodes.len()
            )));
        }
        if self.parent(self.root).is_some() {
            return Err(Error::structure(format!("root {} has a parent", self.root)));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i);
            match (i < self.nleaves, node.children) {
                (true, None) => {}
                (false, Some(children)) => {
                    if children[0] == children[1] {
                        return Err(Error::structure(format!("node {i} has a duplicate child")));
                    }
                    for child in children {
                        if !self.contains(child) || self.parent(child) != Some(id) {
                            return Err(Error::structure(format!(
                                "child {child} of node {i} does not point back to it"
                            )));
                        }
                        if self.age(child) > node.age {
                            return Err(Error::structure(format!(
                                "node {child} is older than its parent {i}"
                            )));
                        }
                    }
                }
                _ => {
                    return Err(Error::structure(format!(
                        "node {i} violates the leaves-first layout"
                    )))
                }
            }
            if id != self.root && node.parent.is_none() {
                return Err(Error::structure(format!("node {i} is disconnected")));
            }
        }

        if self.postorder().len() != self.nodes.len() {
            return Err(Error::structure("tree contains a cycle or unreachable nodes"));
        }
        Ok(())
    }

    /// Insert a new leaf and its parent onto the branch above `node` at `time`.
    ///
    /// The new leaf takes id `nleaves`. The internal node that held this id so far moves to
    /// id `nnodes`, the new coalescence node gets id `nnodes + 1`. The returned
    /// [`BranchInsert`] carries the displacement of pre-existing ids.
    ///
    /// # Errors
    /// Returns a precondition error if `node` does not exist or `time` does not lie on the
    /// branch above `node`.
    pub fn add_tree_branch(
        &mut self,
        node: NodeId,
        time: usize,
        pop_path: usize,
    ) -> Result<BranchInsert> {
        self.add_aged_branch(node, time, 0, pop_path, pop_path)
    }

    /// Like [`LocalTree::add_tree_branch`], for a leaf sampled at `leaf_age`. The new leaf is
    /// tagged with `leaf_pop_path`, the new coalescence node with `coal_pop_path`.
    ///
    /// # Errors
    /// Also fails if the leaf would be older than the node it coalesces in.
    pub fn add_aged_branch(
        &mut self,
        node: NodeId,
        time: usize,
        leaf_age: usize,
        leaf_pop_path: usize,
        coal_pop_path: usize,
    ) -> Result<BranchInsert> {
        if !self.contains(node) {
            return Err(Error::precondition(format!("node {node} is not in the tree")));
        }
        self.check_branch_time(node, time)?;
        if time < leaf_age {
            return Err(Error::precondition(format!(
                "leaf of age {leaf_age} cannot coalesce at time {time}"
            )));
        }

        let nnodes = self.nodes.len();
        let newleaf = NodeId(self.nleaves);
        let newcoal = NodeId(nnodes + 1);
        let mut displacement = Displacement::identity(nnodes);

        if self.nleaves < nnodes {
            // move the internal node occupying the new leaf id to the end
            let moved = NodeId(nnodes);
            let old = self.nodes[newleaf.0].clone();
            if let Some(parent) = old.parent {
                self.replace_child(parent, newleaf, moved);
            } else {
                self.root = moved;
            }
            if let Some(children) = old.children {
                for child in children {
                    self.nodes[child.0].parent = Some(moved);
                }
            }
            self.nodes.push(old);
            self.nodes[newleaf.0] = LocalNode::leaf(Some(newcoal), leaf_age, leaf_pop_path);
            displacement.0[newleaf.0] = Some(moved);
        } else {
            self.nodes.push(LocalNode::leaf(Some(newcoal), leaf_age, leaf_pop_path));
        }

        let node = displacement.apply(node).unwrap_or(node);
        let parent = self.parent(node);
        self.nodes.push(LocalNode {
            parent,
            children: Some([node, newleaf]),
            age: time,
            pop_path: coal_pop_path,
        });
        match parent {
            Some(parent) => self.replace_child(parent, node, newcoal),
            None => self.root = newcoal,
        }
        self.nodes[node.0].parent = Some(newcoal);
        self.nleaves += 1;

        Ok(BranchInsert {
            newleaf,
            newcoal,
            displacement,
        })
    }

    /// Remove a leaf and its parent from the tree. Remaining ids are compacted in order, so
    /// leaves stay in front of internal nodes.
    ///
    /// # Errors
    /// Returns a precondition error if `leaf` is not a leaf or it is the only leaf.
    pub fn remove_tree_branch(&mut self, leaf: NodeId) -> Result<Displacement> {
        if !self.is_leaf(leaf) || self.nleaves < 2 {
            return Err(Error::precondition(format!(
                "cannot remove leaf {leaf} from a tree with {} leaves",
                self.nleaves
            )));
        }

        let parent = self
            .parent(leaf)
            .ok_or_else(|| Error::structure(format!("leaf {leaf} has no parent")))?;
        let sibling = self
            .sibling(leaf)
            .ok_or_else(|| Error::structure(format!("leaf {leaf} has no sibling")))?;
        let grandparent = self.parent(parent);
        match grandparent {
            Some(grandparent) => self.replace_child(grandparent, parent, sibling),
            None => self.root = sibling,
        }
        self.nodes[sibling.0].parent = grandparent;

        let mut table = Vec::with_capacity(self.nodes.len());
        let mut next = 0;
        for i in 0..self.nodes.len() {
            if i == leaf.0 || i == parent.0 {
                table.push(None);
            } else {
                table.push(Some(NodeId(next)));
                next += 1;
            }
        }
        let displacement = Displacement(table);
        let remap = |id: NodeId| displacement.apply(id);

        let mut nodes = Vec::with_capacity(next);
        for (i, node) in self.nodes.iter().enumerate() {
            if i == leaf.0 || i == parent.0 {
                continue;
            }
            nodes.push(LocalNode {
                parent: node.parent.and_then(remap),
                children: match node.children {
                    Some([c0, c1]) => Some([
                        remap(c0).ok_or_else(|| Error::structure("child was removed"))?,
                        remap(c1).ok_or_else(|| Error::structure("child was removed"))?,
                    ]),
                    None => None,
                },
                age: node.age,
                pop_path: node.pop_path,
            });
        }

        self.root = remap(self.root).ok_or_else(|| Error::structure("root was removed"))?;
        self.nodes = nodes;
        self.nleaves -= 1;
        Ok(displacement)
    }

    /// Relabel-invariant description of the subtree below `node`, labelling leaves through
    /// `labels` (usually the sequence ids of the ARG). Population paths other than 0 are
    /// appended as `#path`.
    pub fn canonical_subtree(&self, node: NodeId, labels: &[usize]) -> String {
        let label = match self.children(node) {
            None => labels.get(node.0).copied().unwrap_or(node.0).to_string(),
            Some([c0, c1]) => {
                let mut parts = [
                    self.canonical_subtree(c0, labels),
                    self.canonical_subtree(c1, labels),
                ];
                parts.sort();
                format!("({},{})", parts[0], parts[1])
            }
        };
        match self.nodes[node.0].pop_path {
            0 => format!("{label}@{}", self.age(node)),
            pop_path => format!("{label}@{}#{pop_path}", self.age(node)),
        }
    }

    pub fn canonical(&self, labels: &[usize]) -> String {
        self.canonical_subtree(self.root, labels)
    }

    /// Check that `time` lies on the branch above `node`.
    pub(crate) fn check_branch_time(&self, node: NodeId, time: usize) -> Result<()> {
        let lower = self.age(node);
        let upper = self.parent(node).map(|p| self.age(p));
        if time < lower || upper.map_or(false, |upper| time > upper) {
            return Err(Error::precondition(format!(
                "time {time} is not on the branch above node {node} ({lower}..{upper:?})"
            )));
        }
        Ok(())
    }

    pub(crate) fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        if let Some(children) = self.nodes[parent.0].children.as_mut() {
            for child in children.iter_mut() {
                if *child == old {
                    *child = new;
                }
            }
        }
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> &mut LocalNode {
        &mut self.nodes[node.0]
    }

    pub(crate) fn set_root(&mut self, node: NodeId) {
        self.root = node;
    }
}

impl Index<NodeId> for LocalTree {
    type Output = LocalNode;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index.0]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// ((0,1)3@1,2)4@3
    pub(crate) fn three_leaf_tree() -> LocalTree {
        LocalTree::from_parents(&[Some(3), Some(3), Some(4), Some(4), None], &[0, 0, 0, 1, 3])
            .unwrap()
    }

    #[test]
    fn test_from_parents() {
        let tree = three_leaf_tree();
        assert_eq!(tree.num_leaves(), 3);
        assert_eq!(tree.root(), NodeId(4));
        assert_eq!(tree.sibling(NodeId(2)), Some(NodeId(3)));
        assert_eq!(tree.sibling(NodeId(4)), None);
        assert!(tree.is_descendant(NodeId(1), NodeId(4)));
        assert!(!tree.is_descendant(NodeId(2), NodeId(3)));
        assert_eq!(tree.postorder().last(), Some(&NodeId(4)));
    }

    #[test]
    fn test_reject_malformed() {
        // two roots
        assert!(LocalTree::from_parents(&[Some(2), None, None], &[0, 0, 1]).is_err());
        // child older than parent
        assert!(LocalTree::from_parents(&[Some(2), Some(2), None], &[2, 0, 1]).is_err());
        // leaf with children
        assert!(LocalTree::from_parents(&[None, Some(0), Some(0)], &[1, 0, 0]).is_err());
    }

    #[test]
    fn test_add_branch_displaces_internal_node() {
        let mut tree = three_leaf_tree();
        let insert = tree.add_tree_branch(NodeId(2), 2, 0).unwrap();

        assert_eq!(insert.newleaf, NodeId(3));
        assert_eq!(insert.newcoal, NodeId(6));
        // the old internal node 3 now lives at id 5
        assert_eq!(insert.displacement.apply(NodeId(3)), Some(NodeId(5)));
        assert_eq!(insert.displacement.apply(NodeId(4)), Some(NodeId(4)));

        tree.validate().unwrap();
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(tree.parent(NodeId(3)), Some(NodeId(6)));
        assert_eq!(tree.parent(NodeId(2)), Some(NodeId(6)));
        assert_eq!(tree.parent(NodeId(6)), Some(NodeId(4)));
        assert_eq!(tree.parent(NodeId(0)), Some(NodeId(5)));
        assert_eq!(tree.age(NodeId(6)), 2);
    }

    #[test]
    fn test_add_branch_above_root() {
        let mut tree = three_leaf_tree();
        let insert = tree.add_tree_branch(NodeId(4), 5, 1).unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.root(), insert.newcoal);
        assert_eq!(tree[insert.newcoal].pop_path(), 1);
    }

    #[test]
    fn test_add_branch_rejects_time_off_branch() {
        let mut tree = three_leaf_tree();
        assert!(tree.add_tree_branch(NodeId(0), 2, 0).is_err());
        assert!(tree.add_tree_branch(NodeId(9), 0, 0).is_err());
    }

    #[test]
    fn test_add_aged_branch() {
        let mut tree = three_leaf_tree();
        let insert = tree.add_aged_branch(NodeId(2), 2, 1, 3, 4).unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.age(insert.newleaf), 1);
        assert_eq!(tree[insert.newleaf].pop_path(), 3);
        assert_eq!(tree[insert.newcoal].pop_path(), 4);
        assert_eq!(tree.canonical(&[0, 1, 2, 3]), "((0@0,1@0)@1,(2@0,3@1#3)@2#4)@3");

        // an ancient leaf cannot coalesce below its own age
        let mut tree = three_leaf_tree();
        assert!(tree.add_aged_branch(NodeId(3), 1, 2, 0, 0).is_err());
        assert_eq!(tree, three_leaf_tree());
    }

    #[test]
    fn test_add_to_single_leaf() {
        let mut tree = LocalTree::single_leaf();
        let insert = tree.add_tree_branch(NodeId(0), 1, 0).unwrap();
        assert_eq!(insert.newleaf, NodeId(1));
        assert_eq!(insert.newcoal, NodeId(2));
        tree.validate().unwrap();
    }

    #[test]
    fn test_remove_branch_inverts_add() {
        let original = three_leaf_tree();
        let labels = [0, 1, 2, 3];

        let mut tree = original.clone();
        let insert = tree.add_tree_branch(NodeId(1), 1, 0).unwrap();
        let displacement = tree.remove_tree_branch(insert.newleaf).unwrap();

        tree.validate().unwrap();
        assert_eq!(displacement.apply(insert.newleaf), None);
        assert_eq!(displacement.apply(insert.newcoal), None);
        assert_eq!(tree.canonical(&labels), original.canonical(&labels));
    }

    #[test]
    fn test_remove_middle_leaf_compacts() {
        let mut tree = three_leaf_tree();
        let displacement = tree.remove_tree_branch(NodeId(1)).unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.num_nodes(), 3);
        assert_eq!(displacement.apply(NodeId(2)), Some(NodeId(1)));
        assert_eq!(displacement.apply(NodeId(4)), Some(NodeId(2)));
        assert_eq!(tree.root(), NodeId(2));
        assert_eq!(tree.age(NodeId(2)), 3);
    }

    #[test]
    fn test_canonical_ignores_labels_of_internal_nodes() {
        let a =
            LocalTree::from_parents(&[Some(3), Some(3), Some(4), Some(4), None], &[0, 0, 0, 1, 3])
                .unwrap();
        let b =
            LocalTree::from_parents(&[Some(4), Some(4), Some(3), None, Some(3)], &[0, 0, 0, 3, 1])
                .unwrap();
        assert_eq!(a.canonical(&[0, 1, 2]), b.canonical(&[0, 1, 2]));
    }
}
