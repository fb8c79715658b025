use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tree::{LocalTree, NodeId};

/// A subtree-prune-and-regraft event at the boundary between two blocks. Node ids name nodes of
/// the tree *before* the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spr {
    /// root of the subtree that is cut off
    pub pruned_node: NodeId,
    pub prune_time: usize,
    /// node whose branch the subtree recoalesces onto
    pub recoal_node: NodeId,
    pub recoal_time: usize,
    pub pop_path: usize,
}

impl Spr {
    pub fn new(
        pruned_node: NodeId,
        prune_time: usize,
        recoal_node: NodeId,
        recoal_time: usize,
    ) -> Self {
        Self {
            pruned_node,
            prune_time,
            recoal_node,
            recoal_time,
            pop_path: 0,
        }
    }

    pub fn with_pop_path(self, pop_path: usize) -> Self {
        Self { pop_path, ..self }
    }

    /// Rewrite a recoalescence onto the broken node as a recoalescence onto the pruned node's
    /// sibling. Both describe the same event since the broken node disappears.
    pub fn normalized(self, tree: &LocalTree) -> Self {
        match (tree.parent(self.pruned_node), tree.sibling(self.pruned_node)) {
            (Some(broken), Some(sibling)) if broken == self.recoal_node => Self {
                recoal_node: sibling,
                ..self
            },
            _ => self,
        }
    }

    /// Whether the event regrafts the pruned subtree where it was cut off, leaving the tree
    /// unchanged apart from population paths.
    pub fn is_null(&self, tree: &LocalTree) -> bool {
        if !tree.contains(self.pruned_node) {
            return false;
        }
        let spr = self.normalized(tree);
        match (tree.parent(spr.pruned_node), tree.sibling(spr.pruned_node)) {
            (Some(broken), Some(sibling)) => {
                spr.recoal_node == sibling && spr.recoal_time == tree.age(broken)
            }
            _ => false,
        }
    }

    /// The node removed from the tree by this event.
    pub fn broken_node(&self, tree: &LocalTree) -> Option<NodeId> {
        tree.parent(self.pruned_node)
    }

    /// Check that the event can be applied to `tree`.
    pub fn check(&self, tree: &LocalTree) -> Result<()> {
        let pruned = self.pruned_node;
        if !tree.contains(pruned) || !tree.contains(self.recoal_node) {
            return Err(Error::precondition(format!(
                "SPR references nodes {pruned} and {} outside the tree",
                self.recoal_node
            )));
        }
        let broken = tree
            .parent(pruned)
            .ok_or_else(|| Error::precondition(format!("cannot prune the root {pruned}")))?;
        tree.check_branch_time(pruned, self.prune_time)?;

        let recoal = self.normalized(tree).recoal_node;
        if tree.is_descendant(recoal, pruned) {
            return Err(Error::precondition(format!(
                "cannot recoalesce node {pruned} into its own subtree at {recoal}"
            )));
        }
        if self.recoal_time < self.prune_time || self.recoal_time < tree.age(recoal) {
            return Err(Error::precondition(format!(
                "recoalescence time {} is below the prune time {} or the age of node {recoal}",
                self.recoal_time, self.prune_time
            )));
        }

        // the parent of the recoal branch once the broken node is gone
        let upper = match tree.parent(recoal) {
            Some(parent) if parent == broken => tree.parent(broken),
            parent => parent,
        };
        if let Some(upper) = upper {
            if self.recoal_time > tree.age(upper) {
                return Err(Error::precondition(format!(
                    "recoalescence time {} is above the branch of node {recoal}",
                    self.recoal_time
                )));
            }
        }
        Ok(())
    }
}

/// Apply an SPR to a tree in place. The broken node (parent of the pruned node) is removed, its
/// other child takes its place, and its id is reused for the new coalescence node above the
/// recoalescence branch. Every other node keeps its id.
///
/// # Errors
/// Returns a precondition error if the event does not fit the tree.
pub fn apply_spr(tree: &mut LocalTree, spr: &Spr) -> Result<()> {
    spr.check(tree)?;
    let spr = spr.normalized(tree);

    let pruned = spr.pruned_node;
    let broken = tree
        .parent(pruned)
        .ok_or_else(|| Error::precondition("cannot prune the root"))?;
    let sibling = tree
        .sibling(pruned)
        .ok_or_else(|| Error::structure(format!("node {pruned} has no sibling")))?;

    // splice out the broken node
    let grandparent = tree.parent(broken);
    match grandparent {
        Some(grandparent) => tree.replace_child(grandparent, broken, sibling),
        None => tree.set_root(sibling),
    }
    tree.node_mut(sibling).parent = grandparent;

    // reuse it above the recoalescence branch
    let recoal = spr.recoal_node;
    let above = tree.parent(recoal);
    match above {
        Some(above) => tree.replace_child(above, recoal, broken),
        None => tree.set_root(broken),
    }
    let node = tree.node_mut(broken);
    node.parent = above;
    node.children = Some([pruned, recoal]);
    node.age = spr.recoal_time;
    node.pop_path = spr.pop_path;
    tree.node_mut(recoal).parent = Some(broken);

    Ok(())
}
