//! Node correspondence between the trees of adjacent blocks.
//!
//! Leaves keep their id in every block, so an internal node is identified by the set of leaves
//! below it. Two trees match if their clades coincide and corresponding nodes have equal ages.
//! An SPR boundary is recognised by pruning one subtree on both sides and matching the rest.

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::tree::{LocalTree, Mapping, NodeId, Spr};

/// Parent of `node` in the forest obtained by cutting the branch above `pruned` and
/// suppressing the unary node left behind.
fn forest_parent(tree: &LocalTree, node: NodeId, pruned: Option<NodeId>) -> Option<NodeId> {
    let parent = tree.parent(node)?;
    match pruned {
        Some(pruned) if tree.parent(pruned) == Some(parent) => {
            if node == pruned {
                None
            } else {
                tree.parent(parent)
            }
        }
        _ => Some(parent),
    }
}

/// Children of `node` in the same forest.
fn forest_children(tree: &LocalTree, node: NodeId, pruned: Option<NodeId>) -> Option<[NodeId; 2]> {
    let children = tree.children(node)?;
    let Some(pruned) = pruned else {
        return Some(children);
    };
    let suppressed = tree.parent(pruned);
    let sibling = tree.sibling(pruned);
    Some(children.map(|child| match sibling {
        Some(sibling) if Some(child) == suppressed => sibling,
        _ => child,
    }))
}

/// Match every node of `a` to a node of `b`. With `pruned` set, both trees have the given
/// subtree cut off (`(root in a, root in b)`) and the node left behind is suppressed and stays
/// unmapped.
pub(crate) fn match_trees(
    a: &LocalTree,
    b: &LocalTree,
    pruned: Option<(NodeId, NodeId)>,
) -> Option<Mapping> {
    if a.num_nodes() != b.num_nodes() || a.num_leaves() != b.num_leaves() {
        return None;
    }
    let (pruned_a, pruned_b) = match pruned {
        Some((x, y)) => {
            a.parent(x)?;
            b.parent(y)?;
            (Some(x), Some(y))
        }
        None => (None, None),
    };
    let suppressed = pruned_a.and_then(|x| a.parent(x));

    let mut mapping = vec![None; a.num_nodes()];
    for node in a.postorder() {
        if Some(node) == suppressed {
            continue;
        }
        let image = match forest_children(a, node, pruned_a) {
            None => node,
            Some([c0, c1]) => {
                let p0 = forest_parent(b, mapping[c0.0]?, pruned_b)?;
                let p1 = forest_parent(b, mapping[c1.0]?, pruned_b)?;
                if p0 != p1 {
                    return None;
                }
                p0
            }
        };
        if b.age(image) != a.age(node) {
            return None;
        }
        mapping[node.0] = Some(image);
    }

    match (pruned_a, pruned_b) {
        (Some(x), Some(y)) if mapping[x.0] != Some(y) => None,
        _ => Some(mapping),
    }
}

/// Image in `b` of the clade below `node` in `a`, if `b` contains that clade with equal ages.
fn match_clade(a: &LocalTree, b: &LocalTree, node: NodeId) -> Option<NodeId> {
    let mut images: Vec<(NodeId, NodeId)> = Vec::new();
    for u in a.postorder_from(node) {
        let image = match a.children(u) {
            None => u,
            Some([c0, c1]) => {
                let lookup = |c: NodeId| images.iter().find(|(k, _)| *k == c).map(|(_, v)| *v);
                let p0 = b.parent(lookup(c0)?)?;
                let p1 = b.parent(lookup(c1)?)?;
                if p0 != p1 {
                    return None;
                }
                p0
            }
        };
        if !b.contains(image) || b.age(image) != a.age(u) {
            return None;
        }
        images.push((u, image));
    }
    images.last().map(|(_, image)| *image)
}

/// How the tree of one block follows from the tree of the previous block.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Transition {
    /// Both trees are identical up to node ids
    Null(Mapping),
    /// The trees differ by one SPR
    Spr(Spr, Mapping),
}

/// Guidance for [`infer_transition`]: which nodes to try as pruned node first and at which time
/// the lineage is cut.
#[derive(Clone, Debug)]
pub(crate) struct SprHint {
    pub(crate) candidates: Vec<NodeId>,
    pub(crate) prune_time: usize,
    pub(crate) pop_path: usize,
    /// only the candidates are tried, no exhaustive fallback
    pub(crate) strict: bool,
    /// nodes that must never be chosen as pruned node
    pub(crate) forbidden: Vec<NodeId>,
}

impl SprHint {
    pub(crate) fn new(candidates: Vec<NodeId>, prune_time: usize, pop_path: usize) -> Self {
        Self {
            candidates,
            prune_time,
            pop_path,
            strict: false,
            forbidden: Vec::new(),
        }
    }

    pub(crate) fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub(crate) fn forbid(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.forbidden.extend(nodes);
        self
    }
}

/// Try to explain `b` as `a` with the subtree below `pruned` moved elsewhere.
fn try_spr(
    a: &LocalTree,
    b: &LocalTree,
    pruned: NodeId,
    hint: &SprHint,
) -> Option<(Spr, Mapping)> {
    let broken = a.parent(pruned)?;
    let pruned_b = match_clade(a, b, pruned)?;
    let coal_b = b.parent(pruned_b)?;
    let mapping = match_trees(a, b, Some((pruned, pruned_b)))?;

    let target_b = b.sibling(pruned_b)?;
    let recoal_node = mapping
        .iter()
        .position(|image| *image == Some(target_b))
        .map(NodeId)?;
    let recoal_time = b.age(coal_b);

    // the lineage is cut below both the broken node and the new coalescence
    let upper = a.age(broken).min(recoal_time);
    if a.age(pruned) > upper {
        return None;
    }
    let prune_time = hint.prune_time.clamp(a.age(pruned), upper);

    let spr = Spr {
        pruned_node: pruned,
        prune_time,
        recoal_node,
        recoal_time,
        pop_path: hint.pop_path,
    };
    Some((spr, mapping))
}

/// Derive the SPR and node mapping that lead from tree `a` to tree `b`.
///
/// # Errors
/// Returns a structure error if `b` does not follow from `a` by at most one SPR among the nodes
/// permitted by the hint.
pub(crate) fn infer_transition(a: &LocalTree, b: &LocalTree, hint: &SprHint) -> Result<Transition> {
    if let Some(mapping) = match_trees(a, b, None) {
        return Ok(Transition::Null(mapping));
    }

    let permitted = |node: &NodeId| {
        a.contains(*node) && !a.is_root(*node) && !hint.forbidden.contains(node)
    };
    for &pruned in hint.candidates.iter().filter(|n| permitted(n)) {
        if let Some((spr, mapping)) = try_spr(a, b, pruned, hint) {
            trace!("hinted node {pruned} explains the boundary");
            return Ok(Transition::Spr(spr, mapping));
        }
    }

    if !hint.strict {
        debug!(
            "SPR hint {:?} does not explain the boundary, scanning all {} nodes",
            hint.candidates,
            a.num_nodes()
        );
        for pruned in (0..a.num_nodes()).map(NodeId).filter(|n| permitted(n)) {
            if hint.candidates.contains(&pruned) {
                continue;
            }
            if let Some((spr, mapping)) = try_spr(a, b, pruned, hint) {
                return Ok(Transition::Spr(spr, mapping));
            }
        }
    }

    Err(Error::structure(format!(
        "adjacent trees {} and {} are not related by a single SPR",
        a.canonical(&[]),
        b.canonical(&[])
    )))
}

/// Invert a mapping between two trees of `len` nodes.
pub(crate) fn invert_mapping(mapping: &[Option<NodeId>], len: usize) -> Mapping {
    let mut inverse = vec![None; len];
    for (i, image) in mapping.iter().enumerate() {
        if let Some(image) = image {
            if let Some(slot) = inverse.get_mut(image.0) {
                *slot = Some(NodeId(i));
            }
        }
    }
    inverse
}
