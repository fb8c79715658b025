//! Removal paths: one node per block such that cutting the branch above each node removes a
//! single lineage from the whole ARG. Consecutive nodes must be linked through the boundary
//! mapping, which gives each node at most two successors and at most two predecessors.

use log::debug;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::tree::matching::invert_mapping;
use crate::tree::{LocalTree, LocalTrees, NodeId, Spr};

mod sample;

pub use sample::{
    get_arg_removal_path_by_ind_and_time, sample_arg_removal_leaf_path, sample_arg_removal_path,
    sample_arg_removal_path_recomb, sample_arg_removal_path_switch,
    sample_arg_removal_path_uniform, sample_arg_removal_path_uniform_from, RemovalPathByTime,
};

/// Nodes of `tree2` that can continue a removal path through `node` of `tree1`.
///
/// A node that survives the boundary continues as its image. The recoalescence target may also
/// continue as the new coalescence node above it. The broken node continues as the image of its
/// surviving child.
///
/// # Parameters
/// - `spr` the SPR at the boundary, named in `tree1`
/// - `mapping` the node mapping from `tree1` to `tree2`
/// - `recoal` the new coalescence node in `tree2`, computed if not given
pub fn get_next_removal_nodes(
    tree1: &LocalTree,
    tree2: &LocalTree,
    spr: &Spr,
    mapping: &[Option<NodeId>],
    node: NodeId,
    recoal: Option<NodeId>,
) -> [Option<NodeId>; 2] {
    let image = |n: NodeId| mapping.get(n.index()).copied().flatten();
    let recoal = recoal.or_else(|| image(spr.pruned_node).and_then(|n| tree2.parent(n)));
    let mut next = [None, None];

    if tree1.parent(spr.pruned_node) == Some(node) {
        next[0] = tree1.sibling(spr.pruned_node).and_then(image);
    } else {
        next[0] = image(node);
    }
    if node == spr.recoal_node {
        next[1] = recoal;
    }
    next
}

/// Nodes of `tree1` from which a removal path can reach `node` of `tree2`. This is the inverse
/// of [`get_next_removal_nodes`].
///
/// # Parameters
/// - `inv_mapping` the inverse of `mapping`, computed if not given
pub fn get_prev_removal_nodes(
    tree1: &LocalTree,
    tree2: &LocalTree,
    spr: &Spr,
    mapping: &[Option<NodeId>],
    node: NodeId,
    inv_mapping: Option<&[Option<NodeId>]>,
) -> [Option<NodeId>; 2] {
    let image = |n: NodeId| mapping.get(n.index()).copied().flatten();
    let recoal = image(spr.pruned_node).and_then(|n| tree2.parent(n));
    if recoal == Some(node) {
        return [Some(spr.recoal_node), None];
    }

    let computed;
    let inv_mapping = match inv_mapping {
        Some(inv) => inv,
        None => {
            computed = invert_mapping(mapping, tree2.num_nodes());
            &computed
        }
    };

    let mut prev = [inv_mapping.get(node.index()).copied().flatten(), None];
    let broken = tree1.parent(spr.pruned_node);
    let survivor = tree1.sibling(spr.pruned_node).and_then(image);
    if survivor == Some(node) && broken != Some(spr.recoal_node) {
        prev[1] = broken;
    }
    prev
}

/// Forward counts and back pointers of the removal path DP, stored as flat `(block, node)`
/// tables. The buffers are kept between queries.
#[derive(Clone, Debug, Default)]
pub struct RemovalPaths {
    ntrees: usize,
    nnodes: usize,
    counts: Vec<f64>,
    backptrs: Vec<[Option<NodeId>; 2]>,
}

impl RemovalPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize the tables for an ARG and clear them. Existing allocations are reused.
    pub fn alloc(&mut self, ntrees: usize, nnodes: usize) {
        self.ntrees = ntrees;
        self.nnodes = nnodes;
        self.counts.clear();
        self.counts.resize(ntrees * nnodes, 0.0);
        self.backptrs.clear();
        self.backptrs.resize(ntrees * nnodes, [None, None]);
    }

    #[inline]
    fn index(&self, block: usize, node: NodeId) -> usize {
        block * self.nnodes + node.index()
    }

    pub fn num_trees(&self) -> usize {
        self.ntrees
    }

    pub fn num_nodes(&self) -> usize {
        self.nnodes
    }

    /// Weight of all removal path prefixes ending in `node` of `block`.
    pub fn count(&self, block: usize, node: NodeId) -> f64 {
        self.counts[self.index(block, node)]
    }

    /// Predecessors of `node` in `block - 1` with non-zero count.
    pub fn backptrs(&self, block: usize, node: NodeId) -> [Option<NodeId>; 2] {
        self.backptrs[self.index(block, node)]
    }

    pub(crate) fn row(&self, block: usize) -> &[f64] {
        &self.counts[block * self.nnodes..(block + 1) * self.nnodes]
    }

    /// Sum of the last row, the weight of all complete removal paths.
    pub fn total(&self) -> f64 {
        match self.ntrees {
            0 => 0.0,
            n => self.row(n - 1).iter().sum(),
        }
    }

    fn add(&mut self, block: usize, node: NodeId, from: NodeId, weight: f64) -> Result<()> {
        let index = self.index(block, node);
        self.counts[index] += weight;
        match self.backptrs[index].iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(from),
            None => {
                return Err(Error::structure(format!(
                    "node {node} of block {block} has more than two predecessors"
                )))
            }
        }
        Ok(())
    }
}

/// Run the forward DP. Every non-root node of the first block starts with weight one, or only
/// `start` if given. Roots never lie on a removal path.
///
/// # Errors
/// Returns [`Error::NoRemovalPath`] if `start` is the root of the first tree. A `start` that is
/// not a node of the ARG leaves every count at zero.
pub fn count_arg_removal_paths(
    trees: &LocalTrees,
    paths: &mut RemovalPaths,
    start: Option<NodeId>,
) -> Result<()> {
    let nnodes = trees.num_nodes();
    paths.alloc(trees.num_trees(), nnodes);
    let Some(first) = trees.tree(0) else {
        return Ok(());
    };
    if let Some(start) = start.filter(|s| first.contains(*s) && first.is_root(*s)) {
        return Err(Error::no_removal_path(format!(
            "node {start} is the root of the first tree"
        )));
    }

    for i in 0..nnodes {
        let node = NodeId::from_usize(i);
        let selected = start.map_or(true, |start| start == node);
        if selected && !first.is_root(node) {
            let index = paths.index(0, node);
            paths.counts[index] = 1.0;
        }
    }

    for (block, window) in trees.blocks().windows(2).enumerate() {
        let (prev, current) = (&window[0], &window[1]);
        let (Some(spr), Some(mapping)) = (current.spr(), current.mapping()) else {
            return Err(Error::structure(format!("block {} has no SPR", block + 1)));
        };
        for i in 0..nnodes {
            let node = NodeId::from_usize(i);
            let weight = paths.count(block, node);
            if weight <= 0.0 {
                continue;
            }
            let next =
                get_next_removal_nodes(prev.tree(), current.tree(), spr, mapping, node, None);
            for target in next.into_iter().flatten() {
                if !current.tree().is_root(target) {
                    paths.add(block + 1, target, node, weight)?;
                }
            }
        }
    }

    if paths.total() <= 0.0 {
        debug!("no removal path from {start:?} spans all {} blocks", trees.num_trees());
    }
    Ok(())
}

/// Total weight of all removal paths, optionally starting at `start` in the first block.
pub fn count_total_arg_removal_paths(trees: &LocalTrees, start: Option<NodeId>) -> Result<f64> {
    let mut paths = RemovalPaths::new();
    count_arg_removal_paths(trees, &mut paths, start)?;
    Ok(paths.total())
}

/// Number of removal paths starting at each leaf. Leaves are counted in parallel.
pub fn count_total_removal_paths_per_leaf(trees: &LocalTrees) -> Result<Vec<f64>> {
    (0..trees.num_leaves())
        .into_par_iter()
        .map(|leaf| count_total_arg_removal_paths(trees, Some(NodeId::from_usize(leaf))))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Three leaves, three blocks.
    pub(crate) fn three_block_arg() -> LocalTrees {
        let tree =
            LocalTree::from_parents(&[Some(3), Some(3), Some(4), Some(4), None], &[0, 0, 0, 1, 3])
                .unwrap();
        LocalTrees::from_sprs(
            0,
            tree,
            10,
            &[
                (Spr::new(NodeId::from_usize(2), 0, NodeId::from_usize(0), 1), 10),
                (Spr::new(NodeId::from_usize(1), 0, NodeId::from_usize(4), 4), 10),
            ],
            vec![0, 1, 2],
        )
        .unwrap()
    }

    fn n(i: usize) -> NodeId {
        NodeId::from_usize(i)
    }

    #[test]
    fn test_next_nodes() {
        let trees = three_block_arg();
        trees.validate().unwrap();
        let (t0, block) = (trees.tree(0).unwrap(), trees.block(1).unwrap());
        let (spr, mapping) = (block.spr().unwrap(), block.mapping().unwrap());

        // recoal target gets a second successor
        let next = get_next_removal_nodes(t0, block.tree(), spr, mapping, n(0), None);
        assert_eq!(next, [Some(n(0)), Some(n(4))]);
        // broken node continues as its surviving child
        let next = get_next_removal_nodes(t0, block.tree(), spr, mapping, n(4), None);
        assert_eq!(next, [Some(n(3)), None]);
        let next = get_next_removal_nodes(t0, block.tree(), spr, mapping, n(2), None);
        assert_eq!(next, [Some(n(2)), None]);
    }

    #[test]
    fn test_prev_inverts_next() {
        let trees = three_block_arg();
        for i in 1..trees.num_trees() {
            let (t1, block) = (trees.tree(i - 1).unwrap(), trees.block(i).unwrap());
            let (spr, mapping) = (block.spr().unwrap(), block.mapping().unwrap());
            for a in 0..trees.num_nodes() {
                for b in 0..trees.num_nodes() {
                    let forward =
                        get_next_removal_nodes(t1, block.tree(), spr, mapping, n(a), None)
                            .contains(&Some(n(b)));
                    let backward =
                        get_prev_removal_nodes(t1, block.tree(), spr, mapping, n(b), None)
                            .contains(&Some(n(a)));
                    assert_eq!(forward, backward, "boundary {i}, {a} -> {b}");
                }
            }
        }
    }

    #[test]
    fn test_single_block_counts() {
        let tree = three_block_arg().tree(0).unwrap().clone();
        let trees = LocalTrees::new(0, tree, 5, vec![0, 1, 2]).unwrap();
        assert_eq!(count_total_arg_removal_paths(&trees, None).unwrap(), 4.0);
        for node in 0..4 {
            assert_eq!(count_total_arg_removal_paths(&trees, Some(n(node))).unwrap(), 1.0);
        }
        // the root has no branch to cut
        let err = count_total_arg_removal_paths(&trees, Some(n(4))).unwrap_err();
        assert!(matches!(err, Error::NoRemovalPath { .. }));
        // not a node
        assert_eq!(count_total_arg_removal_paths(&trees, Some(n(7))).unwrap(), 0.0);
    }

    #[test]
    fn test_counts_and_backpointers() {
        let trees = three_block_arg();
        let mut paths = RemovalPaths::new();
        count_arg_removal_paths(&trees, &mut paths, None).unwrap();

        // every node has at most two predecessors with weight
        for block in 1..paths.num_trees() {
            for i in 0..paths.num_nodes() {
                let preds = paths.backptrs(block, n(i));
                let sum: f64 = preds.iter().flatten().map(|p| paths.count(block - 1, *p)).sum();
                assert_eq!(sum, paths.count(block, n(i)));
            }
        }
        assert!(paths.total() > 0.0);

        // buffers are reused for a second query
        count_arg_removal_paths(&trees, &mut paths, Some(n(2))).unwrap();
        assert_eq!(paths.count(0, n(0)), 0.0);
        assert_eq!(paths.count(0, n(2)), 1.0);
    }

    #[test]
    fn test_leaf_paths_counted_in_parallel() {
        let trees = three_block_arg();
        let per_leaf = count_total_removal_paths_per_leaf(&trees).unwrap();
        assert_eq!(per_leaf.len(), 3);
        for (leaf, total) in per_leaf.iter().enumerate() {
            assert_eq!(*total, count_total_arg_removal_paths(&trees, Some(n(leaf))).unwrap());
            assert!(*total >= 1.0);
        }
    }
}
