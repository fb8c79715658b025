use log::debug;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::tree::matching::match_trees;
use crate::tree::{apply_spr, LocalTree, Mapping, NodeId, Spr};

/// One block of an ARG: the local tree, the number of bases it covers and, for every block but
/// the first, the SPR and node mapping connecting it to the previous block.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalTreeSpr {
    pub(crate) tree: LocalTree,
    pub(crate) blocklen: usize,
    pub(crate) spr: Option<Spr>,
    pub(crate) mapping: Option<Mapping>,
}

impl LocalTreeSpr {
    pub(crate) fn new(
        tree: LocalTree,
        blocklen: usize,
        spr: Option<Spr>,
        mapping: Option<Mapping>,
    ) -> Self {
        Self {
            tree,
            blocklen,
            spr,
            mapping,
        }
    }

    pub fn tree(&self) -> &LocalTree {
        &self.tree
    }

    pub fn blocklen(&self) -> usize {
        self.blocklen
    }

    pub fn spr(&self) -> Option<&Spr> {
        self.spr.as_ref()
    }

    pub fn mapping(&self) -> Option<&[Option<NodeId>]> {
        self.mapping.as_deref()
    }
}

/// An ARG over the half-open genomic interval `[start_coord, end_coord)`, stored as a chain of
/// local trees.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalTrees {
    start_coord: usize,
    end_coord: usize,
    nnodes: usize,
    /// sequence id of every leaf id
    seqids: Vec<usize>,
    trees: Vec<LocalTreeSpr>,
}

impl LocalTrees {
    /// Create an ARG with a single block.
    pub fn new(
        start_coord: usize,
        tree: LocalTree,
        blocklen: usize,
        seqids: Vec<usize>,
    ) -> Result<Self> {
        if blocklen == 0 {
            return Err(Error::precondition("blocks must not be empty"));
        }
        if seqids.len() != tree.num_leaves() {
            return Err(Error::precondition(format!(
                "{} sequence ids given for a tree with {} leaves",
                seqids.len(),
                tree.num_leaves()
            )));
        }
        Ok(Self {
            start_coord,
            end_coord: start_coord + blocklen,
            nnodes: tree.num_nodes(),
            seqids,
            trees: vec![LocalTreeSpr::new(tree, blocklen, None, None)],
        })
    }

    /// Create an ARG from a first tree and a list of `(spr, blocklen)` events, each applied to
    /// the tree of the previous block.
    pub fn from_sprs(
        start_coord: usize,
        tree: LocalTree,
        blocklen: usize,
        events: &[(Spr, usize)],
        seqids: Vec<usize>,
    ) -> Result<Self> {
        let mut trees = Self::new(start_coord, tree, blocklen, seqids)?;
        for (spr, blocklen) in events {
            trees.push_spr(*spr, *blocklen)?;
        }
        Ok(trees)
    }

    /// Append a block whose tree follows from the last tree by `spr`. An SPR that leaves the
    /// tree unchanged is rejected, blocks are always separated by a real recombination.
    pub fn push_spr(&mut self, spr: Spr, blocklen: usize) -> Result<()> {
        if blocklen == 0 {
            return Err(Error::precondition("blocks must not be empty"));
        }
        let prev = self.last_tree()?;
        spr.check(prev)?;
        let spr = spr.normalized(prev);
        if spr.is_null(prev) {
            return Err(Error::precondition(format!(
                "SPR pruning node {} leaves the tree unchanged",
                spr.pruned_node
            )));
        }
        let broken = spr
            .broken_node(prev)
            .ok_or_else(|| Error::precondition("cannot prune the root"))?;

        let mut tree = prev.clone();
        apply_spr(&mut tree, &spr)?;
        let mapping = (0..self.nnodes)
            .map(|i| (i != broken.0).then_some(NodeId(i)))
            .collect();

        self.trees
            .push(LocalTreeSpr::new(tree, blocklen, Some(spr), Some(mapping)));
        self.end_coord += blocklen;
        Ok(())
    }

    /// Assemble an ARG from blocks built by the thread engine.
    pub(crate) fn from_blocks(
        start_coord: usize,
        seqids: Vec<usize>,
        trees: Vec<LocalTreeSpr>,
    ) -> Result<Self> {
        let first = trees
            .first()
            .ok_or_else(|| Error::structure("an ARG needs at least one block"))?;
        Ok(Self {
            start_coord,
            end_coord: start_coord + trees.iter().map(|b| b.blocklen).sum::<usize>(),
            nnodes: first.tree.num_nodes(),
            seqids,
            trees,
        })
    }

    fn last_tree(&self) -> Result<&LocalTree> {
        self.trees
            .last()
            .map(|b| &b.tree)
            .ok_or_else(|| Error::structure("an ARG needs at least one block"))
    }

    pub fn start_coord(&self) -> usize {
        self.start_coord
    }

    pub fn end_coord(&self) -> usize {
        self.end_coord
    }

    pub fn length(&self) -> usize {
        self.end_coord - self.start_coord
    }

    pub fn num_nodes(&self) -> usize {
        self.nnodes
    }

    pub fn num_leaves(&self) -> usize {
        self.seqids.len()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn seqids(&self) -> &[usize] {
        &self.seqids
    }

    /// Leaf id carrying a sequence id
    pub fn leaf_of(&self, seqid: usize) -> Option<NodeId> {
        self.seqids.iter().position(|&s| s == seqid).map(NodeId)
    }

    pub fn blocks(&self) -> &[LocalTreeSpr] {
        &self.trees
    }

    pub fn block(&self, index: usize) -> Option<&LocalTreeSpr> {
        self.trees.get(index)
    }

    pub fn tree(&self, index: usize) -> Option<&LocalTree> {
        self.trees.get(index).map(|b| &b.tree)
    }

    /// Genomic start coordinate of every block.
    pub fn block_starts(&self) -> Vec<usize> {
        self.trees
            .iter()
            .scan(self.start_coord, |start, block| {
                let current = *start;
                *start += block.blocklen;
                Some(current)
            })
            .collect()
    }

    /// Index of the block covering `pos`.
    pub fn block_index(&self, pos: usize) -> Option<usize> {
        if pos < self.start_coord || pos >= self.end_coord {
            return None;
        }
        let mut end = self.start_coord;
        self.trees.iter().position(|block| {
            end += block.blocklen;
            pos < end
        })
    }

    pub fn tree_at(&self, pos: usize) -> Option<&LocalTree> {
        self.block_index(pos).and_then(|i| self.tree(i))
    }

    /// Replace the content of the ARG after an edit that changed the leaf set.
    pub(crate) fn replace(&mut self, other: LocalTrees) {
        *self = other;
    }

    /// Check every tree and every boundary: each SPR must be normalized and must not be null,
    /// it must transform the previous tree into the next one, and the mapping must agree with
    /// the transformation.
    /// Blocks are checked in parallel.
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(Error::structure("an ARG needs at least one block"));
        }
        if self.trees.iter().map(|b| b.blocklen).sum::<usize>() != self.length() {
            return Err(Error::structure(format!(
                "block lengths do not cover [{}, {})",
                self.start_coord, self.end_coord
            )));
        }
        if self.trees[0].spr.is_some() || self.trees[0].mapping.is_some() {
            return Err(Error::structure("the first block must not have an SPR"));
        }

        self.trees.par_iter().enumerate().try_for_each(|(i, block)| {
            block.tree.validate()?;
            if block.blocklen == 0 {
                return Err(Error::structure(format!("block {i} is empty")));
            }
            if block.tree.num_nodes() != self.nnodes
                || block.tree.num_leaves() != self.seqids.len()
            {
                return Err(Error::structure(format!(
                    "tree of block {i} has {} nodes, expected {}",
                    block.tree.num_nodes(),
                    self.nnodes
                )));
            }
            Ok(())
        })?;

        (1..self.trees.len())
            .into_par_iter()
            .try_for_each(|i| self.validate_boundary(i))
    }

    fn validate_boundary(&self, index: usize) -> Result<()> {
        let prev = &self.trees[index - 1].tree;
        let block = &self.trees[index];
        let (Some(spr), Some(mapping)) = (block.spr.as_ref(), block.mapping.as_ref()) else {
            return Err(Error::structure(format!("block {index} has no SPR")));
        };
        spr.check(prev).map_err(|e| {
            Error::structure(format!("SPR of block {index} does not fit: {e}"))
        })?;
        if spr.normalized(prev) != *spr {
            return Err(Error::structure(format!("SPR of block {index} is not normalized")));
        }
        if spr.is_null(prev) {
            return Err(Error::structure(format!(
                "SPR of block {index} leaves the tree unchanged"
            )));
        }

        let mut applied = prev.clone();
        apply_spr(&mut applied, spr).map_err(|e| {
            Error::structure(format!("SPR of block {index} does not fit: {e}"))
        })?;
        let broken = spr
            .broken_node(prev)
            .ok_or_else(|| Error::structure(format!("SPR of block {index} prunes the root")))?;
        let expected = match_trees(&applied, &block.tree, None).ok_or_else(|| {
            Error::structure(format!("tree of block {index} does not follow from its SPR"))
        })?;

        if mapping.len() != self.nnodes {
            return Err(Error::structure(format!("mapping of block {index} has wrong length")));
        }
        for (node, image) in mapping.iter().enumerate() {
            let wanted = if node == broken.0 { None } else { expected[node] };
            if *image != wanted {
                return Err(Error::structure(format!(
                    "mapping of block {index} sends node {node} to {image:?}, expected {wanted:?}"
                )));
            }
        }
        Ok(())
    }

    /// Relabel-invariant description of the ARG: one entry per block holding the block
    /// length, the tree and the SPR, with leaves named by sequence id. Population paths other
    /// than 0 are appended as `#path`.
    pub fn canonical(&self) -> Vec<String> {
        let mut prev: Option<&LocalTree> = None;
        self.trees
            .iter()
            .map(|block| {
                let spr = match (prev, block.spr.as_ref()) {
                    (Some(prev), Some(spr)) => format!(
                        " {}@{}->{}@{}{}",
                        prev.canonical_subtree(spr.pruned_node, &self.seqids),
                        spr.prune_time,
                        prev.canonical_subtree(spr.recoal_node, &self.seqids),
                        spr.recoal_time,
                        match spr.pop_path {
                            0 => String::new(),
                            pop_path => format!("#{pop_path}"),
                        }
                    ),
                    _ => String::new(),
                };
                prev = Some(&block.tree);
                format!("{}:{}{}", block.blocklen, block.tree.canonical(&self.seqids), spr)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::three_leaf_tree;

    fn two_block_arg() -> LocalTrees {
        LocalTrees::from_sprs(
            0,
            three_leaf_tree(),
            10,
            &[(Spr::new(NodeId(1), 1, NodeId(2), 2), 5)],
            vec![0, 1, 2],
        )
        .unwrap()
    }

    #[test]
    fn test_from_sprs() {
        let trees = two_block_arg();
        trees.validate().unwrap();
        assert_eq!(trees.num_trees(), 2);
        assert_eq!(trees.end_coord(), 15);
        assert_eq!(trees.block_starts(), vec![0, 10]);
        assert_eq!(trees.block_index(9), Some(0));
        assert_eq!(trees.block_index(10), Some(1));
        assert_eq!(trees.block_index(15), None);
        assert_eq!(trees.leaf_of(2), Some(NodeId(2)));

        let mapping = trees.block(1).unwrap().mapping().unwrap();
        assert_eq!(mapping[3], None);
        assert_eq!(mapping[4], Some(NodeId(4)));
    }

    #[test]
    fn test_validate_detects_bad_mapping() {
        let mut trees = two_block_arg();
        if let Some(mapping) = trees.trees[1].mapping.as_mut() {
            mapping.swap(0, 1);
        }
        assert!(matches!(trees.validate(), Err(Error::Structure { .. })));
    }

    #[test]
    fn test_validate_detects_wrong_spr() {
        let mut trees = two_block_arg();
        if let Some(spr) = trees.trees[1].spr.as_mut() {
            spr.recoal_time = 3;
        }
        assert!(trees.validate().is_err());
    }

    #[test]
    fn test_reject_null_sprs() {
        // pruning leaf 2 and regrafting it where it was leaves the tree unchanged
        let null = Spr::new(NodeId(2), 0, NodeId(3), 3);
        assert!(null.is_null(&three_leaf_tree()));
        // recoalescing onto the broken node is the same event
        assert!(Spr::new(NodeId(2), 0, NodeId(4), 3).is_null(&three_leaf_tree()));

        let single = LocalTrees::new(0, three_leaf_tree(), 4, vec![0, 1, 2]).unwrap();
        let mut trees = single.clone();
        assert!(matches!(trees.push_spr(null, 6), Err(Error::Precondition { .. })));
        assert_eq!(trees, single);
        assert!(LocalTrees::from_sprs(0, three_leaf_tree(), 4, &[(null, 6)], vec![0, 1, 2])
            .is_err());

        // a block repeating its predecessor is caught by validation
        let mut trees = two_block_arg();
        let mut mapping: Mapping = (0..5).map(|i| Some(NodeId(i))).collect();
        mapping[4] = None;
        trees.trees[1] = LocalTreeSpr::new(three_leaf_tree(), 5, Some(null), Some(mapping));
        assert!(matches!(trees.validate(), Err(Error::Structure { .. })));
    }

    #[test]
    fn test_out_of_range_spr_is_an_error() {
        let mut trees = two_block_arg();
        let spr = Spr::new(NodeId(7), 0, NodeId(2), 2);
        assert!(matches!(trees.push_spr(spr, 3), Err(Error::Precondition { .. })));

        if let Some(spr) = trees.trees[1].spr.as_mut() {
            spr.recoal_node = NodeId(12);
        }
        assert!(matches!(trees.validate(), Err(Error::Structure { .. })));
    }

    #[test]
    fn test_canonical_shows_pop_paths() {
        let spr = Spr::new(NodeId(1), 1, NodeId(2), 2).with_pop_path(2);
        let trees =
            LocalTrees::from_sprs(0, three_leaf_tree(), 10, &[(spr, 5)], vec![0, 1, 2]).unwrap();
        let canonical = trees.canonical();
        assert_eq!(canonical[0], "10:((0@0,1@0)@1,2@0)@3");
        assert_eq!(canonical[1], "5:((1@0,2@0)@2#2,0@0)@3 1@0@1->2@0@2#2");
    }

    #[test]
    fn test_canonical_names_leaves_by_seqid() {
        let trees = LocalTrees::new(0, three_leaf_tree(), 3, vec![7, 8, 9]).unwrap();
        assert_eq!(trees.canonical(), vec!["3:((7@0,8@0)@1,9@0)@3".to_string()]);
    }
}
