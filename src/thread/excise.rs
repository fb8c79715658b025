use log::debug;

use crate::error::{Error, Result};
use crate::removal::get_next_removal_nodes;
use crate::thread::{State, Thread, ThreadKind, ThreadNode, ThreadSegment, ThreadSpr};
use crate::tree::matching::{infer_transition, invert_mapping, SprHint, Transition};
use crate::tree::{
    apply_spr, Displacement, LocalTree, LocalTreeSpr, LocalTrees, Mapping, NodeId, Spr,
};

/// One block with the thread cut out.
struct Excised {
    tree: LocalTree,
    branch: NodeId,
    coal: NodeId,
    /// id of every node of the threaded tree in the excised tree
    displacement: Option<Displacement>,
    /// node the thread joined, named in the excised tree
    sibling: NodeId,
    time: usize,
    /// population path of the coalescence node
    pop_path: usize,
}

impl Excised {
    fn translate(&self, node: NodeId) -> NodeId {
        self.displacement
            .as_ref()
            .and_then(|d| d.apply(node))
            .unwrap_or(node)
    }

    /// Name a node of the threaded tree relative to the thread.
    fn describe(&self, node: NodeId) -> ThreadNode {
        if node == self.branch {
            ThreadNode::Branch
        } else if node == self.coal {
            ThreadNode::Coal
        } else {
            ThreadNode::Tree(self.translate(node))
        }
    }
}

fn rename(rename: &Option<Mapping>, node: NodeId) -> NodeId {
    rename
        .as_ref()
        .and_then(|r| r.get(node.0).copied().flatten())
        .unwrap_or(node)
}

fn rename_thread_node(map: &Option<Mapping>, node: ThreadNode) -> ThreadNode {
    match node {
        ThreadNode::Tree(node) => ThreadNode::Tree(rename(map, node)),
        other => other,
    }
}

/// Rebuild the chain of excised trees. Boundaries whose trees became identical are merged and
/// reported as recombinations of the thread.
fn rebuild(
    trees: &LocalTrees,
    kind: ThreadKind,
    pop_path: usize,
    excised: Vec<Excised>,
) -> Result<(Vec<LocalTreeSpr>, Thread)> {
    let mut blocks: Vec<LocalTreeSpr> = Vec::with_capacity(excised.len());
    let mut thread = Thread {
        kind,
        pop_path,
        segments: Vec::with_capacity(excised.len()),
        recomb_pos: Vec::new(),
        recombs: Vec::new(),
    };
    // ids of the previous excised tree in the last kept tree
    let mut names: Option<Mapping> = None;
    let mut prev: Option<&Excised> = None;
    let starts = trees.block_starts();

    for (index, (block, current)) in trees.blocks().iter().zip(&excised).enumerate() {
        let start = starts[index];
        let mut current_names = None;

        match (prev, blocks.last_mut()) {
            (Some(last), Some(kept)) => {
                let spr = block
                    .spr
                    .as_ref()
                    .ok_or_else(|| Error::structure(format!("block {index} has no SPR")))?;
                let recomb = ThreadSpr {
                    pruned: last.describe(spr.pruned_node),
                    prune_time: spr.prune_time,
                    recoal: last.describe(spr.recoal_node),
                    recoal_time: spr.recoal_time,
                    pop_path: spr.pop_path,
                };
                let candidates = match recomb.pruned {
                    ThreadNode::Branch => vec![],
                    ThreadNode::Coal => vec![rename(&names, last.sibling)],
                    ThreadNode::Tree(node) => vec![rename(&names, node)],
                };
                let mut hint = SprHint::new(candidates, spr.prune_time, spr.pop_path);
                if kind == ThreadKind::Subtree {
                    // the hanging subtree and the remaining tree stay below the top node
                    hint = hint.forbid(kept.tree.children(kept.tree.root()).into_iter().flatten());
                }

                match infer_transition(&kept.tree, &current.tree, &hint)? {
                    Transition::Null(mapping) => {
                        kept.blocklen += block.blocklen;
                        thread.recomb_pos.push(start);
                        thread.recombs.push(ThreadSpr {
                            pruned: rename_thread_node(&names, recomb.pruned),
                            recoal: rename_thread_node(&names, recomb.recoal),
                            ..recomb
                        });
                        current_names = Some(invert_mapping(&mapping, mapping.len()));
                    }
                    Transition::Spr(spr, mapping) => blocks.push(LocalTreeSpr::new(
                        current.tree.clone(),
                        block.blocklen,
                        Some(spr),
                        Some(mapping),
                    )),
                }
            }
            _ => blocks.push(LocalTreeSpr::new(current.tree.clone(), block.blocklen, None, None)),
        }

        thread.segments.push(ThreadSegment {
            start,
            end: start + block.blocklen,
            state: State::new(rename(&current_names, current.sibling), current.time)
                .with_pop_path(current.pop_path),
        });
        names = current_names;
        prev = Some(current);
    }

    Ok((blocks, thread))
}

/// Remove the leaf of sequence `seqid` from every block.
pub(crate) fn remove_arg_thread(
    trees: &mut LocalTrees,
    seqid: usize,
    validate: bool,
) -> Result<Thread> {
    let leaf = trees
        .leaf_of(seqid)
        .ok_or_else(|| Error::precondition(format!("sequence {seqid} is not in the ARG")))?;
    if trees.num_leaves() < 2 {
        return Err(Error::precondition("cannot remove the last leaf of an ARG"));
    }

    let mut excised = Vec::with_capacity(trees.num_trees());
    for block in trees.blocks() {
        let threaded = &block.tree;
        let coal = threaded
            .parent(leaf)
            .ok_or_else(|| Error::structure(format!("leaf {leaf} has no parent")))?;
        let sibling = threaded
            .sibling(leaf)
            .ok_or_else(|| Error::structure(format!("leaf {leaf} has no sibling")))?;

        let mut tree = threaded.clone();
        let displacement = tree.remove_tree_branch(leaf)?;
        let sibling = displacement
            .apply(sibling)
            .ok_or_else(|| Error::structure("sibling of the removed leaf was deleted"))?;
        excised.push(Excised {
            tree,
            branch: leaf,
            coal,
            displacement: Some(displacement),
            sibling,
            time: threaded.age(coal),
            pop_path: threaded[coal].pop_path(),
        });
    }

    let (age, pop_path) = trees
        .tree(0)
        .map_or((0, 0), |tree| (tree.age(leaf), tree[leaf].pop_path()));
    let kind = ThreadKind::Leaf { seqid, age };
    let (blocks, thread) = rebuild(trees, kind, pop_path, excised)?;

    let mut seqids = trees.seqids().to_vec();
    seqids.remove(leaf.index());
    let excised = LocalTrees::from_blocks(trees.start_coord(), seqids, blocks)?;
    if validate {
        excised.validate()?;
    }

    debug!(
        "removed sequence {seqid}: {} blocks left, {} thread recombinations",
        excised.num_trees(),
        thread.recombs.len()
    );
    trees.replace(excised);
    Ok(thread)
}

/// Check that `path` is a removal path: every node continues the previous one across the block
/// boundary.
fn check_removal_path(trees: &LocalTrees, path: &[NodeId]) -> Result<()> {
    if path.len() != trees.num_trees() {
        return Err(Error::precondition(format!(
            "removal path has {} nodes for {} blocks",
            path.len(),
            trees.num_trees()
        )));
    }
    for (i, window) in trees.blocks().windows(2).enumerate() {
        let (Some(spr), Some(mapping)) = (window[1].spr.as_ref(), window[1].mapping.as_ref())
        else {
            return Err(Error::structure(format!("block {} has no SPR", i + 1)));
        };
        let (prev, tree) = (&window[0].tree, &window[1].tree);
        let next = get_next_removal_nodes(prev, tree, spr, mapping, path[i], None);
        if !next.contains(&Some(path[i + 1])) {
            return Err(Error::precondition(format!(
                "node {} in block {} does not continue node {} of block {i}",
                path[i + 1],
                i + 1,
                path[i]
            )));
        }
    }
    Ok(())
}

/// Cut the branch above `removal_path[i]` in every block `i` and hang it below a new root at
/// `maxtime`. The root's first child is the removed subtree.
pub(crate) fn remove_arg_thread_path(
    trees: &mut LocalTrees,
    removal_path: &[NodeId],
    maxtime: usize,
    validate: bool,
) -> Result<Thread> {
    check_removal_path(trees, removal_path)?;

    let mut excised = Vec::with_capacity(trees.num_trees());
    for (block, &node) in trees.blocks().iter().zip(removal_path) {
        let threaded = &block.tree;
        if !threaded.contains(node) || threaded.is_root(node) {
            return Err(Error::precondition(format!("cannot remove the branch above node {node}")));
        }
        let root = threaded.root();
        if maxtime < threaded.age(root) {
            return Err(Error::precondition(format!(
                "maxtime {maxtime} is below the root age {}",
                threaded.age(root)
            )));
        }
        let coal = threaded
            .parent(node)
            .ok_or_else(|| Error::structure(format!("node {node} has no parent")))?;
        let sibling = threaded
            .sibling(node)
            .ok_or_else(|| Error::structure(format!("node {node} has no sibling")))?;

        let mut tree = threaded.clone();
        apply_spr(&mut tree, &Spr::new(node, threaded.age(node), root, maxtime))?;
        excised.push(Excised {
            tree,
            branch: node,
            coal,
            displacement: None,
            sibling,
            time: threaded.age(coal),
            pop_path: threaded[coal].pop_path(),
        });
    }

    let pop_path = trees
        .tree(0)
        .map_or(0, |tree| tree[removal_path[0]].pop_path());
    let (blocks, thread) = rebuild(trees, ThreadKind::Subtree, pop_path, excised)?;

    let partial = LocalTrees::from_blocks(trees.start_coord(), trees.seqids().to_vec(), blocks)?;
    if validate {
        partial.validate()?;
    }

    debug!(
        "removed branch path at maxtime {maxtime}: {} blocks left, {} thread recombinations",
        partial.num_trees(),
        thread.recombs.len()
    );
    trees.replace(partial);
    Ok(thread)
}
