use log::debug;

use crate::error::{Error, Result};
use crate::model::ArgModel;
use crate::thread::{validate_thread, State, Thread, ThreadKind, ThreadNode};
use crate::tree::matching::{infer_transition, SprHint, Transition};
use crate::tree::{apply_spr, Displacement, LocalTree, LocalTreeSpr, LocalTrees, NodeId, Spr};

/// A local tree with the thread attached, and where the thread's nodes ended up.
struct Threaded {
    tree: LocalTree,
    branch: NodeId,
    coal: NodeId,
    /// relabelling of the ids of the tree without the thread
    displacement: Option<Displacement>,
    state: State,
}

impl Threaded {
    /// Id in the threaded tree of a node of the tree without thread.
    fn translate(&self, node: NodeId) -> NodeId {
        self.displacement
            .as_ref()
            .and_then(|d| d.apply(node))
            .unwrap_or(node)
    }

    fn resolve(&self, node: ThreadNode) -> NodeId {
        match node {
            ThreadNode::Branch => self.branch,
            ThreadNode::Coal => self.coal,
            ThreadNode::Tree(node) => self.translate(node),
        }
    }
}

/// Attach the thread to one local tree. `pop_path` tags a new leaf, the node where the thread
/// joins takes the tag of the state.
fn attach(tree: &LocalTree, kind: ThreadKind, state: State, pop_path: usize) -> Result<Threaded> {
    let mut tree = tree.clone();
    match kind {
        ThreadKind::Leaf { age, .. } => {
            let insert =
                tree.add_aged_branch(state.node, state.time, age, pop_path, state.pop_path)?;
            Ok(Threaded {
                tree,
                branch: insert.newleaf,
                coal: insert.newcoal,
                displacement: Some(insert.displacement),
                state,
            })
        }
        ThreadKind::Subtree => {
            let top = tree.root();
            let [subtree, _] = tree
                .children(top)
                .ok_or_else(|| Error::precondition("partial ARG has no hanging subtree"))?;
            let spr = Spr::new(subtree, tree.age(subtree), state.node, state.time)
                .with_pop_path(state.pop_path);
            apply_spr(&mut tree, &spr)?;
            Ok(Threaded {
                tree,
                branch: subtree,
                coal: top,
                displacement: None,
                state,
            })
        }
    }
}

/// Hint for an SPR that already existed in the ARG before the thread was added. If the pruned
/// lineage carries the thread and is cut above the thread's coalescence, the thread moves along
/// and the coalescence node is pruned instead.
fn existing_boundary_hint(prev: &Threaded, spr: &Spr) -> SprHint {
    let pruned = prev.translate(spr.pruned_node);
    let candidates = if prev.state.node != spr.pruned_node {
        vec![pruned]
    } else if spr.prune_time >= prev.state.time {
        vec![prev.coal, pruned]
    } else {
        vec![pruned, prev.coal]
    };
    SprHint::new(candidates, spr.prune_time, spr.pop_path)
}

/// Add a thread to the ARG. Blocks are split at the thread's recombinations and every boundary
/// SPR and mapping is re-derived from the threaded trees.
pub(crate) fn add_arg_thread_path(
    trees: &mut LocalTrees,
    model: &ArgModel,
    thread: &Thread,
    validate: bool,
) -> Result<()> {
    validate_thread(trees, model, thread)?;

    let block_starts = trees.block_starts();
    let mut blocks: Vec<LocalTreeSpr> = Vec::with_capacity(thread.segments.len());
    let mut recombs = thread.recomb_pos.iter().zip(&thread.recombs);
    let mut prev: Option<Threaded> = None;

    for segment in &thread.segments {
        let index = trees
            .block_index(segment.start)
            .ok_or_else(|| Error::precondition(format!("no block at {}", segment.start)))?;
        let block = &trees.blocks()[index];
        let threaded = attach(&block.tree, thread.kind, segment.state, thread.pop_path)?;
        let blocklen = segment.end - segment.start;

        let Some(last) = prev.as_ref() else {
            blocks.push(LocalTreeSpr::new(threaded.tree.clone(), blocklen, None, None));
            prev = Some(threaded);
            continue;
        };

        let (hint, descriptor) = if block_starts[index] == segment.start {
            let spr = block
                .spr
                .as_ref()
                .ok_or_else(|| Error::structure(format!("block {index} has no SPR")))?;
            (existing_boundary_hint(last, spr), None)
        } else {
            let (pos, recomb) = recombs.next().ok_or_else(|| {
                Error::precondition(format!("missing recombination at {}", segment.start))
            })?;
            if *pos != segment.start {
                return Err(Error::precondition(format!(
                    "recombination at {pos} does not start a segment"
                )));
            }
            let hint = SprHint::new(
                vec![last.resolve(recomb.pruned)],
                recomb.prune_time,
                recomb.pop_path,
            )
            .strict();
            (hint, Some(recomb))
        };

        match infer_transition(&last.tree, &threaded.tree, &hint)? {
            Transition::Spr(spr, mapping) => {
                if let Some(recomb) = descriptor {
                    let expected = Spr::new(
                        spr.pruned_node,
                        spr.prune_time,
                        last.resolve(recomb.recoal),
                        recomb.recoal_time,
                    )
                    .normalized(&last.tree);
                    if expected.recoal_node != spr.recoal_node
                        || expected.recoal_time != spr.recoal_time
                        || spr.prune_time != recomb.prune_time
                    {
                        return Err(Error::precondition(format!(
                            "recombination at {} does not match the thread states",
                            segment.start
                        )));
                    }
                }
                blocks.push(LocalTreeSpr::new(
                    threaded.tree.clone(),
                    blocklen,
                    Some(spr),
                    Some(mapping),
                ));
            }
            Transition::Null(_) if descriptor.is_some() => {
                return Err(Error::precondition(format!(
                    "recombination at {} leaves the tree unchanged",
                    segment.start
                )));
            }
            Transition::Null(_) => {
                debug!("boundary at {} vanished while threading", segment.start);
                if let Some(last) = blocks.last_mut() {
                    last.blocklen += blocklen;
                }
                continue;
            }
        }
        prev = Some(threaded);
    }

    if recombs.next().is_some() {
        return Err(Error::precondition("thread has unused recombinations"));
    }

    let mut seqids = trees.seqids().to_vec();
    if let ThreadKind::Leaf { seqid, .. } = thread.kind {
        seqids.push(seqid);
    }
    let threaded = LocalTrees::from_blocks(trees.start_coord(), seqids, blocks)?;
    if validate {
        threaded.validate()?;
    }

    debug!(
        "added {:?} thread with {} recombinations, ARG now has {} blocks",
        thread.kind,
        thread.recombs.len(),
        threaded.num_trees()
    );
    trees.replace(threaded);
    Ok(())
}
