use rand::Rng;

use crate::error::{Error, Result};
use crate::removal::{
    count_arg_removal_paths, get_next_removal_nodes, get_prev_removal_nodes, RemovalPaths,
};
use crate::tree::{LocalTree, LocalTreeSpr, LocalTrees, NodeId};

/// Successors of `node` across the boundary in front of `block`, leaving out roots.
fn next_candidates(
    prev: &LocalTreeSpr,
    block: &LocalTreeSpr,
    node: NodeId,
) -> Result<Vec<NodeId>> {
    let (Some(spr), Some(mapping)) = (block.spr(), block.mapping()) else {
        return Err(Error::structure("boundary without SPR"));
    };
    Ok(get_next_removal_nodes(prev.tree(), block.tree(), spr, mapping, node, None)
        .into_iter()
        .flatten()
        .filter(|n| !block.tree().is_root(*n))
        .collect())
}

/// Predecessors of `node` across the boundary in front of `block`, leaving out roots.
fn prev_candidates(
    prev: &LocalTreeSpr,
    block: &LocalTreeSpr,
    node: NodeId,
) -> Result<Vec<NodeId>> {
    let (Some(spr), Some(mapping)) = (block.spr(), block.mapping()) else {
        return Err(Error::structure("boundary without SPR"));
    };
    Ok(get_prev_removal_nodes(prev.tree(), block.tree(), spr, mapping, node, None)
        .into_iter()
        .flatten()
        .filter(|n| !prev.tree().is_root(*n))
        .collect())
}

fn check_start(tree: &LocalTree, node: NodeId) -> Result<()> {
    if !tree.contains(node) {
        return Err(Error::precondition(format!("node {node} does not exist")));
    }
    if tree.is_root(node) {
        return Err(Error::no_removal_path(format!("node {node} is the root")));
    }
    Ok(())
}

fn check_probability(name: &str, p: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::precondition(format!("{name} must be a probability, got {p}")));
    }
    Ok(())
}

fn dead_end(block: usize, node: NodeId) -> Error {
    Error::no_removal_path(format!("node {node} has no removable continuation at block {block}"))
}

/// Pick among at most two candidates, leaving the preferred one with probability `p`.
fn choose<R: Rng + ?Sized>(
    candidates: &[NodeId],
    preferred: Option<NodeId>,
    p: f64,
    rng: &mut R,
) -> Option<NodeId> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        [a, b, ..] => {
            let (stay, leave) = match preferred {
                Some(preferred) if preferred == *b => (*b, *a),
                _ => (*a, *b),
            };
            Some(if rng.gen_bool(p) { leave } else { stay })
        }
    }
}

/// Sample a removal path starting at `node` in the first block, choosing uniformly among the
/// successors at every boundary.
pub fn sample_arg_removal_path<R: Rng + ?Sized>(
    trees: &LocalTrees,
    node: NodeId,
    rng: &mut R,
) -> Result<Vec<NodeId>> {
    let blocks = trees.blocks();
    let first = blocks.first().ok_or_else(|| Error::structure("ARG has no blocks"))?;
    check_start(first.tree(), node)?;

    let mut path = Vec::with_capacity(blocks.len());
    path.push(node);
    for (i, window) in blocks.windows(2).enumerate() {
        let candidates = next_candidates(&window[0], &window[1], path[i])?;
        if candidates.is_empty() {
            return Err(dead_end(i + 1, path[i]));
        }
        path.push(candidates[rng.gen_range(0..candidates.len())]);
    }
    Ok(path)
}

/// Sample a removal path through `node` at position `pos`, walking in both directions. At every
/// boundary the path stays on the identity lineage, and switches to the alternative with
/// probability `prob_switch`.
pub fn sample_arg_removal_path_switch<R: Rng + ?Sized>(
    trees: &LocalTrees,
    node: NodeId,
    pos: usize,
    prob_switch: f64,
    rng: &mut R,
) -> Result<Vec<NodeId>> {
    check_probability("prob_switch", prob_switch)?;
    let start = trees
        .block_index(pos)
        .ok_or_else(|| Error::precondition(format!("position {pos} is outside the ARG")))?;
    let blocks = trees.blocks();
    check_start(blocks[start].tree(), node)?;

    let mut path = vec![node; blocks.len()];
    for i in start + 1..blocks.len() {
        let current = path[i - 1];
        let candidates = next_candidates(&blocks[i - 1], &blocks[i], current)?;
        let identity = blocks[i].mapping().and_then(|m| m[current.index()]);
        path[i] = choose(&candidates, identity, prob_switch, rng)
            .ok_or_else(|| dead_end(i, current))?;
    }
    for i in (0..start).rev() {
        let current = path[i + 1];
        let candidates = prev_candidates(&blocks[i], &blocks[i + 1], current)?;
        let identity = blocks[i + 1]
            .mapping()
            .and_then(|m| m.iter().position(|image| *image == Some(current)))
            .map(NodeId::from_usize);
        path[i] = choose(&candidates, identity, prob_switch, rng)
            .ok_or_else(|| dead_end(i, current))?;
    }
    Ok(path)
}

/// The removal path of a leaf: leaves keep their id in every block.
pub fn sample_arg_removal_leaf_path(trees: &LocalTrees, leaf: NodeId) -> Result<Vec<NodeId>> {
    if leaf.index() >= trees.num_leaves() {
        return Err(Error::precondition(format!("node {leaf} is not a leaf")));
    }
    if trees.num_nodes() == 1 {
        return Err(Error::no_removal_path("the only leaf is the root"));
    }
    Ok(vec![leaf; trees.num_trees()])
}

/// Sample a removal path through the pruned lineage of a random recombination. At every
/// boundary with two continuations, the one carrying that boundary's pruned lineage is taken with
/// probability `recomb_preference`.
pub fn sample_arg_removal_path_recomb<R: Rng + ?Sized>(
    trees: &LocalTrees,
    recomb_preference: f64,
    rng: &mut R,
) -> Result<Vec<NodeId>> {
    check_probability("recomb_preference", recomb_preference)?;
    let blocks = trees.blocks();
    if blocks.len() < 2 {
        return Err(Error::no_removal_path("ARG has no recombinations"));
    }
    let boundary = rng.gen_range(1..blocks.len());
    let spr = blocks[boundary]
        .spr()
        .ok_or_else(|| Error::structure(format!("block {boundary} has no SPR")))?;
    let start = boundary - 1;

    let mut path = vec![spr.pruned_node; blocks.len()];
    for i in start + 1..blocks.len() {
        let current = path[i - 1];
        let candidates = next_candidates(&blocks[i - 1], &blocks[i], current)?;
        // the new coalescence node carries the pruned lineage
        let recoal = match (blocks[i].spr(), blocks[i].mapping()) {
            (Some(spr), Some(mapping)) => mapping[spr.pruned_node.index()]
                .and_then(|n| blocks[i].tree().parent(n)),
            _ => None,
        };
        let stay = candidates.iter().copied().find(|n| Some(*n) != recoal);
        path[i] = choose(&candidates, stay, recomb_preference, rng)
            .ok_or_else(|| dead_end(i, current))?;
    }
    for i in (0..start).rev() {
        let current = path[i + 1];
        let candidates = prev_candidates(&blocks[i], &blocks[i + 1], current)?;
        // the broken node carried the pruned lineage
        let broken = blocks[i + 1]
            .spr()
            .and_then(|spr| blocks[i].tree().parent(spr.pruned_node));
        let stay = candidates.iter().copied().find(|n| Some(*n) != broken);
        path[i] = choose(&candidates, stay, recomb_preference, rng)
            .ok_or_else(|| dead_end(i, current))?;
    }
    Ok(path)
}

/// Sample a removal path uniformly among all removal paths, by running the forward DP and
/// tracing back pointers. Returns the path and the total number of paths.
pub fn sample_arg_removal_path_uniform<R: Rng + ?Sized>(
    trees: &LocalTrees,
    rng: &mut R,
) -> Result<(Vec<NodeId>, f64)> {
    let mut paths = RemovalPaths::new();
    count_arg_removal_paths(trees, &mut paths, None)?;
    sample_from_counts(&paths, rng)
}

/// Like [`sample_arg_removal_path_uniform`], restricted to paths starting at `node`.
pub fn sample_arg_removal_path_uniform_from<R: Rng + ?Sized>(
    trees: &LocalTrees,
    node: NodeId,
    rng: &mut R,
) -> Result<(Vec<NodeId>, f64)> {
    let mut paths = RemovalPaths::new();
    count_arg_removal_paths(trees, &mut paths, Some(node))?;
    sample_from_counts(&paths, rng)
}

/// Draw an index with probability proportional to its weight.
fn sample_weighted<R: Rng + ?Sized>(weights: &[(NodeId, f64)], rng: &mut R) -> Option<NodeId> {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    let mut target = rng.gen::<f64>() * total;
    for (node, weight) in weights {
        if *weight <= 0.0 {
            continue;
        }
        if target < *weight {
            return Some(*node);
        }
        target -= weight;
    }
    weights.iter().rev().find(|(_, w)| *w > 0.0).map(|(n, _)| *n)
}

pub(crate) fn sample_from_counts<R: Rng + ?Sized>(
    paths: &RemovalPaths,
    rng: &mut R,
) -> Result<(Vec<NodeId>, f64)> {
    let total = paths.total();
    let ntrees = paths.num_trees();
    if ntrees == 0 || total <= 0.0 {
        return Err(Error::no_removal_path("the ARG has no removal path"));
    }

    let last: Vec<(NodeId, f64)> = paths
        .row(ntrees - 1)
        .iter()
        .enumerate()
        .map(|(i, w)| (NodeId::from_usize(i), *w))
        .collect();
    let mut node =
        sample_weighted(&last, rng).ok_or_else(|| Error::no_removal_path("empty row"))?;

    let mut path = vec![node; ntrees];
    for block in (1..ntrees).rev() {
        let preds: Vec<(NodeId, f64)> = paths
            .backptrs(block, node)
            .into_iter()
            .flatten()
            .map(|p| (p, paths.count(block - 1, p)))
            .collect();
        node = sample_weighted(&preds, rng).ok_or_else(|| {
            Error::structure(format!(
                "node {node} of block {block} has weight but no predecessor"
            ))
        })?;
        path[block - 1] = node;
    }
    Ok((path, total))
}

/// Removal path following one sample's ancestor over a time interval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovalPathByTime {
    pub path: Vec<NodeId>,
    /// block starts where the path does not continue the previous node, and the start coordinate
    /// if requested
    pub break_coords: Vec<usize>,
}

/// For every block, pick the ancestor of sequence `hap` whose branch spans the time interval
/// `[time_interval, time_interval + 1)`: the node is at most `time_interval` old and its parent
/// at least `time_interval + 1`.
///
/// # Errors
/// Returns [`Error::NoRemovalPath`] if in some block the interval lies above the root.
pub fn get_arg_removal_path_by_ind_and_time(
    trees: &LocalTrees,
    time_interval: usize,
    hap: usize,
    do_first: bool,
) -> Result<RemovalPathByTime> {
    let (low, high) = (time_interval, time_interval + 1);
    let leaf = trees
        .leaf_of(hap)
        .ok_or_else(|| Error::precondition(format!("sequence {hap} is not in the ARG")))?;

    let mut path = Vec::with_capacity(trees.num_trees());
    for (i, block) in trees.blocks().iter().enumerate() {
        let tree = block.tree();
        let mut node = leaf;
        loop {
            let parent = tree.parent(node).ok_or_else(|| {
                Error::no_removal_path(format!("interval reaches the root in block {i}"))
            })?;
            if tree.age(parent) >= high {
                break;
            }
            node = parent;
        }
        if tree.age(node) > low {
            return Err(Error::no_removal_path(format!(
                "no ancestor branch of {hap} spans [{low}, {high}) in block {i}"
            )));
        }
        path.push(node);
    }

    let starts = trees.block_starts();
    let mut break_coords = Vec::new();
    if do_first {
        break_coords.push(trees.start_coord());
    }
    for (i, window) in trees.blocks().windows(2).enumerate() {
        let (Some(spr), Some(mapping)) = (window[1].spr(), window[1].mapping()) else {
            return Err(Error::structure(format!("block {} has no SPR", i + 1)));
        };
        let (prev, tree) = (window[0].tree(), window[1].tree());
        let next = get_next_removal_nodes(prev, tree, spr, mapping, path[i], None);
        if !next.contains(&Some(path[i + 1])) {
            break_coords.push(starts[i + 1]);
        }
    }

    Ok(RemovalPathByTime { path, break_coords })
}
