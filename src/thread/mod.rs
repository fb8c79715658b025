use serde::{Deserialize, Serialize};

use crate::config::ThreadConfig;
use crate::error::{Error, Result};
use crate::model::ArgModel;
use crate::tree::{LocalTree, LocalTrees, NodeId};

mod excise;
mod splice;

pub(crate) use excise::{remove_arg_thread, remove_arg_thread_path};
pub(crate) use splice::add_arg_thread_path;

/// Position of a threaded lineage within one local tree: it joins the branch above `node` at
/// `time`. The node created where it joins is tagged with `pop_path`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    pub node: NodeId,
    pub time: usize,
    pub pop_path: usize,
}

impl State {
    pub fn new(node: NodeId, time: usize) -> Self {
        Self {
            node,
            time,
            pop_path: 0,
        }
    }

    pub fn with_pop_path(self, pop_path: usize) -> Self {
        Self { pop_path, ..self }
    }
}

/// A node named relative to a thread. Recombinations of a thread are stored before the thread is
/// part of the ARG, so the nodes the thread itself contributes cannot be named by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadNode {
    /// the thread's own branch: the new leaf, or the root of the re-attached subtree
    Branch,
    /// the node where the thread joins the tree
    Coal,
    /// a node of the tree the thread is added to
    Tree(NodeId),
}

/// A recombination on or involving the thread. Tree nodes are named in the tree covering the
/// position just before the recombination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadSpr {
    pub pruned: ThreadNode,
    pub prune_time: usize,
    pub recoal: ThreadNode,
    pub recoal_time: usize,
    pub pop_path: usize,
}

/// What a thread re-attaches to the ARG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadKind {
    /// a new leaf carrying the given sequence id, sampled at time `age`
    Leaf { seqid: usize, age: usize },
    /// the subtree hanging below the root of a partial ARG (first child of the root)
    Subtree,
}

/// A stretch `[start, end)` of the genome over which the thread keeps one state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSegment {
    pub start: usize,
    pub end: usize,
    pub state: State,
}

/// The trajectory of one lineage along the genome. Segment boundaries are exactly the block
/// starts of the ARG the thread belongs to plus the thread's own recombination positions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub kind: ThreadKind,
    pub pop_path: usize,
    pub segments: Vec<ThreadSegment>,
    pub recomb_pos: Vec<usize>,
    pub recombs: Vec<ThreadSpr>,
}

impl Thread {
    pub fn start_coord(&self) -> Option<usize> {
        self.segments.first().map(|s| s.start)
    }

    pub fn end_coord(&self) -> Option<usize> {
        self.segments.last().map(|s| s.end)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> + '_ {
        self.segments.iter().map(|s| &s.state)
    }

    /// State of the thread at a genomic position
    pub fn state_at(&self, pos: usize) -> Option<State> {
        self.segments
            .iter()
            .find(|s| s.start <= pos && pos < s.end)
            .map(|s| s.state)
    }

    /// Expand the segments into one state per base.
    pub fn per_base_states(&self) -> Vec<State> {
        self.segments
            .iter()
            .flat_map(|s| std::iter::repeat(s.state).take(s.end - s.start))
            .collect()
    }

    /// Segment a per-base state array along the block starts of `trees` and the recombination
    /// positions. The state must not change inside a segment.
    pub fn from_path(
        trees: &LocalTrees,
        kind: ThreadKind,
        path: &[State],
        recomb_pos: &[usize],
        recombs: &[ThreadSpr],
    ) -> Result<Self> {
        if path.len() != trees.length() {
            return Err(Error::precondition(format!(
                "thread path covers {} bases, the ARG {}",
                path.len(),
                trees.length()
            )));
        }

        let start = trees.start_coord();
        let mut boundaries = trees.block_starts();
        boundaries.extend_from_slice(recomb_pos);
        boundaries.sort_unstable();
        boundaries.dedup();
        boundaries.push(trees.end_coord());

        let mut segments = Vec::with_capacity(boundaries.len());
        for window in boundaries.windows(2) {
            let (seg_start, seg_end) = (window[0], window[1]);
            if seg_start < start || seg_end > trees.end_coord() || seg_start >= seg_end {
                return Err(Error::precondition(format!(
                    "recombination position {seg_start} lies outside the ARG"
                )));
            }
            let states = &path[seg_start - start..seg_end - start];
            let state = states[0];
            if let Some(pos) = states.iter().position(|s| *s != state) {
                return Err(Error::precondition(format!(
                    "thread changes state at {} without a recombination",
                    seg_start + pos
                )));
            }
            segments.push(ThreadSegment {
                start: seg_start,
                end: seg_end,
                state,
            });
        }

        Ok(Self {
            kind,
            pop_path: 0,
            segments,
            recomb_pos: recomb_pos.to_vec(),
            recombs: recombs.to_vec(),
        })
    }
}

/// Check that `thread` can be added to `trees`: it covers the same interval, its segments
/// follow the block starts and recombinations, and every state lies on a branch of the local
/// tree it refers to.
pub fn validate_thread(trees: &LocalTrees, model: &ArgModel, thread: &Thread) -> Result<()> {
    model.check_pop_path(thread.pop_path)?;
    if thread.recomb_pos.len() != thread.recombs.len() {
        return Err(Error::precondition(format!(
            "{} recombination positions but {} descriptors",
            thread.recomb_pos.len(),
            thread.recombs.len()
        )));
    }
    if thread.recomb_pos.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::precondition("recombination positions are not increasing"));
    }

    let block_starts = trees.block_starts();
    if thread
        .recomb_pos
        .iter()
        .any(|pos| block_starts.binary_search(pos).is_ok())
    {
        return Err(Error::precondition(
            "thread recombinations must lie strictly inside blocks",
        ));
    }
    let mut expected = block_starts;
    expected.extend_from_slice(&thread.recomb_pos);
    expected.sort_unstable();

    let starts: Vec<usize> = thread.segments.iter().map(|s| s.start).collect();
    if starts != expected
        || thread.end_coord() != Some(trees.end_coord())
        || thread.segments.windows(2).any(|w| w[0].end != w[1].start)
    {
        return Err(Error::precondition(format!(
            "thread segments {starts:?} do not follow the blocks and recombinations {expected:?}"
        )));
    }

    match thread.kind {
        ThreadKind::Leaf { seqid, .. } if trees.leaf_of(seqid).is_some() => {
            return Err(Error::precondition(format!(
                "sequence {seqid} is already part of the ARG"
            )))
        }
        _ => {}
    }

    for segment in &thread.segments {
        let tree = trees
            .tree_at(segment.start)
            .ok_or_else(|| Error::precondition(format!("no block at {}", segment.start)))?;
        model.check_time(segment.state.time)?;
        model.check_pop_path(segment.state.pop_path)?;
        check_state(tree, thread.kind, segment.state).map_err(|e| {
            Error::precondition(format!("segment at {}: {e}", segment.start))
        })?;
    }
    Ok(())
}

/// Check that a state names a branch the thread can join.
fn check_state(tree: &LocalTree, kind: ThreadKind, state: State) -> Result<()> {
    if !tree.contains(state.node) {
        return Err(Error::precondition(format!("node {} does not exist", state.node)));
    }
    match kind {
        ThreadKind::Leaf { age, .. } if state.time < age => Err(Error::precondition(format!(
            "leaf of age {age} cannot join at time {}",
            state.time
        ))),
        ThreadKind::Leaf { .. } => tree.check_branch_time(state.node, state.time),
        ThreadKind::Subtree => {
            let root = tree.root();
            let [subtree, _] = tree
                .children(root)
                .ok_or_else(|| Error::precondition("partial ARG has no hanging subtree"))?;
            if state.node == root || tree.is_descendant(state.node, subtree) {
                return Err(Error::precondition(format!(
                    "node {} is not part of the remaining tree",
                    state.node
                )));
            }
            if state.time < tree.age(subtree) {
                return Err(Error::precondition(format!(
                    "time {} is below the subtree root",
                    state.time
                )));
            }
            // the top node is removed when the subtree joins, so its branch is unbounded
            match tree.parent(state.node) {
                Some(parent) if parent != root => tree.check_branch_time(state.node, state.time),
                _ if state.time < tree.age(state.node) => Err(Error::precondition(format!(
                    "time {} is below node {}",
                    state.time, state.node
                ))),
                _ => Ok(()),
            }
        }
    }
}

/// Splices lineages into an ARG and excises them again, following a [`ThreadConfig`].
#[derive(Clone, Debug)]
pub struct ThreadEngine {
    model: ArgModel,
    config: ThreadConfig,
}

impl ThreadEngine {
    /// Create a new engine.
    ///
    /// # Parameters
    /// - `model` time discretisation and population structure of the ARG
    /// - `config` engine and sampler tunables
    pub fn new(model: ArgModel, config: ThreadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { model, config })
    }

    pub fn model(&self) -> &ArgModel {
        &self.model
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }

    /// Add a new leaf for sequence `seqid`, sampled at time 0, following a per-base state array.
    /// Ancient samples are added through [`ThreadEngine::add_arg_thread_path`] with their age in
    /// [`ThreadKind::Leaf`].
    ///
    /// # Parameters
    /// - `path` one state per base of the ARG, in the node ids of the block covering the base
    /// - `recomb_pos` positions where the thread recombines, strictly inside blocks
    /// - `recombs` the recombination at each position
    pub fn add_arg_thread(
        &self,
        trees: &mut LocalTrees,
        seqid: usize,
        path: &[State],
        recomb_pos: &[usize],
        recombs: &[ThreadSpr],
    ) -> Result<()> {
        let kind = ThreadKind::Leaf { seqid, age: 0 };
        let thread = Thread::from_path(trees, kind, path, recomb_pos, recombs)?;
        self.add_arg_thread_path(trees, &thread)
    }

    /// Add a segmented thread, either as new leaf or by re-attaching the hanging subtree of a
    /// partial ARG.
    pub fn add_arg_thread_path(&self, trees: &mut LocalTrees, thread: &Thread) -> Result<()> {
        add_arg_thread_path(trees, &self.model, thread, self.config.validate_edits)
    }

    /// Remove the leaf of sequence `seqid` and return its thread.
    pub fn remove_arg_thread(&self, trees: &mut LocalTrees, seqid: usize) -> Result<Thread> {
        remove_arg_thread(trees, seqid, self.config.validate_edits)
    }

    /// Cut the branch above `removal_path[i]` in every block `i` and hang it below a new root at
    /// `maxtime`. Returns the thread that re-attaches it.
    pub fn remove_arg_thread_path(
        &self,
        trees: &mut LocalTrees,
        removal_path: &[NodeId],
        maxtime: usize,
    ) -> Result<Thread> {
        remove_arg_thread_path(trees, removal_path, maxtime, self.config.validate_edits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{LocalTree, Spr};

    fn arg() -> LocalTrees {
        let tree = LocalTree::from_parents(&[Some(2), Some(2), None], &[0, 0, 1]).unwrap();
        let spr = Spr::new(NodeId(0), 0, NodeId(1), 2);
        LocalTrees::from_sprs(0, tree, 100, &[(spr, 100)], vec![0, 1]).unwrap()
    }

    fn leaf_thread(states: [State; 3], recomb_at: usize) -> Thread {
        let recomb = ThreadSpr {
            pruned: ThreadNode::Branch,
            prune_time: 0,
            recoal: ThreadNode::Tree(NodeId(0)),
            recoal_time: 1,
            pop_path: 0,
        };
        let mut bounds = vec![0, 100, recomb_at, 200];
        bounds.sort_unstable();
        Thread {
            kind: ThreadKind::Leaf { seqid: 5, age: 0 },
            pop_path: 0,
            segments: (0..3)
                .map(|i| ThreadSegment {
                    start: bounds[i],
                    end: bounds[i + 1],
                    state: states[i],
                })
                .collect(),
            recomb_pos: vec![recomb_at],
            recombs: vec![recomb],
        }
    }

    #[test]
    fn test_validate_thread() {
        let trees = arg();
        let model = ArgModel::new(10);
        let states = [State::new(NodeId(2), 3), State::new(NodeId(2), 3), State::new(NodeId(0), 1)];

        validate_thread(&trees, &model, &leaf_thread(states, 150)).unwrap();

        // recombination on a block boundary
        assert!(validate_thread(&trees, &model, &leaf_thread(states, 100)).is_err());

        // state below the node
        let low = [State::new(NodeId(2), 0), states[1], states[2]];
        assert!(validate_thread(&trees, &model, &leaf_thread(low, 150)).is_err());

        // time outside the model
        let high = [State::new(NodeId(2), 10), states[1], states[2]];
        assert!(validate_thread(&trees, &model, &leaf_thread(high, 150)).is_err());

        // population path outside the model
        let tagged = [states[0].with_pop_path(1), states[1], states[2]];
        assert!(validate_thread(&trees, &model, &leaf_thread(tagged, 150)).is_err());

        // an ancient leaf joining below its own age
        let mut ancient = leaf_thread(states, 150);
        ancient.kind = ThreadKind::Leaf { seqid: 5, age: 2 };
        assert!(validate_thread(&trees, &model, &ancient).is_err());
        ancient.kind = ThreadKind::Leaf { seqid: 5, age: 1 };
        validate_thread(&trees, &model, &ancient).unwrap();
    }

    #[test]
    fn test_from_path() {
        let trees = arg();
        let mut path = vec![State::new(NodeId(2), 3); 150];
        path.extend(vec![State::new(NodeId(0), 1); 50]);
        let recomb = ThreadSpr {
            pruned: ThreadNode::Branch,
            prune_time: 2,
            recoal: ThreadNode::Tree(NodeId(0)),
            recoal_time: 1,
            pop_path: 0,
        };

        let kind = ThreadKind::Leaf { seqid: 2, age: 0 };
        let thread = Thread::from_path(&trees, kind, &path, &[150], &[recomb]).unwrap();
        let starts: Vec<_> = thread.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 100, 150]);
        assert_eq!(thread.state_at(120), Some(State::new(NodeId(2), 3)));
        assert_eq!(thread.per_base_states(), path);

        // state change without recombination
        assert!(Thread::from_path(&trees, kind, &path, &[], &[]).is_err());
    }
}
