use rand::Rng;

use libarg::removal::get_next_removal_nodes;
use libarg::tree::{LocalTree, LocalTrees, NodeId, Spr};

#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub fn node(index: usize) -> NodeId {
    NodeId::from_usize(index)
}

/// `((0,1)3@1,2)4@3`
#[allow(dead_code)]
pub fn three_leaf_tree() -> LocalTree {
    LocalTree::from_parents(&[Some(3), Some(3), Some(4), Some(4), None], &[0, 0, 0, 1, 3])
        .unwrap()
}

/// Two leaves, recombination at 100 moving leaf 0 up to time 2.
#[allow(dead_code)]
pub fn two_leaf_arg() -> LocalTrees {
    let tree = LocalTree::from_parents(&[Some(2), Some(2), None], &[0, 0, 1]).unwrap();
    LocalTrees::from_sprs(0, tree, 100, &[(Spr::new(node(0), 0, node(1), 2), 100)], vec![0, 1])
        .unwrap()
}

/// Three leaves, three blocks of length 10.
#[allow(dead_code)]
pub fn three_block_arg() -> LocalTrees {
    LocalTrees::from_sprs(
        0,
        three_leaf_tree(),
        10,
        &[
            (Spr::new(node(2), 0, node(0), 1), 10),
            (Spr::new(node(1), 0, node(4), 4), 10),
        ],
        vec![0, 1, 2],
    )
    .unwrap()
}

/// Like [`three_block_arg`], with the SPRs tagging their new nodes with population paths 1
/// and 2.
#[allow(dead_code)]
pub fn tagged_arg() -> LocalTrees {
    LocalTrees::from_sprs(
        0,
        three_leaf_tree(),
        10,
        &[
            (Spr::new(node(2), 0, node(0), 1).with_pop_path(1), 10),
            (Spr::new(node(1), 0, node(4), 4).with_pop_path(2), 10),
        ],
        vec![0, 1, 2],
    )
    .unwrap()
}

/// `((0,1)3@1,2)4@3` with leaf 2 sampled at time 1, one block of length 10.
#[allow(dead_code)]
pub fn ancient_arg() -> LocalTrees {
    let tree =
        LocalTree::from_parents(&[Some(3), Some(3), Some(4), Some(4), None], &[0, 0, 1, 1, 3])
            .unwrap();
    LocalTrees::new(0, tree, 10, vec![0, 1, 2]).unwrap()
}

/// A random ARG over `nleaves` leaves with `nsprs` recombinations. Coalescence times of the
/// first tree increase strictly, all times stay below 8 and SPRs carry population paths 0 to 2.
#[allow(dead_code)]
pub fn random_arg<R: Rng>(rng: &mut R, nleaves: usize, nsprs: usize) -> LocalTrees {
    let nnodes = 2 * nleaves - 1;
    let mut parents = vec![None; nnodes];
    let mut ages = vec![0; nnodes];
    let mut active: Vec<usize> = (0..nleaves).collect();
    let mut time = 0;
    for id in nleaves..nnodes {
        time += 1;
        let a = active.swap_remove(rng.gen_range(0..active.len()));
        let b = active.swap_remove(rng.gen_range(0..active.len()));
        parents[a] = Some(id);
        parents[b] = Some(id);
        ages[id] = time;
        active.push(id);
    }
    let tree = LocalTree::from_parents(&parents, &ages).unwrap();
    let mut trees = LocalTrees::new(0, tree, rng.gen_range(1..20), (0..nleaves).collect()).unwrap();

    let mut attempts = 0;
    while trees.num_trees() <= nsprs {
        attempts += 1;
        assert!(attempts < 100_000, "no valid SPR found");
        let prune_time = rng.gen_range(0..8);
        let spr = Spr::new(
            node(rng.gen_range(0..nnodes)),
            prune_time,
            node(rng.gen_range(0..nnodes)),
            rng.gen_range(prune_time..8),
        )
        .with_pop_path(rng.gen_range(0..3));
        // most random events do not fit the tree and are skipped
        let _ = trees.push_spr(spr, rng.gen_range(1..20));
    }
    trees
}

/// Three leaves, blocks of length 30, 30 and 40.
#[allow(dead_code)]
pub fn uneven_arg() -> LocalTrees {
    LocalTrees::from_sprs(
        0,
        three_leaf_tree(),
        30,
        &[
            (Spr::new(node(2), 0, node(3), 2), 30),
            (Spr::new(node(1), 0, node(4), 4), 40),
        ],
        vec![0, 1, 2],
    )
    .unwrap()
}

/// Every removal path of the ARG, found by walking all successors. Roots are never part of a
/// path.
#[allow(dead_code)]
pub fn enumerate_removal_paths(trees: &LocalTrees) -> Vec<Vec<NodeId>> {
    let first = trees.tree(0).unwrap();
    let mut paths: Vec<Vec<NodeId>> = (0..trees.num_nodes())
        .map(node)
        .filter(|n| !first.is_root(*n))
        .map(|n| vec![n])
        .collect();

    for window in trees.blocks().windows(2) {
        let (prev, current) = (&window[0], &window[1]);
        let (spr, mapping) = (current.spr().unwrap(), current.mapping().unwrap());
        paths = paths
            .into_iter()
            .flat_map(|path| {
                let last = *path.last().unwrap();
                get_next_removal_nodes(prev.tree(), current.tree(), spr, mapping, last, None)
                    .into_iter()
                    .flatten()
                    .filter(|n| !current.tree().is_root(*n))
                    .map(move |n| {
                        let mut extended = path.clone();
                        extended.push(n);
                        extended
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
    }
    paths
}
