//! Uniform removal path sampling must hit every removal path equally often.

mod common;

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use rand::rngs::StdRng;
use rand::SeedableRng;
use twox_hash::XxHash64;

use libarg::removal::{sample_arg_removal_path_uniform, sample_arg_removal_path_uniform_from};
use libarg::tree::{LocalTrees, NodeId};

type Tally = HashMap<Vec<NodeId>, usize, BuildHasherDefault<XxHash64>>;

/// Pearson statistic of sampled path frequencies against a uniform distribution over `paths`.
fn chi_square(paths: &[Vec<NodeId>], samples: &Tally, trials: usize) -> f64 {
    let expected = trials as f64 / paths.len() as f64;
    paths
        .iter()
        .map(|path| {
            let observed = samples.get(path).copied().unwrap_or(0) as f64;
            (observed - expected).powi(2) / expected
        })
        .sum()
}

fn sample_paths(trees: &LocalTrees, trials: usize, seed: u64) -> Tally {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples = Tally::default();
    for _ in 0..trials {
        let (path, _) = sample_arg_removal_path_uniform(trees, &mut rng).unwrap();
        *samples.entry(path).or_insert(0) += 1;
    }
    samples
}

#[test]
fn test_uniform_over_all_paths() {
    let trials = 4000;
    for (seed, trees) in [common::three_block_arg(), common::uneven_arg()].iter().enumerate() {
        let paths = common::enumerate_removal_paths(trees);
        let samples = sample_paths(trees, trials, seed as u64);

        // nothing outside the enumerated paths
        assert!(samples.keys().all(|path| paths.contains(path)));
        assert_eq!(samples.values().sum::<usize>(), trials);

        // far beyond the 1e-6 quantile for the degrees of freedom used here
        let statistic = chi_square(&paths, &samples, trials);
        assert!(statistic < 40.0, "chi-square {statistic} over {} paths", paths.len());
    }
}

#[test]
fn test_uniform_from_start() {
    let trees = common::three_block_arg();
    let mut rng = StdRng::seed_from_u64(11);
    let n = common::node;

    let mut seen = Tally::default();
    for _ in 0..400 {
        let (path, total) = sample_arg_removal_path_uniform_from(&trees, n(0), &mut rng).unwrap();
        assert_eq!(total, 2.0);
        *seen.entry(path).or_insert(0) += 1;
    }
    assert_eq!(seen.len(), 2);
    assert!(seen.values().all(|count| *count > 100));

    // the root of the first tree starts no path
    let root = trees.tree(0).unwrap().root();
    assert!(sample_arg_removal_path_uniform_from(&trees, root, &mut rng).is_err());
}
