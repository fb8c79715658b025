use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Population structure the ARG lives in. Only the number of population paths matters to the
/// tree edits, every branch carries the index of the path it follows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationTree {
    npaths: usize,
}

impl PopulationTree {
    pub fn new(npaths: usize) -> Self {
        Self { npaths }
    }

    pub fn num_paths(&self) -> usize {
        self.npaths
    }
}

/// The parts of the coalescent model consumed by the thread engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgModel {
    ntimes: usize,
    pop_tree: Option<PopulationTree>,
}

impl ArgModel {
    /// Create a model with `ntimes` discrete time points and no population structure.
    pub fn new(ntimes: usize) -> Self {
        Self {
            ntimes,
            pop_tree: None,
        }
    }

    pub fn with_pop_tree(ntimes: usize, pop_tree: PopulationTree) -> Self {
        Self {
            ntimes,
            pop_tree: Some(pop_tree),
        }
    }

    pub fn num_times(&self) -> usize {
        self.ntimes
    }

    pub fn pop_tree(&self) -> Option<&PopulationTree> {
        self.pop_tree.as_ref()
    }

    pub fn num_pop_paths(&self) -> usize {
        self.pop_tree.as_ref().map_or(1, PopulationTree::num_paths)
    }

    /// Check that a time index exists in the discretisation.
    pub fn check_time(&self, time: usize) -> Result<()> {
        if time >= self.ntimes {
            return Err(Error::precondition(format!(
                "time index {time} exceeds the {} time points of the model",
                self.ntimes
            )));
        }
        Ok(())
    }

    pub fn check_pop_path(&self, pop_path: usize) -> Result<()> {
        if pop_path >= self.num_pop_paths() {
            return Err(Error::precondition(format!(
                "population path {pop_path} does not exist, model has {}",
                self.num_pop_paths()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let model = ArgModel::new(20);
        assert!(model.check_time(19).is_ok());
        assert!(model.check_time(20).is_err());
        assert!(model.check_pop_path(0).is_ok());
        assert!(model.check_pop_path(1).is_err());

        let structured = ArgModel::with_pop_tree(20, PopulationTree::new(3));
        assert!(structured.check_pop_path(2).is_ok());
    }
}
