//! Ancestral recombination graphs as chains of local trees, with the machinery to thread a
//! lineage into an ARG, excise it again, and count and sample removal paths.

pub mod config;
pub mod dna;
pub mod error;
pub mod model;
pub mod removal;
pub mod sequences;
pub mod thread;
pub mod tree;

pub use config::ThreadConfig;
pub use error::{Error, Result};
pub use model::{ArgModel, PopulationTree};
