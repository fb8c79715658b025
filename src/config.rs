use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables of the thread engine and the heuristic removal-path samplers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Run a full structural validation of the ARG after every splice or excision.
    pub validate_edits: bool,

    /// Probability of leaving the identity lineage at a boundary in the switch sampler
    pub prob_switch: f64,

    /// Probability of following the pruned lineage at a boundary in the recombination sampler
    pub recomb_preference: f64,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            validate_edits: cfg!(debug_assertions),
            prob_switch: 0.1,
            recomb_preference: 0.5,
        }
    }
}

impl ThreadConfig {
    /// Check that both probabilities are in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("prob_switch", self.prob_switch),
            ("recomb_preference", self.recomb_preference),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::precondition(format!(
                    "{name} must be a probability, got {value}"
                )));
            }
        }
        Ok(())
    }
}
