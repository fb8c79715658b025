use serde::{Deserialize, Serialize};

use crate::dna::{dna_to_int, NUM_BASES};

/// Likelihood of each nucleotide at one position of one sequence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaseProbs {
    prob: [f64; NUM_BASES],
}

/// Probabilities above this threshold count as "base cannot be excluded"
const MASK_THRESHOLD: f64 = 0.99;

impl BaseProbs {
    /// Certain call for a nucleotide. Characters that are not a nucleotide give a masked
    /// position where every base is possible.
    pub fn from_char(base: u8) -> Self {
        match dna_to_int(base) {
            Some(code) => {
                let mut prob = [0.0; NUM_BASES];
                prob[code] = 1.0;
                Self { prob }
            }
            None => Self::masked(),
        }
    }

    pub fn from_probs(prob: [f64; NUM_BASES]) -> Self {
        Self { prob }
    }

    /// A position where every nucleotide is possible.
    pub fn masked() -> Self {
        Self {
            prob: [1.0; NUM_BASES],
        }
    }

    pub fn prob(&self, code: usize) -> f64 {
        self.prob[code]
    }

    pub fn max_prob(&self) -> f64 {
        self.prob.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn set_mask(&mut self) {
        self.prob = [1.0; NUM_BASES];
    }

    pub fn is_masked(&self) -> bool {
        self.prob.iter().all(|p| *p >= MASK_THRESHOLD)
    }

    /// Whether exactly one nucleotide has a probability above `tol`. Returns `None` if no
    /// nucleotide is possible at all.
    pub fn is_certain(&self, tol: f64) -> Option<bool> {
        match self.prob.iter().filter(|p| **p > tol).count() {
            0 => None,
            n => Some(n == 1),
        }
    }

    pub fn is_equal(&self, other: &BaseProbs, tol: f64) -> bool {
        self.prob
            .iter()
            .zip(&other.prob)
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    pub(crate) fn swap(&mut self, other: &mut BaseProbs) {
        std::mem::swap(&mut self.prob, &mut other.prob);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_char() {
        let g = BaseProbs::from_char(b'G');
        assert_eq!(g.prob(2), 1.0);
        assert_eq!(g.max_prob(), 1.0);
        assert_eq!(g.is_certain(1e-8), Some(true));
        assert!(!g.is_masked());

        let n = BaseProbs::from_char(b'N');
        assert!(n.is_masked());
        assert_eq!(n.is_certain(1e-8), Some(false));
    }

    #[test]
    fn test_mask_and_compare() {
        let mut probs = BaseProbs::from_probs([0.1, 0.7, 0.1, 0.1]);
        assert_eq!(probs.max_prob(), 0.7);
        assert!(probs.is_equal(&BaseProbs::from_probs([0.1, 0.7 + 1e-10, 0.1, 0.1]), 1e-8));

        probs.set_mask();
        assert!(probs.is_masked());
        assert!(probs.is_equal(&BaseProbs::masked(), 0.0));

        assert_eq!(BaseProbs::from_probs([0.0; 4]).is_certain(1e-8), None);
    }
}
