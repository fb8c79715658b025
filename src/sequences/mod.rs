//! In-memory sequence data the ARG is inferred from. No file formats are read or written here.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::BuildHasherDefault;

use twox_hash::XxHash64;

use crate::error::{Error, Result};

mod base_probs;
mod sites;

pub use base_probs::BaseProbs;
pub use sites::{Sites, SitesMapping};

/// A position in a DNA sequence. This newtype ensures that genomic positions and indices into
/// site vectors aren't mixed up.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SequencePosition(usize);

impl SequencePosition {
    /// Create a new sequence position from a usize.
    pub fn from_usize(position: usize) -> Self {
        Self(position)
    }

    #[inline]
    pub fn from_vec(positions: Vec<usize>) -> Vec<Self> {
        positions.into_iter().map(Self::from_usize).collect()
    }

    /// Get the underlying usize value of the sequence position.
    pub fn get(&self) -> usize {
        self.0
    }
}

impl Display for SequencePosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An alignment of named sequences of equal length, with optional per-base likelihoods.
#[derive(Clone, Debug, Default)]
pub struct Sequences {
    names: Vec<String>,
    seqs: Vec<Vec<u8>>,
    base_probs: Vec<Vec<BaseProbs>>,
    /// index of the other haplotype of the same individual
    pairs: Vec<Option<usize>>,
    /// sampling time index of every sequence
    ages: Vec<usize>,
    index: HashMap<String, usize, BuildHasherDefault<XxHash64>>,
    seqlen: usize,
}

impl Sequences {
    pub fn new(seqlen: usize) -> Self {
        Self {
            seqlen,
            ..Self::default()
        }
    }

    /// Add a sequence. Either every sequence carries base likelihoods or none does.
    ///
    /// # Parameters
    /// - `name` unique name of the sequence
    /// - `seq` the nucleotides, must match the alignment length
    /// - `base_probs` per-base likelihoods, empty if the sequence has none
    pub fn append(
        &mut self,
        name: impl Into<String>,
        seq: Vec<u8>,
        base_probs: Vec<BaseProbs>,
    ) -> Result<()> {
        let name = name.into();
        if self.seqs.is_empty() && self.seqlen == 0 {
            self.seqlen = seq.len();
        }
        if seq.len() != self.seqlen {
            return Err(Error::precondition(format!(
                "sequence {name} has length {}, alignment has {}",
                seq.len(),
                self.seqlen
            )));
        }
        if !base_probs.is_empty() && base_probs.len() != seq.len() {
            return Err(Error::precondition(format!(
                "sequence {name} has {} base likelihoods for {} bases",
                base_probs.len(),
                seq.len()
            )));
        }
        if !self.seqs.is_empty() && self.base_probs.is_empty() != base_probs.is_empty() {
            return Err(Error::precondition(
                "either all sequences or none must carry base likelihoods",
            ));
        }
        if self.index.contains_key(&name) {
            return Err(Error::precondition(format!("duplicate sequence name {name}")));
        }

        self.index.insert(name.clone(), self.seqs.len());
        self.names.push(name);
        self.seqs.push(seq);
        if !base_probs.is_empty() {
            self.base_probs.push(base_probs);
        }
        self.pairs.push(None);
        self.ages.push(0);
        Ok(())
    }

    pub fn get_num_seqs(&self) -> usize {
        self.seqs.len()
    }

    pub fn length(&self) -> usize {
        self.seqlen
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn seq(&self, index: usize) -> Option<&[u8]> {
        self.seqs.get(index).map(Vec::as_slice)
    }

    pub fn base_probs(&self, index: usize) -> Option<&[BaseProbs]> {
        self.base_probs.get(index).map(Vec::as_slice)
    }

    /// Index of the sequence with the given name.
    pub fn seq_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn age(&self, index: usize) -> Option<usize> {
        self.ages.get(index).copied()
    }

    pub fn set_age(&mut self, index: usize, age: usize) -> Result<()> {
        let slot = self
            .ages
            .get_mut(index)
            .ok_or_else(|| Error::precondition(format!("no sequence {index}")))?;
        *slot = age;
        Ok(())
    }

    pub fn get_pair(&self, index: usize) -> Option<usize> {
        self.pairs.get(index).copied().flatten()
    }

    /// Pair haplotypes named `<ind>_1` and `<ind>_2`.
    pub fn set_pairs_by_name(&mut self) {
        for i in 0..self.names.len() {
            let partner = match self.names[i].rsplit_once('_') {
                Some((ind, "1")) => self.seq_index(&format!("{ind}_2")),
                Some((ind, "2")) => self.seq_index(&format!("{ind}_1")),
                _ => None,
            };
            self.pairs[i] = partner;
        }
    }

    /// Swap the alleles of two sequences at one coordinate, likelihoods included.
    pub fn switch_alleles(&mut self, coord: usize, seq1: usize, seq2: usize) -> Result<()> {
        if coord >= self.seqlen || seq1 >= self.seqs.len() || seq2 >= self.seqs.len() {
            return Err(Error::precondition(format!(
                "cannot switch alleles of sequences {seq1} and {seq2} at {coord}"
            )));
        }
        if seq1 == seq2 {
            return Ok(());
        }
        let (a, b) = (self.seqs[seq1][coord], self.seqs[seq2][coord]);
        self.seqs[seq1][coord] = b;
        self.seqs[seq2][coord] = a;

        if !self.base_probs.is_empty() {
            let (low, high) = (seq1.min(seq2), seq1.max(seq2));
            let (left, right) = self.base_probs.split_at_mut(high);
            left[low][coord].swap(&mut right[0][coord]);
        }
        Ok(())
    }

    /// For every column, whether at least two sequences carry the minor allele. Masked bases
    /// (`N`) are ignored.
    pub fn non_singleton_snps(&self) -> Vec<bool> {
        (0..self.seqlen)
            .map(|coord| {
                let mut counts = [0usize; crate::dna::NUM_BASES];
                for seq in &self.seqs {
                    if let Some(code) = crate::dna::dna_to_int(seq[coord]) {
                        counts[code] += 1;
                    }
                }
                counts.sort_unstable();
                // second most common allele
                counts[crate::dna::NUM_BASES - 2] >= 2
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment() -> Sequences {
        let mut seqs = Sequences::new(0);
        seqs.append("a_1", b"ACGTA".to_vec(), vec![]).unwrap();
        seqs.append("a_2", b"ACGTT".to_vec(), vec![]).unwrap();
        seqs.append("b_1", b"TCGNT".to_vec(), vec![]).unwrap();
        seqs.append("b_2", b"TCCNA".to_vec(), vec![]).unwrap();
        seqs
    }

    #[test]
    fn test_append() {
        let mut seqs = alignment();
        assert_eq!(seqs.get_num_seqs(), 4);
        assert_eq!(seqs.length(), 5);
        assert_eq!(seqs.seq_index("b_1"), Some(2));
        assert_eq!(seqs.seq_index("c"), None);

        assert!(seqs.append("c", b"AC".to_vec(), vec![]).is_err());
        assert!(seqs.append("a_1", b"ACGTA".to_vec(), vec![]).is_err());
        let probs = b"ACGTA".iter().map(|b| BaseProbs::from_char(*b)).collect();
        assert!(seqs.append("c", b"ACGTA".to_vec(), probs).is_err());
    }

    #[test]
    fn test_pairs() {
        let mut seqs = alignment();
        seqs.set_pairs_by_name();
        assert_eq!(seqs.get_pair(0), Some(1));
        assert_eq!(seqs.get_pair(3), Some(2));
    }

    #[test]
    fn test_switch_alleles() {
        let mut seqs = Sequences::new(3);
        let probs = |s: &[u8]| s.iter().map(|b| BaseProbs::from_char(*b)).collect();
        seqs.append("x", b"AAA".to_vec(), probs(b"AAA")).unwrap();
        seqs.append("y", b"CCC".to_vec(), probs(b"CCC")).unwrap();

        seqs.switch_alleles(1, 1, 0).unwrap();
        assert_eq!(seqs.seq(0), Some(&b"ACA"[..]));
        assert_eq!(seqs.seq(1), Some(&b"CAC"[..]));
        assert_eq!(seqs.base_probs(0).unwrap()[1], BaseProbs::from_char(b'C'));
        assert!(seqs.switch_alleles(3, 0, 1).is_err());
    }

    #[test]
    fn test_non_singleton_snps() {
        let seqs = alignment();
        // columns: A/T split 2-2, invariant, one C among G, masked, A/T split 2-2
        assert_eq!(seqs.non_singleton_snps(), vec![true, false, false, false, true]);
    }
}
