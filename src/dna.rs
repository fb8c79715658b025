//! Nucleotide encoding shared by the sequence collaborators.

/// Number of distinct nucleotides
pub const NUM_BASES: usize = 4;

/// Code for characters that are not a nucleotide
pub const UNKNOWN_BASE: i8 = -1;

const fn build_dna2int() -> [i8; 256] {
    let mut table = [UNKNOWN_BASE; 256];
    table[b'A' as usize] = 0;
    table[b'C' as usize] = 1;
    table[b'G' as usize] = 2;
    table[b'T' as usize] = 3;
    table[b'a' as usize] = 0;
    table[b'c' as usize] = 1;
    table[b'g' as usize] = 2;
    table[b't' as usize] = 3;
    table
}

/// Maps every byte to its nucleotide index (`A=0, C=1, G=2, T=3`) or [`UNKNOWN_BASE`]
pub static DNA2INT: [i8; 256] = build_dna2int();

/// Inverse of [`DNA2INT`] for the four nucleotides
pub static INT2DNA: [u8; NUM_BASES] = *b"ACGT";

/// Nucleotide index of a character, `None` for gaps, `N` and other ambiguity codes.
#[inline]
pub fn dna_to_int(base: u8) -> Option<usize> {
    match DNA2INT[base as usize] {
        UNKNOWN_BASE => None,
        code => Some(code as usize),
    }
}

#[inline]
pub fn int_to_dna(code: usize) -> Option<u8> {
    INT2DNA.get(code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(dna_to_int(b'g'), Some(2));
        assert_eq!(dna_to_int(b'T'), Some(3));
        assert_eq!(dna_to_int(b'N'), None);
        assert_eq!(dna_to_int(b'-'), None);
        for code in 0..NUM_BASES {
            assert_eq!(dna_to_int(int_to_dna(code).unwrap()), Some(code));
        }
        assert_eq!(int_to_dna(4), None);
    }
}
