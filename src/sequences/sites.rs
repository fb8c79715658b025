use crate::error::{Error, Result};
use crate::sequences::SequencePosition;

/// Alignment columns at variable positions of a genomic region. Coordinates are 0-based and
/// end-exclusive internally, file coordinates are 1-based and end-inclusive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sites {
    pub chrom: String,
    pub start_coord: usize,
    pub end_coord: usize,
    pub names: Vec<String>,
    positions: Vec<SequencePosition>,
    cols: Vec<Vec<u8>>,
}

impl Sites {
    pub fn new(
        chrom: impl Into<String>,
        start_coord: usize,
        end_coord: usize,
        names: Vec<String>,
    ) -> Self {
        Self {
            chrom: chrom.into(),
            start_coord,
            end_coord,
            names,
            positions: Vec::new(),
            cols: Vec::new(),
        }
    }

    /// Create sites for a region given in file coordinates `[start, end]`, 1-based.
    pub fn from_file_coords(
        chrom: impl Into<String>,
        start: usize,
        end: usize,
        names: Vec<String>,
    ) -> Result<Self> {
        if start == 0 || end < start {
            return Err(Error::precondition(format!("invalid file region {start}-{end}")));
        }
        Ok(Self::new(chrom, start - 1, end, names))
    }

    /// The region in file coordinates
    pub fn to_file_coords(&self) -> (usize, usize) {
        (self.start_coord + 1, self.end_coord)
    }

    /// Add a column at a 0-based position. Positions must increase.
    pub fn append(&mut self, position: usize, col: Vec<u8>) -> Result<()> {
        if col.len() != self.names.len() {
            return Err(Error::precondition(format!(
                "column at {position} has {} bases for {} sequences",
                col.len(),
                self.names.len()
            )));
        }
        if position < self.start_coord || position >= self.end_coord {
            return Err(Error::precondition(format!(
                "site {position} is outside [{}, {})",
                self.start_coord, self.end_coord
            )));
        }
        if self.positions.last().map_or(false, |last| last.get() >= position) {
            return Err(Error::precondition(format!("site {position} is out of order")));
        }
        self.positions.push(SequencePosition::from_usize(position));
        self.cols.push(col);
        Ok(())
    }

    /// Add a column at a 1-based file position.
    pub fn append_file_position(&mut self, position: usize, col: Vec<u8>) -> Result<()> {
        let position = position
            .checked_sub(1)
            .ok_or_else(|| Error::precondition("file positions start at 1"))?;
        self.append(position, col)
    }

    pub fn length(&self) -> usize {
        self.end_coord - self.start_coord
    }

    pub fn get_num_sites(&self) -> usize {
        self.positions.len()
    }

    pub fn get_num_seqs(&self) -> usize {
        self.names.len()
    }

    pub fn positions(&self) -> &[SequencePosition] {
        &self.positions
    }

    pub fn col(&self, index: usize) -> Option<&[u8]> {
        self.cols.get(index).map(Vec::as_slice)
    }

    /// Whether two unmasked bases of a column differ. Base likelihoods are not considered.
    pub fn is_snp(&self, index: usize) -> bool {
        let Some(col) = self.cols.get(index) else {
            return false;
        };
        let mut called = col.iter().filter(|b| **b != b'N');
        match called.next() {
            Some(first) => called.any(|b| b != first),
            None => false,
        }
    }
}

/// Direction to round a coordinate that falls between two compressed columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Round {
    Down,
    Up,
}

/// Correspondence between coordinates of an alignment and of its compressed version, which
/// keeps only selected columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SitesMapping {
    old_start: usize,
    old_end: usize,
    new_start: usize,
    new_end: usize,
    nsites: usize,
    seqlen: usize,
    /// original position of every variant site
    old_sites: Vec<usize>,
    /// compressed position of every variant site
    new_sites: Vec<usize>,
    /// original position of every kept column
    all_sites: Vec<usize>,
}

impl SitesMapping {
    /// Mapping for `sites` without any kept columns yet.
    pub fn init(sites: &Sites) -> Self {
        Self {
            old_start: sites.start_coord,
            old_end: sites.end_coord,
            nsites: sites.get_num_sites(),
            seqlen: sites.length(),
            ..Self::default()
        }
    }

    /// Mapping keeping the columns at `all_sites`, which must contain every variant site.
    pub fn new(sites: &Sites, all_sites: Vec<usize>) -> Result<Self> {
        let mut mapping = Self::init(sites);
        if all_sites.windows(2).any(|w| w[0] >= w[1])
            || all_sites
                .iter()
                .any(|p| *p < mapping.old_start || *p >= mapping.old_end)
        {
            return Err(Error::precondition(
                "kept columns must be increasing and inside the region",
            ));
        }

        for position in sites.positions() {
            let index = all_sites
                .binary_search(&position.get())
                .map_err(|_| Error::precondition(format!("variant site {position} is not kept")))?;
            mapping.old_sites.push(position.get());
            mapping.new_sites.push(index);
        }
        mapping.new_start = 0;
        mapping.new_end = all_sites.len();
        mapping.all_sites = all_sites;
        Ok(mapping)
    }

    pub fn num_sites(&self) -> usize {
        self.nsites
    }

    pub fn uncompressed_length(&self) -> usize {
        self.seqlen
    }

    pub fn compressed_length(&self) -> usize {
        self.new_end - self.new_start
    }

    pub fn new_sites(&self) -> &[usize] {
        &self.new_sites
    }

    /// Compressed coordinate of an original position. Positions between kept columns round to
    /// the column below or above.
    pub fn compress(&self, pos: usize, round: Round) -> usize {
        match self.all_sites.iter().position(|site| *site >= pos) {
            Some(index) if round == Round::Up || index == 0 || self.all_sites[index] == pos => {
                index
            }
            Some(index) => index - 1,
            None => self.all_sites.len().saturating_sub(1),
        }
    }

    pub fn uncompress(&self, pos: usize) -> Option<usize> {
        self.all_sites.get(pos).copied()
    }

    /// Compress a series of block lengths in original coordinates.
    pub fn compress_blocks(&self, blocks: &[usize]) -> Vec<usize> {
        let mut compressed = Vec::with_capacity(blocks.len());
        let mut cur = self.new_start;
        let mut end = self.old_start;
        for block in blocks {
            end += block;
            if end < self.old_end {
                let mut next = cur;
                while next < self.new_end && self.all_sites[next] < end {
                    next += 1;
                }
                compressed.push(next - cur);
                cur = next;
            } else {
                compressed.push(self.new_end - cur);
            }
        }
        compressed
    }

    /// Uncompress a series of block lengths. Block ends are placed halfway between the kept
    /// columns they fall between.
    pub fn uncompress_blocks(&self, blocks: &[usize]) -> Vec<usize> {
        let mut uncompressed = Vec::with_capacity(blocks.len());
        let mut cur = self.old_start;
        let mut end = self.new_start;
        for block in blocks {
            end += block;
            if end < self.new_end && end > 0 {
                let next = (self.all_sites[end - 1] + 1 + self.all_sites[end]) / 2;
                uncompressed.push(next - cur);
                cur = next;
            } else {
                uncompressed.push(self.old_end - cur);
            }
        }
        uncompressed
    }
}
