//! Per-sample allele counting at a single column.
use counter::Counter;
use fxhash::FxHashMap;

/// Base classes, in count order.
pub const BASE_NAMES: [&str; 5] = ["A", "C", "G", "T", "N"];

/// Counts of A, C, G, T and N.
pub type BaseCounts = [u32; 5];

/// Column index of a base; anything other than A/C/G/T counts as N.
pub fn base_index(base: u8) -> usize {
    match base.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => 4,
    }
}

/// Sum of a count vector.
pub fn depth(counts: &BaseCounts) -> u32 {
    counts.iter().sum()
}

/// Collects the reads covering one column, directly or collapsed by UMI.
pub struct ColumnCounter {
    direct: Vec<BaseCounts>,
    by_umi: FxHashMap<(usize, Vec<u8>), Counter<usize>>,
}

impl ColumnCounter {
    /// New empty counter for `n_samples` samples.
    pub fn new(n_samples: usize) -> Self {
        ColumnCounter {
            direct: vec![[0; 5]; n_samples],
            by_umi: FxHashMap::default(),
        }
    }

    /// Record one read's base. Reads carrying a UMI vote for their molecule
    /// instead of counting directly.
    pub fn add(&mut self, sample: usize, umi: Option<&[u8]>, base: u8) {
        let idx = base_index(base);
        match umi {
            Some(umi) => {
                *self
                    .by_umi
                    .entry((sample, umi.to_vec()))
                    .or_default()
                    .entry(idx)
                    .or_insert(0) += 1;
            }
            None => self.direct[sample][idx] += 1,
        }
    }

    /// Final per-sample counts; each UMI contributes its consensus base once.
    pub fn finish(self) -> Vec<BaseCounts> {
        let ColumnCounter {
            mut direct,
            by_umi,
        } = self;
        for ((sample, _umi), votes) in by_umi {
            if let Some(idx) = umi_consensus(&votes) {
                direct[sample][idx] += 1;
            }
        }
        direct
    }
}

/// The strict-majority base of a molecule, `None` on a tie.
fn umi_consensus(votes: &Counter<usize>) -> Option<usize> {
    match votes.most_common_ordered().as_slice() {
        [] => None,
        [(idx, _)] => Some(*idx),
        [(idx, top), (_, second), ..] => (top > second).then_some(*idx),
    }
}

/// Sum counts over samples.
pub fn aggregate(samples: &[BaseCounts]) -> BaseCounts {
    samples.iter().fold([0; 5], |mut acc, counts| {
        for (a, c) in acc.iter_mut().zip(counts) {
            *a += c;
        }
        acc
    })
}

/// Most and second most frequent of A/C/G/T. Ties go to the earlier base.
pub fn major_minor(total: &BaseCounts) -> (usize, usize) {
    let mut order = [0usize, 1, 2, 3];
    // stable sort keeps ACGT order among equal counts
    order.sort_by(|&a, &b| total[b].cmp(&total[a]));
    (order[0], order[1])
}

/// True if a site with aggregated `total` and the given alt column should be
/// reported.
pub fn passes_filters(total: &BaseCounts, alt_idx: usize, min_count: u32, min_maf: f64) -> bool {
    let n = depth(total);
    if n == 0 || n < min_count {
        return false;
    }
    f64::from(total[alt_idx]) / f64::from(n) >= min_maf
}
