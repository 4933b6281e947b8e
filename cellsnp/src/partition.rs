//! Splitting a job into disjoint tasks.
use crate::job::{JobDescriptor, Mode};
use std::ffi::OsString;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// The unit of work a task owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionKey {
    /// One whole chromosome.
    Chrom(String),
    /// Candidate variants `[lo, hi)`.
    Range(Range<usize>),
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Chrom(chrom) => write!(f, "chromosome {chrom}"),
            PartitionKey::Range(r) => write!(f, "candidates [{}, {})", r.start, r.end),
        }
    }
}

/// One partition of a job and the partial output it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: usize,
    pub key: PartitionKey,
    pub temp_path: PathBuf,
}

/// `<final>.temp_<key>_`
pub fn temp_path(final_path: &Path, key: &str) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(format!(".temp_{key}_"));
    PathBuf::from(name)
}

/// Split `[0, len)` into `n` consecutive ranges. All but the last hold
/// `len / n` indices; the last takes the remainder.
pub fn split_ranges(len: usize, n: usize) -> Vec<Range<usize>> {
    let n = n.max(1);
    let block = len / n;
    (0..n)
        .map(|i| {
            let lo = block * i;
            let hi = if i == n - 1 { len } else { lo + block };
            lo..hi
        })
        .collect()
}

/// Tasks for `job`, in output order.
pub fn make_tasks(job: &JobDescriptor) -> Vec<Task> {
    let out = job.out_file();
    match job.mode() {
        Mode::WholeGenome(chroms) => chroms
            .iter()
            .enumerate()
            .map(|(id, chrom)| Task {
                id,
                key: PartitionKey::Chrom(chrom.clone()),
                temp_path: temp_path(out, chrom),
            })
            .collect(),
        Mode::Targeted(variants) => split_ranges(variants.len(), job.nproc())
            .into_iter()
            .enumerate()
            .map(|(id, range)| Task {
                id,
                key: PartitionKey::Range(range),
                temp_path: temp_path(out, &id.to_string()),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobArgs;
    use clap::Parser;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn sizes(ranges: &[Range<usize>]) -> Vec<usize> {
        ranges.iter().map(ExactSizeIterator::len).collect()
    }

    #[test]
    fn test_split_sizes() {
        assert_eq!(sizes(&split_ranges(10, 3)), [3, 3, 4]);
        assert_eq!(sizes(&split_ranges(2, 5)), [0, 0, 0, 0, 2]);
        assert_eq!(split_ranges(0, 2), [0..0, 0..0]);
        assert_eq!(split_ranges(7, 1), [0..7]);
    }

    proptest! {
        #[test]
        fn prop_ranges_cover_exactly_once(len in 0usize..5000, n in 1usize..64) {
            let ranges = split_ranges(len, n);
            prop_assert_eq!(ranges.len(), n);
            let mut next = 0;
            for r in &ranges {
                prop_assert_eq!(r.start, next);
                prop_assert!(r.end >= r.start);
                next = r.end;
            }
            prop_assert_eq!(next, len);
            let block = len / n;
            for r in &ranges[..n - 1] {
                prop_assert_eq!(r.len(), block);
            }
        }
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/data/out.vcf.gz"), "X"),
            PathBuf::from("/data/out.vcf.gz.temp_X_")
        );
        assert_eq!(temp_path(Path::new("out.vcf"), "3"), PathBuf::from("out.vcf.temp_3_"));
    }

    fn job(dir: &Path, extra: &[&str]) -> JobDescriptor {
        let sam = dir.join("reads.bam");
        std::fs::write(&sam, b"").unwrap();
        let mut argv = vec![
            "cellsnp".to_string(),
            "-s".to_string(),
            sam.display().to_string(),
            "-o".to_string(),
            dir.join("out.vcf").display().to_string(),
        ];
        argv.extend(extra.iter().map(ToString::to_string));
        JobDescriptor::build(JobArgs::try_parse_from(argv).unwrap()).unwrap()
    }

    #[test]
    fn test_chrom_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = make_tasks(&job(dir.path(), &["--chrom", "1,2,X", "-p", "8"]));
        let keys: Vec<_> = tasks.iter().map(|t| t.key.clone()).collect();
        assert_eq!(keys, ["1", "2", "X"].map(|c| PartitionKey::Chrom(c.to_string())));
        assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(tasks[2].temp_path, dir.path().join("out.vcf.temp_X_"));
    }

    #[test]
    fn test_default_chroms_have_distinct_temp_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = make_tasks(&job(dir.path(), &[]));
        assert_eq!(tasks.len(), 22);
        let unique: HashSet<_> = tasks.iter().map(|t| &t.temp_path).collect();
        assert_eq!(unique.len(), tasks.len());
    }

    #[test]
    fn test_range_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let vcf = dir.path().join("candidates.vcf");
        let mut text = String::from(
            "##fileformat=VCFv4.2\n##contig=<ID=1,length=1000>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n",
        );
        for pos in 1..=10 {
            text.push_str(&format!("1\t{pos}\t.\tA\tG\t.\t.\t.\n"));
        }
        std::fs::write(&vcf, text).unwrap();

        let tasks = make_tasks(&job(dir.path(), &["-R", &vcf.display().to_string(), "-p", "3"]));
        let keys: Vec<_> = tasks.iter().map(|t| t.key.clone()).collect();
        assert_eq!(keys, [0..3, 3..6, 6..10].map(PartitionKey::Range));
        assert_eq!(tasks[1].temp_path, dir.path().join("out.vcf.temp_1_"));
        assert_eq!(tasks[2].key.to_string(), "candidates [6, 10)");
    }
}
