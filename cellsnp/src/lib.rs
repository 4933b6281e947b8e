//! Per-cell pileup of a whole genome or a list of candidate variants.
//!
//! A job is split into disjoint tasks, which run on a bounded worker pool and each
//! write a partial VCF. The partials are then concatenated, in task order, into one
//! output.
use anyhow::Result;
use cell_pileup::PileupEngine;
use log::{debug, info};
use std::time::{Duration, Instant};

pub mod dispatch;
pub mod job;
pub mod merge;
pub mod partition;

pub use dispatch::{PartialResult, TaskStatus, WorkerError};
pub use job::{ConfigError, JobArgs, JobDescriptor, Mode};
pub use merge::MergeError;
pub use partition::{PartitionKey, Task};

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    /// Number of tasks the job was split into.
    pub tasks: usize,
    /// Records in the final output.
    pub records: usize,
    /// Wall time of the whole job.
    pub elapsed: Duration,
}

/// Run `job` with `engine`, leaving only the merged output behind.
///
/// Fails with a [`WorkerError`] if any task fails, in which case no output is
/// written and every partial is removed, or with a [`MergeError`] if the partials
/// cannot be merged, in which case they are kept.
pub fn run_job<E: PileupEngine>(job: &JobDescriptor, engine: &E) -> Result<JobSummary> {
    let start = Instant::now();
    let tasks = partition::make_tasks(job);
    info!(
        "running {} tasks on {} workers",
        tasks.len(),
        job.nproc().min(tasks.len().max(1))
    );

    let results = match dispatch::run_tasks(job, engine, &tasks) {
        Ok(results) => results,
        Err(e) => {
            dispatch::remove_temp_outputs(&tasks);
            return Err(e);
        }
    };
    let partials = dispatch::collect(&tasks, results)?;

    info!("merging {} partial outputs", partials.len());
    let records = merge::merge_partials(job.out_file(), &partials)?;
    debug!("{records} records written to {}", job.out_file().display());

    Ok(JobSummary {
        tasks: tasks.len(),
        records,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_pileup::{Partition, PileupRequest};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::thread;

    const HEADER: &str = "##fileformat=VCFv4.2\n\
                          #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tpooled\n";

    /// Writes one record per chromosome, or one per candidate variant.
    #[derive(Default)]
    struct MockEngine {
        /// Partition label -> sleep before writing.
        delays: HashMap<String, Duration>,
        /// Partition label that fails after writing its header.
        fail_on: Option<String>,
        /// Partition label that panics.
        panic_on: Option<String>,
        finished: Mutex<Vec<String>>,
        temp_paths: Mutex<Vec<PathBuf>>,
    }

    fn label(partition: &Partition<'_>) -> String {
        match partition {
            Partition::Chrom(chrom) => chrom.to_string(),
            Partition::Variants(variants) => match variants.iter().next() {
                Some(v) => format!("{}:{}", v.chrom, v.pos),
                None => "empty".to_string(),
            },
        }
    }

    impl PileupEngine for MockEngine {
        fn run(&self, request: &PileupRequest<'_>) -> Result<()> {
            let label = label(&request.partition);
            if let Some(delay) = self.delays.get(&label) {
                thread::sleep(*delay);
            }
            if self.panic_on.as_deref() == Some(label.as_str()) {
                panic!("engine panicked on {label}");
            }
            self.temp_paths
                .lock()
                .unwrap()
                .push(request.out_path.to_path_buf());
            let mut out = fs::File::create(request.out_path)?;
            out.write_all(HEADER.as_bytes())?;
            if self.fail_on.as_deref() == Some(label.as_str()) {
                anyhow::bail!("no reads for {label}");
            }
            match request.partition {
                Partition::Chrom(chrom) => writeln!(out, "{chrom}\t1")?,
                Partition::Variants(variants) => {
                    for v in variants.iter() {
                        writeln!(out, "{}\t{}", v.chrom, v.pos)?;
                    }
                }
            }
            self.finished.lock().unwrap().push(label);
            Ok(())
        }
    }

    fn build_job(dir: &Path, extra: &[&str]) -> JobDescriptor {
        let sam = dir.join("reads.bam");
        fs::write(&sam, b"").unwrap();
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

    fn body(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(ToString::to_string)
            .collect()
    }

    /// Files in `dir` other than the fake alignment file.
    fn leftovers(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != "reads.bam" && n != "candidates.vcf")
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_reverse_completion_merges_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let job = build_job(dir.path(), &["--chrom", "1,2,3", "-p", "3"]);
        let engine = MockEngine {
            delays: [("1", 300), ("2", 150)]
                .into_iter()
                .map(|(c, ms)| (c.to_string(), Duration::from_millis(ms)))
                .collect(),
            ..Default::default()
        };

        let summary = run_job(&job, &engine).unwrap();
        assert_eq!(summary.tasks, 3);
        assert_eq!(summary.records, 3);
        assert_eq!(*engine.finished.lock().unwrap(), ["3", "2", "1"]);
        assert_eq!(body(job.out_file()), ["1\t1", "2\t1", "3\t1"]);
        let text = fs::read_to_string(job.out_file()).unwrap();
        assert_eq!(text.matches("#CHROM").count(), 1);
    }

    #[test]
    fn test_two_chroms_two_workers() {
        let dir = tempfile::tempdir().unwrap();
        let job = build_job(dir.path(), &["--chrom", "X,1", "-p", "2"]);
        let engine = MockEngine::default();

        run_job(&job, &engine).unwrap();
        let mut temp_paths = engine.temp_paths.lock().unwrap().clone();
        temp_paths.sort();
        assert_eq!(
            temp_paths,
            [dir.path().join("out.vcf.temp_1_"), dir.path().join("out.vcf.temp_X_")]
        );
        assert_eq!(leftovers(dir.path()), ["out.vcf"]);
        assert_eq!(body(job.out_file()), ["X\t1", "1\t1"]);
    }

    fn check_failed_task(nproc: &str) {
        let dir = tempfile::tempdir().unwrap();
        let job = build_job(dir.path(), &["--chrom", "1,2,3,4", "-p", nproc]);
        let engine = MockEngine {
            fail_on: Some("3".to_string()),
            ..Default::default()
        };

        let err = run_job(&job, &engine).unwrap_err();
        let err = err.downcast::<WorkerError>().unwrap();
        assert_eq!(err.task, 2);
        assert_eq!(err.partition, "chromosome 3");
        assert!(err.reason.contains("no reads for 3"));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_task_parallel() {
        check_failed_task("4");
    }

    #[test]
    fn test_failed_task_sequential() {
        check_failed_task("1");
    }

    #[test]
    fn test_sequential_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = build_job(dir.path(), &["--chrom", "1,2,3,4"]);
        let engine = MockEngine {
            fail_on: Some("2".to_string()),
            ..Default::default()
        };

        assert!(run_job(&job, &engine).is_err());
        assert_eq!(*engine.finished.lock().unwrap(), ["1"]);
        assert!(leftovers(dir.path()).is_empty());
    }

    fn check_engine_panic(nproc: &str) {
        let dir = tempfile::tempdir().unwrap();
        let job = build_job(dir.path(), &["--chrom", "1,2,3", "-p", nproc]);
        let engine = MockEngine {
            panic_on: Some("2".to_string()),
            ..Default::default()
        };

        let err = run_job(&job, &engine).unwrap_err();
        assert!(err.to_string().contains("engine panicked on 2"));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_engine_panic_cleans_up() {
        check_engine_panic("2");
    }

    #[test]
    fn test_engine_panic_cleans_up_sequential() {
        check_engine_panic("1");
    }

    #[test]
    fn test_targeted_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let vcf = dir.path().join("candidates.vcf");
        fs::write(
            &vcf,
            "##fileformat=VCFv4.2\n##contig=<ID=1,length=1000>\n##contig=<ID=2,length=1000>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             2\t50\t.\tA\tG\t.\t.\t.\n1\t10\t.\tA\tG\t.\t.\t.\n1\t40\t.\tC\tT\t.\t.\t.\n\
             1\t20\t.\tG\tA\t.\t.\t.\n2\t5\t.\tT\tC\t.\t.\t.\n",
        )
        .unwrap();
        let job = build_job(dir.path(), &["-R", &vcf.display().to_string(), "-p", "2"]);
        // the first range finishes last
        let engine = MockEngine {
            delays: [("2:50".to_string(), Duration::from_millis(200))]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        let summary = run_job(&job, &engine).unwrap();
        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.records, 5);
        assert_eq!(*engine.finished.lock().unwrap(), ["1:40", "2:50"]);
        assert_eq!(body(job.out_file()), ["2\t50", "1\t10", "1\t40", "1\t20", "2\t5"]);
        assert_eq!(leftovers(dir.path()), ["out.vcf"]);
    }

    #[test]
    fn test_fewer_candidates_than_workers() {
        let dir = tempfile::tempdir().unwrap();
        let vcf = dir.path().join("candidates.vcf");
        fs::write(
            &vcf,
            "##fileformat=VCFv4.2\n##contig=<ID=1,length=1000>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             1\t10\t.\tA\tG\t.\t.\t.\n1\t20\t.\tC\tT\t.\t.\t.\n",
        )
        .unwrap();
        let job = build_job(dir.path(), &["-R", &vcf.display().to_string(), "-p", "5"]);
        let engine = MockEngine::default();

        let summary = run_job(&job, &engine).unwrap();
        assert_eq!(summary.tasks, 5);
        assert_eq!(summary.records, 2);
        assert_eq!(engine.temp_paths.lock().unwrap().len(), 5);
        assert_eq!(body(job.out_file()), ["1\t10", "1\t20"]);
        assert_eq!(leftovers(dir.path()), ["out.vcf"]);
    }
}
