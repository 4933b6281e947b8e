//! Running tasks on the worker pool and collecting their partial outputs.
use crate::job::{JobDescriptor, Mode};
use crate::partition::{PartitionKey, Task};
use anyhow::Result;
use cell_pileup::{Partition, PileupEngine, PileupRequest};
use log::{debug, warn};
use par_proc::{process_in_order, Proc};
use std::fs;
use std::path::{Path, PathBuf};

/// A task failed and the job was abandoned.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("task {task} ({partition}) failed: {reason}")]
pub struct WorkerError {
    pub task: usize,
    pub partition: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Failed(String),
}

/// Outcome of one dispatched task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    pub task_id: usize,
    pub output_path: PathBuf,
    pub status: TaskStatus,
}

/// Runs tasks against one shared, read-only job.
struct TaskRunner<'a, E> {
    job: &'a JobDescriptor,
    engine: &'a E,
}

fn resolve<'a>(job: &'a JobDescriptor, key: &'a PartitionKey) -> Result<Partition<'a>, String> {
    match (key, job.mode()) {
        (PartitionKey::Chrom(chrom), _) => Ok(Partition::Chrom(chrom)),
        (PartitionKey::Range(range), Mode::Targeted(variants)) => {
            if range.end > variants.len() {
                return Err(format!(
                    "range ends at {} past {} candidates",
                    range.end,
                    variants.len()
                ));
            }
            Ok(Partition::Variants(variants.slice(range.clone())))
        }
        (PartitionKey::Range(_), Mode::WholeGenome(_)) => {
            Err("candidate range given for a whole-genome job".to_string())
        }
    }
}

impl<'a, E: PileupEngine> Proc for TaskRunner<'a, E> {
    type Item = &'a Task;
    type Output = PartialResult;
    type Err = PartialResult;

    fn process(&mut self, task: &'a Task) -> Result<PartialResult, PartialResult> {
        debug!("task {}: starting {}", task.id, task.key);
        let outcome = resolve(self.job, &task.key).and_then(|partition| {
            self.engine
                .run(&PileupRequest {
                    alignments: self.job.sam_file(),
                    barcodes: self.job.barcodes(),
                    out_path: &task.temp_path,
                    partition,
                    settings: self.job.settings(),
                })
                .map_err(|e| format!("{e:#}"))
        });
        let result = |status: TaskStatus| PartialResult {
            task_id: task.id,
            output_path: task.temp_path.clone(),
            status,
        };
        match outcome {
            Ok(()) => {
                debug!("task {}: done", task.id);
                Ok(result(TaskStatus::Success))
            }
            Err(reason) => {
                warn!("task {}: {} failed", task.id, task.key);
                Err(result(TaskStatus::Failed(reason)))
            }
        }
    }
}

/// Run `tasks` with at most `job.nproc()` at once. Returns the result of every
/// task that was dispatched, in task order. The first failure stops dispatch, so
/// tasks after it may be missing.
pub fn run_tasks<E: PileupEngine>(
    job: &JobDescriptor,
    engine: &E,
    tasks: &[Task],
) -> Result<Vec<PartialResult>> {
    let runners = (0..job.nproc())
        .map(|_| TaskRunner { job, engine })
        .collect();
    let slots = process_in_order(tasks.iter().collect(), runners)?;
    Ok(slots
        .into_iter()
        .flatten()
        .map(|r| match r {
            Ok(r) | Err(r) => r,
        })
        .collect())
}

/// Remove every temp output of `tasks` that exists.
pub fn remove_temp_outputs(tasks: &[Task]) {
    for task in tasks {
        if let Err(e) = remove_if_present(&task.temp_path) {
            warn!("unable to remove {}: {e}", task.temp_path.display());
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        r => r,
    }
}

/// The partial outputs to merge, in task order. If any task failed, every temp
/// output is removed and the first failure in task order is returned.
pub fn collect(tasks: &[Task], results: Vec<PartialResult>) -> Result<Vec<PathBuf>, WorkerError> {
    let failed = results.iter().find_map(|r| match &r.status {
        TaskStatus::Failed(reason) => Some((r.task_id, reason.clone())),
        TaskStatus::Success => None,
    });
    if let Some((task, reason)) = failed {
        remove_temp_outputs(tasks);
        let partition = tasks
            .iter()
            .find(|t| t.id == task)
            .map(|t| t.key.to_string())
            .unwrap_or_default();
        return Err(WorkerError {
            task,
            partition,
            reason,
        });
    }
    if results.len() != tasks.len() {
        remove_temp_outputs(tasks);
        return Err(WorkerError {
            task: results.len(),
            partition: tasks
                .get(results.len())
                .map(|t| t.key.to_string())
                .unwrap_or_default(),
            reason: "task was never run".to_string(),
        });
    }
    Ok(results.into_iter().map(|r| r.output_path).collect())
}
