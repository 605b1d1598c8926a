//! Batched, fault-isolated fan-out over artifacts.
//!
//! [`run_batched`] partitions its input into contiguous batches of at most
//! `batch_size` items, spawns one task per item, and joins every task of a
//! batch before the next batch starts. A task that errors, panics, exceeds
//! the per-task timeout, or is still running at the batch deadline is
//! recorded as an [`ArtifactFailure`]; it never affects its siblings.
//!
//! ```text
//! batch 1: [a b c d] ──spawn──▶ join a, join b, join c, join d
//!                                                   │ barrier
//! batch 2: [e f]     ──spawn──▶ join e, join f ◀────┘
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::{ArtifactError, Stage};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Per-item unit of work run inside a spawned task.
#[async_trait]
pub trait ArtifactWorker<T: Send + 'static>: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Identity used in logs and failure reports.
    fn label(&self, item: &T) -> String;

    /// Run the full per-item pipeline, recording progress in `stage`.
    async fn process(&self, item: T, stage: &StageCell) -> Result<Self::Output, ArtifactError>;
}

/// Shared view of one task's current [`Stage`], readable after the task
/// has been cancelled.
#[derive(Debug, Clone, Default)]
pub struct StageCell(Arc<AtomicU8>);

impl StageCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, stage: Stage) {
        self.0.store(stage_to_u8(stage), Ordering::Release);
    }

    pub fn get(&self) -> Stage {
        stage_from_u8(self.0.load(Ordering::Acquire))
    }
}

fn stage_to_u8(stage: Stage) -> u8 {
    match stage {
        Stage::Pending => 0,
        Stage::Extracting => 1,
        Stage::Embedding => 2,
        Stage::Assembling => 3,
        Stage::Ingesting => 4,
        Stage::Committed => 5,
    }
}

fn stage_from_u8(value: u8) -> Stage {
    match value {
        1 => Stage::Extracting,
        2 => Stage::Embedding,
        3 => Stage::Assembling,
        4 => Stage::Ingesting,
        5 => Stage::Committed,
        _ => Stage::Pending,
    }
}

/// Time bounds applied to every batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub task_timeout: Duration,
    /// Unfinished tasks are aborted once this much time has passed since
    /// the batch started.
    pub batch_deadline: Option<Duration>,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(300),
            batch_deadline: None,
        }
    }
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// 1-based batch number.
    pub index: usize,
    pub attempted: usize,
    pub committed: usize,
    pub failed: usize,
}

/// Terminal `Failed` state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    pub label: String,
    pub stage: Stage,
    pub kind: &'static str,
    pub message: String,
}

/// Aggregated result of a [`run_batched`] call.
#[derive(Debug)]
pub struct OrchestrationSummary<O> {
    pub batches: Vec<BatchResult>,
    /// Successful outputs, in batch order then submission order.
    pub committed: Vec<O>,
    pub failures: Vec<ArtifactFailure>,
}

impl<O> OrchestrationSummary<O> {
    pub fn attempted(&self) -> usize {
        self.batches.iter().map(|b| b.attempted).sum()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Split `items` into contiguous batches of at most `batch_size`.
/// A size of 0 is treated as 1.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

struct Task<O> {
    label: String,
    stage: StageCell,
    handle: JoinHandle<Result<O, ArtifactError>>,
}

/// Run `worker` over `items` in sequential batches with a join barrier.
pub async fn run_batched<T, W>(
    pipeline: &str,
    items: Vec<T>,
    batch_size: usize,
    worker: Arc<W>,
    limits: BatchLimits,
    progress: &dyn ProgressReporter,
) -> OrchestrationSummary<W::Output>
where
    T: Send + 'static,
    W: ArtifactWorker<T>,
{
    let batches = partition(items, batch_size);
    let total = batches.len();
    let mut summary = OrchestrationSummary {
        batches: Vec::with_capacity(total),
        committed: Vec::new(),
        failures: Vec::new(),
    };

    for (i, batch) in batches.into_iter().enumerate() {
        let index = i + 1;
        info!(pipeline, batch = index, batches = total, size = batch.len(), "batch started");
        progress.report(ProgressEvent::BatchStarted {
            pipeline: pipeline.to_string(),
            batch: index,
            batches: total,
            size: batch.len(),
        });

        let deadline = limits.batch_deadline.map(|d| Instant::now() + d);
        let tasks: Vec<Task<W::Output>> = batch
            .into_iter()
            .map(|item| spawn_task(&worker, item, limits.task_timeout))
            .collect();

        let mut result = BatchResult {
            index,
            attempted: tasks.len(),
            committed: 0,
            failed: 0,
        };

        // Barrier: every handle is resolved before the next batch is spawned.
        for task in tasks {
            match join_task(task.handle, deadline, limits.batch_deadline, &task.stage).await {
                Ok(output) => {
                    result.committed += 1;
                    summary.committed.push(output);
                }
                Err(err) => {
                    let stage = match err {
                        ArtifactError::Aborted(_) => task.stage.get(),
                        _ => err.stage(),
                    };
                    error!(
                        pipeline,
                        artifact = %task.label,
                        stage = %stage,
                        kind = err.kind(),
                        error = %err,
                        "artifact failed"
                    );
                    result.failed += 1;
                    summary.failures.push(ArtifactFailure {
                        label: task.label,
                        stage,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            pipeline,
            batch = index,
            committed = result.committed,
            failed = result.failed,
            "batch finished"
        );
        progress.report(ProgressEvent::BatchFinished {
            pipeline: pipeline.to_string(),
            batch: index,
            batches: total,
            committed: result.committed,
            failed: result.failed,
        });
        summary.batches.push(result);
    }

    summary
}

fn spawn_task<T, W>(worker: &Arc<W>, item: T, task_timeout: Duration) -> Task<W::Output>
where
    T: Send + 'static,
    W: ArtifactWorker<T>,
{
    let label = worker.label(&item);
    let stage = StageCell::new();
    let cell = stage.clone();
    let worker = Arc::clone(worker);

    let handle = tokio::spawn(async move {
        match tokio::time::timeout(task_timeout, worker.process(item, &cell)).await {
            Ok(result) => result,
            Err(_) => Err(ArtifactError::Timeout(task_timeout, cell.get())),
        }
    });

    Task {
        label,
        stage,
        handle,
    }
}

async fn join_task<O>(
    mut handle: JoinHandle<Result<O, ArtifactError>>,
    deadline: Option<Instant>,
    budget: Option<Duration>,
    stage: &StageCell,
) -> Result<O, ArtifactError> {
    let joined = match deadline {
        Some(at) => match tokio::time::timeout_at(at, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                // Wait for cancellation so nothing outlives the barrier.
                let _ = handle.await;
                return Err(ArtifactError::Timeout(budget.unwrap_or_default(), stage.get()));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ArtifactError::Aborted(panic_message(e.into_panic()))),
        Err(e) => Err(ArtifactError::Aborted(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssemblyError;
    use crate::progress::NoProgress;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Test worker: doubles its input, with scripted misbehaviour.
    #[derive(Default)]
    struct ScriptedWorker {
        fail_on: Option<u32>,
        panic_on: Option<u32>,
        sleep_on: Option<(u32, Duration)>,
        finished: AtomicUsize,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactWorker<u32> for ScriptedWorker {
        type Output = u32;

        fn label(&self, item: &u32) -> String {
            format!("item_{}", item)
        }

        async fn process(&self, item: u32, stage: &StageCell) -> Result<u32, ArtifactError> {
            self.log.lock().unwrap().push(format!("start {}", item));
            stage.set(Stage::Extracting);
            tokio::time::sleep(Duration::from_millis(10 * u64::from(item % 3 + 1))).await;

            if let Some((n, d)) = self.sleep_on {
                if n == item {
                    stage.set(Stage::Embedding);
                    tokio::time::sleep(d).await;
                }
            }
            if self.panic_on == Some(item) {
                panic!("boom on {}", item);
            }
            if self.fail_on == Some(item) {
                return Err(AssemblyError {
                    file_name: format!("item_{}", item),
                    kind: "text",
                }
                .into());
            }

            stage.set(Stage::Committed);
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("end {}", item));
            Ok(item * 2)
        }
    }

    async fn run(worker: &Arc<ScriptedWorker>, n: u32, size: usize, limits: BatchLimits) -> OrchestrationSummary<u32> {
        run_batched("test", (1..=n).collect(), size, Arc::clone(worker), limits, &NoProgress).await
    }

    #[test]
    fn partition_preserves_count_and_order() {
        for size in 1..=7 {
            let items: Vec<u32> = (0..20).collect();
            let batches = partition(items.clone(), size);
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
            assert_eq!(batches.concat(), items);
        }
        assert_eq!(partition(vec![1, 2, 3], 0), vec![vec![1], vec![2], vec![3]]);
        assert!(partition(Vec::<u32>::new(), 4).is_empty());
        assert_eq!(partition(vec![1, 2, 3, 4, 5], 2).last().unwrap(), &vec![5]);
    }

    #[tokio::test]
    async fn all_succeed() {
        let worker = Arc::new(ScriptedWorker::default());
        let summary = run(&worker, 5, 2, BatchLimits::default()).await;

        assert_eq!(summary.attempted(), 5);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.committed, vec![2, 4, 6, 8, 10]);
        let sizes: Vec<usize> = summary.batches.iter().map(|b| b.attempted).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn one_failure_is_isolated_at_any_position() {
        for k in 1..=4 {
            let worker = Arc::new(ScriptedWorker {
                fail_on: Some(k),
                ..Default::default()
            });
            let summary = run(&worker, 4, 4, BatchLimits::default()).await;

            assert_eq!(summary.failed(), 1, "failing item {}", k);
            assert_eq!(summary.committed.len(), 3);
            let failure = &summary.failures[0];
            assert_eq!(failure.label, format!("item_{}", k));
            assert_eq!(failure.stage, Stage::Assembling);
            assert_eq!(failure.kind, "assembly_error");
        }
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let worker = Arc::new(ScriptedWorker {
            panic_on: Some(2),
            ..Default::default()
        });
        let summary = run(&worker, 3, 3, BatchLimits::default()).await;

        assert_eq!(summary.committed, vec![2, 6]);
        assert_eq!(summary.failed(), 1);
        let failure = &summary.failures[0];
        assert_eq!(failure.kind, "aborted");
        assert_eq!(failure.stage, Stage::Extracting);
        assert!(failure.message.contains("boom on 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn task_timeout_reports_stage() {
        let worker = Arc::new(ScriptedWorker {
            sleep_on: Some((1, Duration::from_secs(60))),
            ..Default::default()
        });
        let limits = BatchLimits {
            task_timeout: Duration::from_secs(5),
            batch_deadline: None,
        };
        let summary = run(&worker, 2, 2, limits).await;

        assert_eq!(summary.committed, vec![4]);
        let failure = &summary.failures[0];
        assert_eq!(failure.label, "item_1");
        assert_eq!(failure.kind, "timeout");
        assert_eq!(failure.stage, Stage::Embedding);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_deadline_aborts_stragglers() {
        let worker = Arc::new(ScriptedWorker {
            sleep_on: Some((2, Duration::from_secs(60))),
            ..Default::default()
        });
        let limits = BatchLimits {
            task_timeout: Duration::from_secs(600),
            batch_deadline: Some(Duration::from_secs(3)),
        };
        let summary = run(&worker, 4, 2, limits).await;

        assert_eq!(summary.committed, vec![2, 6, 8]);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].label, "item_2");
        assert_eq!(summary.failures[0].stage, Stage::Embedding);
        assert_eq!(worker.finished.load(Ordering::SeqCst), 3);

        // The aborted task never reaches its end marker.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!worker.log.lock().unwrap().contains(&"end 2".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batches_are_separated_by_a_barrier() {
        let worker = Arc::new(ScriptedWorker::default());
        let summary = run(&worker, 6, 2, BatchLimits::default()).await;
        assert_eq!(summary.committed.len(), 6);

        let log = worker.log.lock().unwrap().clone();
        let pos = |entry: String| log.iter().position(|e| *e == entry).unwrap();
        for batch in [[1u32, 2], [3, 4], [5, 6]].windows(2) {
            let last_end = batch[0].iter().map(|i| pos(format!("end {}", i))).max().unwrap();
            let first_start = batch[1].iter().map(|i| pos(format!("start {}", i))).min().unwrap();
            assert!(last_end < first_start, "log: {:?}", log);
        }
    }

    #[test]
    fn stage_cell_round_trips() {
        let cell = StageCell::new();
        assert_eq!(cell.get(), Stage::Pending);
        for stage in [
            Stage::Extracting,
            Stage::Embedding,
            Stage::Assembling,
            Stage::Ingesting,
            Stage::Committed,
        ] {
            cell.set(stage);
            assert_eq!(cell.get(), stage);
        }
    }
}
