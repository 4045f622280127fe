//! Runs N independent pipeline executions and folds them into a `BatchResult`.
//!
//! Sequential by default. With `concurrency_limit > 1`, a dispatcher starts
//! runs under a semaphore and a single aggregating context receives finished
//! runs over a channel, so batch counters are never shared between tasks.
//!
//! Stopping is cooperative: the flag is checked before each run starts, and
//! in-flight runs always finish.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::domain::{BatchResult, ErrorKind, ErrorRecord, RunResult};
use crate::obs;
use crate::orchestrator::PipelineOrchestrator;
use crate::session::{SessionLog, RUN_SCOPE};

/// Running totals handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub target: usize,
    pub passed: usize,
    pub failed: usize,
}

type ProgressCallback = Arc<dyn Fn(&RunResult, &BatchProgress) + Send + Sync>;

/// Cloneable handle that asks a batch to stop before its next run.
///
/// The flag is sticky: once stopped, later batches on the same runner start
/// no runs.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.flag.borrow()
    }
}

/// Drives a batch of runs over one shared orchestrator.
pub struct BatchRunner {
    orchestrator: Arc<PipelineOrchestrator>,
    config: BatchConfig,
    stop: StopHandle,
    progress: Option<ProgressCallback>,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, config: BatchConfig) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            orchestrator,
            config,
            stop: StopHandle { flag: Arc::new(tx) },
            progress: None,
        }
    }

    /// Observe each finished run. Called from the aggregating context only,
    /// never concurrently with itself.
    pub fn with_progress(
        mut self,
        callback: impl Fn(&RunResult, &BatchProgress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run the configured `target_runs_per_batch`.
    pub async fn run_target(&self) -> BatchResult {
        self.run(self.config.target_runs_per_batch).await
    }

    /// Run up to `n` pipelines. Always returns; per-run failures and panics
    /// become failed `RunResult`s. Fewer than `n` runs only after a stop.
    pub async fn run(&self, n: usize) -> BatchResult {
        let batch_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        let concurrency = self.config.concurrency_limit.max(1);

        obs::emit_batch_started(&batch_id, n, concurrency);

        let mut aggregator = Aggregator::new(n, self.progress.clone());
        if concurrency == 1 {
            self.run_sequential(&batch_id, n, &mut aggregator).await;
        } else {
            self.run_concurrent(&batch_id, n, concurrency, &mut aggregator).await;
        }

        let mut finished = aggregator.finished;
        finished.sort_by_key(|(index, _, _)| *index);
        let (runs, sessions): (Vec<_>, Vec<_>) =
            finished.into_iter().map(|(_, run, log)| (run, log)).unzip();

        let stopped_early = runs.len() < n;
        if stopped_early {
            obs::emit_batch_stopped(&batch_id, runs.len(), n);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let result = BatchResult::from_runs(batch_id, runs, sessions, duration_ms, stopped_early);
        obs::emit_batch_finished(&result.batch_id, result.len(), result.passed_count, duration_ms);
        result
    }

    async fn run_sequential(&self, batch_id: &str, n: usize, aggregator: &mut Aggregator) {
        for index in 0..n {
            if !self.pace(index).await {
                break;
            }
            let (run, log) = run_isolated(Arc::clone(&self.orchestrator), run_id(batch_id, index)).await;
            aggregator.accept(index, run, log);
        }
    }

    async fn run_concurrent(
        &self,
        batch_id: &str,
        n: usize,
        concurrency: usize,
        aggregator: &mut Aggregator,
    ) {
        let (tx, mut rx) = mpsc::channel::<(usize, RunResult, SessionLog)>(concurrency);
        let sem = Arc::new(Semaphore::new(concurrency));

        let dispatch = async move {
            for index in 0..n {
                // Wait for a free slot before checking the flag, so a stop
                // requested while all slots are busy is honoured.
                let permit = match Arc::clone(&sem).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                if !self.pace(index).await {
                    break;
                }

                let orchestrator = Arc::clone(&self.orchestrator);
                let tx = tx.clone();
                let id = run_id(batch_id, index);
                tokio::spawn(async move {
                    let _permit = permit;
                    let (run, log) = run_isolated(orchestrator, id).await;
                    if tx.send((index, run, log)).await.is_err() {
                        warn!(index, "batch aggregator gone; dropping run result");
                    }
                });
            }
            // `tx` drops here; the aggregator ends once every run task has sent.
        };

        let aggregate = async {
            while let Some((index, run, log)) = rx.recv().await {
                aggregator.accept(index, run, log);
            }
        };

        tokio::join!(dispatch, aggregate);
    }

    /// Gate the start of run `index`: honour the stop flag and the inter-run
    /// delay. Returns `false` when the batch must stop.
    async fn pace(&self, index: usize) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        let delay = self.config.inter_run_delay();
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
            if self.stop.is_stopped() {
                return false;
            }
        }
        true
    }
}

impl fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunner")
            .field("config", &self.config)
            .field("stopped", &self.stop.is_stopped())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

fn run_id(batch_id: &str, index: usize) -> String {
    format!("{}-{:04}", batch_id, index + 1)
}

/// Execute one run on its own task so a panic fails only that run.
async fn run_isolated(orchestrator: Arc<PipelineOrchestrator>, run_id: String) -> (RunResult, SessionLog) {
    let id = run_id.clone();
    let handle = tokio::spawn(async move { orchestrator.execute_run_with_id(id).await });
    match handle.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            let message = if join_err.is_panic() {
                format!("run task panicked: {}", join_err)
            } else {
                format!("run task cancelled: {}", join_err)
            };
            warn!(run_id = %run_id, error = %message, "run aborted");
            let mut log = SessionLog::start_session(&run_id);
            log.record_error(ErrorRecord::new(&run_id, RUN_SCOPE, ErrorKind::Fatal, &message));
            log.end_session(false);
            (RunResult::failed(run_id, message), log)
        }
    }
}

/// Single owner of the batch counters.
struct Aggregator {
    finished: Vec<(usize, RunResult, SessionLog)>,
    progress: BatchProgress,
    callback: Option<ProgressCallback>,
}

impl Aggregator {
    fn new(target: usize, callback: Option<ProgressCallback>) -> Self {
        Self {
            finished: Vec::with_capacity(target),
            progress: BatchProgress {
                completed: 0,
                target,
                passed: 0,
                failed: 0,
            },
            callback,
        }
    }

    fn accept(&mut self, index: usize, run: RunResult, log: SessionLog) {
        self.progress.completed += 1;
        if run.passed {
            self.progress.passed += 1;
        } else {
            self.progress.failed += 1;
        }
        debug!(
            run_id = %run.run_id,
            completed = self.progress.completed,
            target = self.progress.target,
            passed = run.passed,
            "run finished"
        );
        if let Some(callback) = &self.callback {
            callback(&run, &self.progress);
        }
        self.finished.push((index, run, log));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::fakes::ScriptedStage;
    use crate::stage::StageSpec;
    use std::sync::Mutex;

    fn orchestrator(stage: ScriptedStage) -> Arc<PipelineOrchestrator> {
        Arc::new(PipelineOrchestrator::new(
            vec![StageSpec::new(Arc::new(stage))],
            PipelineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_sequential_batch_runs_all() {
        let runner = BatchRunner::new(orchestrator(ScriptedStage::new("concept")), BatchConfig::default());
        let batch = runner.run(3).await;

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.sessions.len(), 3);
        assert_eq!(batch.passed_count, 3);
        assert!(!batch.stopped_early);
        assert!(batch.runs[0].run_id.ends_with("-0001"));
        assert!(batch.sessions.iter().all(|s| s.is_ended()));
    }

    #[tokio::test]
    async fn test_stop_from_progress_callback() {
        let runner = BatchRunner::new(orchestrator(ScriptedStage::new("concept")), BatchConfig::default());
        let stop = runner.stop_handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let runner = runner.with_progress(move |_run, progress| {
            seen_cb.lock().unwrap().push(*progress);
            if progress.completed == 2 {
                stop.stop();
            }
        });

        let batch = runner.run(5).await;

        assert_eq!(batch.len(), 2);
        assert!(batch.stopped_early);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].completed, 2);
        assert_eq!(seen[1].target, 5);
    }

    #[tokio::test]
    async fn test_panicking_run_becomes_failed_result() {
        let runner = BatchRunner::new(
            orchestrator(ScriptedStage::new("concept").panicking()),
            BatchConfig::default(),
        );
        let batch = runner.run(2).await;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.failed_count, 2);
        assert_eq!(batch.aborted_count(), 2);
        assert!(batch.runs[0].error.as_deref().unwrap_or_default().contains("panicked"));
        assert_eq!(batch.sessions[0].get_errors()[0].error_kind, ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_stopped_before_start_runs_nothing() {
        let runner = BatchRunner::new(orchestrator(ScriptedStage::new("concept")), BatchConfig::default());
        runner.stop_handle().stop();
        let batch = runner.run(4).await;
        assert!(batch.is_empty());
        assert!(batch.stopped_early);
    }
}
