//! Bounded-concurrency fan-out of keyword pipelines.
//!
//! A fixed pool of `min(max_concurrency, jobs)` workers pulls `(index, job)`
//! pairs from a shared queue. Every pipeline runs in its own task under its own
//! timeout, so a panic or a hang in one keyword is converted into that keyword's
//! [`FailureRecord`] and never reaches its siblings. Outcomes are written into
//! index-addressed slots, which restores input order regardless of completion order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use kwresearch_shared::{
    ErrorKind, FailureRecord, KeywordJob, KeywordOutcome, KeywordReport, PipelineState, Providers,
    Stage,
};

use crate::pipeline::{KeywordPipeline, PipelineSettings, StateTracker};
use crate::progress::{ProgressReporter, notify};
use crate::stage::StageExecutor;

/// Reports and failures, each in input order.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOutput {
    pub reports: Vec<KeywordReport>,
    pub failures: Vec<FailureRecord>,
}

impl OrchestratorOutput {
    /// Partition per-index outcomes, keeping their order.
    fn from_outcomes(outcomes: Vec<KeywordOutcome>) -> Self {
        let mut output = Self::default();
        for outcome in outcomes {
            match outcome {
                KeywordOutcome::Success(report) => output.reports.push(report),
                KeywordOutcome::Failure(failure) => output.failures.push(failure),
            }
        }
        output
    }
}

/// Runs keyword pipelines with bounded parallelism.
#[derive(Clone)]
pub struct Orchestrator {
    providers: Providers,
    executor: StageExecutor,
    settings: PipelineSettings,
    max_concurrency: usize,
    overall_deadline: Option<Duration>,
    progress: Arc<dyn ProgressReporter>,
}

impl Orchestrator {
    pub fn new(
        providers: Providers,
        executor: StageExecutor,
        settings: PipelineSettings,
        max_concurrency: usize,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            providers,
            executor,
            settings,
            max_concurrency: max_concurrency.max(1),
            overall_deadline: None,
            progress,
        }
    }

    /// Stop dispatching new keywords once `deadline` has elapsed since `run` started.
    /// Keywords still queued at that point fail with [`ErrorKind::Cancelled`];
    /// running ones finish or hit their own timeout.
    pub fn with_overall_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.overall_deadline = deadline;
        self
    }

    /// Run every job and return one outcome per job, in input order.
    #[instrument(skip_all, fields(jobs = jobs.len(), max_concurrency = self.max_concurrency))]
    pub async fn run_outcomes(&self, jobs: Vec<KeywordJob>) -> Vec<KeywordOutcome> {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }

        let keywords: Vec<String> = jobs.iter().map(|j| j.keyword.clone()).collect();
        // A deadline too far out to represent is no deadline.
        let deadline = self
            .overall_deadline
            .and_then(|d| Instant::now().checked_add(d));
        let queue: Arc<Mutex<VecDeque<(usize, KeywordJob)>>> =
            Arc::new(Mutex::new(jobs.into_iter().enumerate().collect()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, KeywordOutcome)>();

        let workers = self.max_concurrency.min(total);
        info!(total, workers, "dispatching keyword pipelines");

        for worker_id in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let this = self.clone();

            tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, job)) = next else {
                        break;
                    };

                    let outcome = match deadline {
                        Some(d) if Instant::now() >= d => {
                            debug!(worker_id, index, keyword = %job.keyword, "session deadline passed, not dispatching");
                            cancelled(&job)
                        }
                        _ => this.run_isolated(index, job).await,
                    };

                    // Record first so a misbehaving reporter cannot lose the outcome.
                    let report = outcome.clone();
                    if tx.send((index, outcome)).is_err() {
                        break;
                    }
                    notify("keyword_finished", || {
                        this.progress.keyword_finished(index, &report)
                    });
                }
                debug!(worker_id, "worker finished");
            });
        }
        drop(tx);

        let mut slots: Vec<Option<KeywordOutcome>> = (0..total).map(|_| None).collect();
        while let Some((index, outcome)) = rx.recv().await {
            slots[index] = Some(outcome);
        }

        fill_missing(slots, keywords)
    }

    /// Run every job and partition the outcomes.
    pub async fn run(&self, jobs: Vec<KeywordJob>) -> OrchestratorOutput {
        OrchestratorOutput::from_outcomes(self.run_outcomes(jobs).await)
    }

    /// Run one pipeline in its own task under the job's timeout.
    async fn run_isolated(&self, index: usize, job: KeywordJob) -> KeywordOutcome {
        let keyword = job.keyword.clone();
        let timeout = job.timeout;
        let (state_tx, state_rx) = watch::channel(PipelineState::Pending);
        let tracker = StateTracker::new(index, keyword.clone(), state_tx, self.progress.clone());
        let pipeline = KeywordPipeline::new(
            job,
            self.providers.clone(),
            self.executor.clone(),
            self.settings,
            tracker,
        );

        let handle =
            tokio::spawn(async move { tokio::time::timeout(timeout, pipeline.run()).await });

        let stage_at_failure = || state_rx.borrow().stage().unwrap_or(Stage::Assemble);

        match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_elapsed)) => {
                let stage = stage_at_failure();
                warn!(%keyword, %stage, timeout_ms = timeout.as_millis() as u64, "keyword timed out");
                notify("state_changed", || {
                    self.progress
                        .state_changed(index, &keyword, PipelineState::Failed)
                });
                KeywordOutcome::Failure(FailureRecord {
                    keyword,
                    stage,
                    error_kind: ErrorKind::Timeout,
                    message: format!("keyword exceeded its {}ms deadline", timeout.as_millis()),
                    attempts: 1,
                })
            }
            Err(join_err) => {
                let stage = stage_at_failure();
                let reason = if join_err.is_panic() {
                    "pipeline panicked"
                } else {
                    "pipeline task was cancelled"
                };
                warn!(%keyword, %stage, reason, "keyword pipeline crashed");
                notify("state_changed", || {
                    self.progress
                        .state_changed(index, &keyword, PipelineState::Failed)
                });
                KeywordOutcome::Failure(FailureRecord {
                    keyword,
                    stage,
                    error_kind: ErrorKind::Permanent,
                    message: reason.to_string(),
                    attempts: 1,
                })
            }
        }
    }
}

/// One outcome per keyword: slots a dead worker never filled become permanent failures.
fn fill_missing(slots: Vec<Option<KeywordOutcome>>, keywords: Vec<String>) -> Vec<KeywordOutcome> {
    slots
        .into_iter()
        .zip(keywords)
        .map(|(slot, keyword)| {
            slot.unwrap_or_else(|| {
                warn!(%keyword, "no outcome recorded for keyword");
                KeywordOutcome::Failure(FailureRecord {
                    keyword,
                    stage: Stage::Search,
                    error_kind: ErrorKind::Permanent,
                    message: "worker stopped before recording an outcome".to_string(),
                    attempts: 0,
                })
            })
        })
        .collect()
}

fn cancelled(job: &KeywordJob) -> KeywordOutcome {
    KeywordOutcome::Failure(FailureRecord {
        keyword: job.keyword.clone(),
        stage: Stage::Search,
        error_kind: ErrorKind::Cancelled,
        message: "session deadline passed before the keyword was dispatched".to_string(),
        attempts: 0,
    })
}
