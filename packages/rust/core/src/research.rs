//! End-to-end research session: keywords → orchestrated pipelines → aggregated summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use kwresearch_shared::{AppConfig, KeywordJob, Providers, ResearchSessionResult, SessionId};

use crate::aggregator::{self, DEFAULT_QUALITY_THRESHOLD};
use crate::orchestrator::Orchestrator;
use crate::pipeline::PipelineSettings;
use crate::progress::{ProgressReporter, notify};
use crate::stage::{RetryPolicy, StageExecutor};

/// Options for one research session.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchOptions {
    /// Keywords researched in parallel (values below 1 act as 1).
    pub max_concurrency: usize,
    /// Wall-clock budget per keyword, all stages included.
    pub per_keyword_timeout: Duration,
    pub max_results_per_keyword: usize,
    pub quality_threshold: f64,
    /// Stop dispatching new keywords after this long.
    pub overall_deadline: Option<Duration>,
    pub retry: RetryPolicy,
    pub max_content_chars: usize,
    pub excerpt_chars: usize,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        let settings = PipelineSettings::default();
        Self {
            max_concurrency: 4,
            per_keyword_timeout: Duration::from_secs(120),
            max_results_per_keyword: 5,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            overall_deadline: None,
            retry: RetryPolicy::default(),
            max_content_chars: settings.max_content_chars,
            excerpt_chars: settings.excerpt_chars,
        }
    }
}

impl From<&AppConfig> for ResearchOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.defaults.max_concurrency,
            per_keyword_timeout: Duration::from_secs(config.defaults.per_keyword_timeout_secs),
            max_results_per_keyword: config.defaults.max_results,
            quality_threshold: config.defaults.quality_threshold,
            overall_deadline: config.defaults.overall_deadline_secs.map(Duration::from_secs),
            retry: RetryPolicy::from(&config.retry),
            max_content_chars: config.fetch.max_content_chars,
            excerpt_chars: config.fetch.excerpt_chars,
        }
    }
}

/// Research every keyword against `analysis_objective` and aggregate the results.
///
/// Never fails: per-keyword problems come back as failure records, and a
/// session where every keyword failed is still a complete result.
#[instrument(skip_all, fields(keywords = keywords.len(), concurrency = options.max_concurrency))]
pub async fn run_research(
    keywords: &[String],
    analysis_objective: &str,
    options: &ResearchOptions,
    providers: &Providers,
    progress: Arc<dyn ProgressReporter>,
) -> ResearchSessionResult {
    let session_id = SessionId::new();
    let started_at = Utc::now();
    let start = Instant::now();

    info!(%session_id, ?providers, "starting research session");
    notify("session_started", || progress.session_started(keywords.len()));

    let jobs: Vec<KeywordJob> = keywords
        .iter()
        .map(|keyword| KeywordJob {
            keyword: keyword.clone(),
            analysis_objective: analysis_objective.to_string(),
            max_results: options.max_results_per_keyword,
            timeout: options.per_keyword_timeout,
        })
        .collect();

    let orchestrator = Orchestrator::new(
        providers.clone(),
        StageExecutor::new(options.retry.clone()),
        PipelineSettings {
            max_content_chars: options.max_content_chars,
            excerpt_chars: options.excerpt_chars,
        },
        options.max_concurrency,
        progress.clone(),
    )
    .with_overall_deadline(options.overall_deadline);

    let output = orchestrator.run(jobs).await;
    let summary = aggregator::aggregate(&output.reports, keywords.len(), options.quality_threshold);

    let result = ResearchSessionResult {
        session_id,
        reports: output.reports,
        failures: output.failures,
        summary,
        started_at,
        completed_at: Utc::now(),
    };

    if result.all_failed() {
        warn!(session_id = %result.session_id, "every keyword failed");
    }
    info!(
        session_id = %result.session_id,
        successful = result.reports.len(),
        failed = result.failures.len(),
        average_relevance = result.summary.coverage.average_relevance,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "research session complete"
    );

    notify("session_finished", || progress.session_finished(&result));
    result
}
