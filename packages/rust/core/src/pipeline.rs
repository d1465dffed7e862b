//! Per-keyword pipeline: keyword → search → fetch → analyze → assemble → report.
//!
//! Each stage runs under the [`StageExecutor`] and hands its typed output to the
//! next stage by value. Nothing here is shared with other keywords: a pipeline
//! owns its job, and its only outward channel is the [`StateTracker`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use kwresearch_shared::{
    AnalysisResult, ContentAnalyzer, ContentFetcher, FailureRecord, FetchedDocument, KeywordJob,
    KeywordOutcome, KeywordReport, PipelineState, ProviderError, Providers, SearchHit,
    SearchProvider, Stage, StageError,
};

use crate::progress::{ProgressReporter, notify};
use crate::stage::{StageExecutor, StageTask};

/// Content and excerpt bounds applied by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Fetched content is truncated to this many characters.
    pub max_content_chars: usize,
    /// Length of `KeywordReport::content_excerpt`.
    pub excerpt_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_content_chars: 10_000,
            excerpt_chars: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// State tracking
// ---------------------------------------------------------------------------

/// Publishes a pipeline's state to its orchestrator and to the progress reporter.
pub(crate) struct StateTracker {
    index: usize,
    keyword: String,
    tx: watch::Sender<PipelineState>,
    progress: Arc<dyn ProgressReporter>,
}

impl StateTracker {
    pub(crate) fn new(
        index: usize,
        keyword: String,
        tx: watch::Sender<PipelineState>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            index,
            keyword,
            tx,
            progress,
        }
    }

    fn set(&self, state: PipelineState) {
        debug!(index = self.index, keyword = %self.keyword, ?state, "pipeline state");
        self.tx.send_replace(state);
        notify("state_changed", || {
            self.progress.state_changed(self.index, &self.keyword, state)
        });
    }
}

// ---------------------------------------------------------------------------
// KeywordPipeline
// ---------------------------------------------------------------------------

/// Drives one keyword through the four stages.
pub(crate) struct KeywordPipeline {
    job: KeywordJob,
    providers: Providers,
    executor: StageExecutor,
    settings: PipelineSettings,
    tracker: StateTracker,
}

impl KeywordPipeline {
    pub(crate) fn new(
        job: KeywordJob,
        providers: Providers,
        executor: StageExecutor,
        settings: PipelineSettings,
        tracker: StateTracker,
    ) -> Self {
        Self {
            job,
            providers,
            executor,
            settings,
            tracker,
        }
    }

    /// Run to a terminal state. Stage failures become a [`FailureRecord`].
    #[instrument(skip_all, fields(keyword = %self.job.keyword, index = self.tracker.index))]
    pub(crate) async fn run(self) -> KeywordOutcome {
        match self.drive().await {
            Ok(report) => {
                self.tracker.set(PipelineState::Done);
                info!(url = %report.url, relevance = report.analysis.relevance_score, "keyword researched");
                KeywordOutcome::Success(report)
            }
            Err(err) => {
                self.tracker.set(PipelineState::Failed);
                warn!(stage = %err.stage, kind = %err.kind, attempts = err.attempts, error = %err.message, "keyword failed");
                KeywordOutcome::Failure(FailureRecord {
                    keyword: self.job.keyword.clone(),
                    stage: err.stage,
                    error_kind: err.kind,
                    message: err.message,
                    attempts: err.attempts,
                })
            }
        }
    }

    async fn drive(&self) -> Result<KeywordReport, StageError> {
        let job = &self.job;

        self.tracker.set(PipelineState::Searching);
        let hit = self
            .executor
            .run(&SearchStage {
                provider: self.providers.search.as_ref(),
                keyword: &job.keyword,
                max_results: job.max_results,
            })
            .await?;

        self.tracker.set(PipelineState::Fetching);
        let document = self
            .executor
            .run(&FetchStage {
                fetcher: self.providers.fetcher.as_ref(),
                url: &hit.url,
                max_chars: self.settings.max_content_chars,
            })
            .await?;

        self.tracker.set(PipelineState::Analyzing);
        let analysis = self
            .executor
            .run(&AnalyzeStage {
                analyzer: self.providers.analyzer.as_ref(),
                document: &document,
                keyword: &job.keyword,
                analysis_objective: &job.analysis_objective,
            })
            .await?;

        self.tracker.set(PipelineState::Assembling);
        self.executor
            .run(&AssembleStage {
                keyword: &job.keyword,
                hit: &hit,
                document: &document,
                analysis: &analysis,
                excerpt_chars: self.settings.excerpt_chars,
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

struct SearchStage<'a> {
    provider: &'a dyn SearchProvider,
    keyword: &'a str,
    max_results: usize,
}

#[async_trait]
impl StageTask for SearchStage<'_> {
    type Raw = Vec<SearchHit>;
    type Output = SearchHit;

    fn stage(&self) -> Stage {
        Stage::Search
    }

    fn prepare(&self) -> Result<(), StageError> {
        if self.keyword.trim().is_empty() {
            return Err(StageError::invalid_input(Stage::Search, "keyword is empty"));
        }
        if self.max_results == 0 {
            return Err(StageError::invalid_input(
                Stage::Search,
                "max_results must be at least 1",
            ));
        }
        Ok(())
    }

    async fn execute(&self) -> Result<Vec<SearchHit>, ProviderError> {
        let hits = self
            .provider
            .search(self.keyword.trim(), self.max_results)
            .await?;
        if hits.is_empty() {
            return Err(ProviderError::transient(format!(
                "no search results for '{}'",
                self.keyword
            )));
        }
        Ok(hits)
    }

    fn finalize(&self, hits: Vec<SearchHit>) -> Result<SearchHit, StageError> {
        select_top_hit(hits).ok_or_else(|| {
            StageError::permanent(Stage::Search, "search returned no hit with a URL")
        })
    }
}

/// Lowest rank wins; ties go to the higher relevance, then to the earlier hit.
fn select_top_hit(hits: Vec<SearchHit>) -> Option<SearchHit> {
    hits.into_iter()
        .filter(|hit| !hit.url.trim().is_empty())
        .min_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then_with(|| b.relevance_score.total_cmp(&a.relevance_score))
        })
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

struct FetchStage<'a> {
    fetcher: &'a dyn ContentFetcher,
    url: &'a str,
    max_chars: usize,
}

#[async_trait]
impl StageTask for FetchStage<'_> {
    type Raw = FetchedDocument;
    type Output = FetchedDocument;

    fn stage(&self) -> Stage {
        Stage::Fetch
    }

    fn prepare(&self) -> Result<(), StageError> {
        if self.url.trim().is_empty() {
            return Err(StageError::invalid_input(Stage::Fetch, "url is empty"));
        }
        Ok(())
    }

    async fn execute(&self) -> Result<FetchedDocument, ProviderError> {
        self.fetcher.fetch(self.url).await
    }

    fn finalize(&self, mut document: FetchedDocument) -> Result<FetchedDocument, StageError> {
        if document.content.trim().is_empty() {
            return Err(StageError::permanent(
                Stage::Fetch,
                format!("{}: document has no text content", self.url),
            ));
        }
        let limit = truncate_chars(&document.content, self.max_chars).len();
        if limit < document.content.len() {
            debug!(url = %self.url, max_chars = self.max_chars, "content truncated");
            document.content.truncate(limit);
        }
        Ok(document)
    }
}

// ---------------------------------------------------------------------------
// Analyze
// ---------------------------------------------------------------------------

struct AnalyzeStage<'a> {
    analyzer: &'a dyn ContentAnalyzer,
    document: &'a FetchedDocument,
    keyword: &'a str,
    analysis_objective: &'a str,
}

#[async_trait]
impl StageTask for AnalyzeStage<'_> {
    type Raw = AnalysisResult;
    type Output = AnalysisResult;

    fn stage(&self) -> Stage {
        Stage::Analyze
    }

    fn prepare(&self) -> Result<(), StageError> {
        if self.analysis_objective.trim().is_empty() {
            return Err(StageError::invalid_input(
                Stage::Analyze,
                "analysis objective is empty",
            ));
        }
        Ok(())
    }

    async fn execute(&self) -> Result<AnalysisResult, ProviderError> {
        self.analyzer
            .analyze(&self.document.content, self.keyword, self.analysis_objective)
            .await
    }

    fn finalize(&self, raw: AnalysisResult) -> Result<AnalysisResult, StageError> {
        Ok(normalize_analysis(raw))
    }
}

/// Trim text fields, drop blank list entries, clamp relevance into `[0, 1]`.
fn normalize_analysis(raw: AnalysisResult) -> AnalysisResult {
    fn clean(items: Vec<String>) -> Vec<String> {
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    let relevance_score = if raw.relevance_score.is_nan() {
        0.0
    } else {
        raw.relevance_score.clamp(0.0, 1.0)
    };

    AnalysisResult {
        key_insights: clean(raw.key_insights),
        relevant_information: raw.relevant_information.trim().to_string(),
        technical_details: clean(raw.technical_details),
        recommendations: clean(raw.recommendations),
        relevance_score,
        summary: raw.summary.trim().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Assemble
// ---------------------------------------------------------------------------

struct AssembleStage<'a> {
    keyword: &'a str,
    hit: &'a SearchHit,
    document: &'a FetchedDocument,
    analysis: &'a AnalysisResult,
    excerpt_chars: usize,
}

#[async_trait]
impl StageTask for AssembleStage<'_> {
    type Raw = ();
    type Output = KeywordReport;

    fn stage(&self) -> Stage {
        Stage::Assemble
    }

    async fn execute(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn finalize(&self, _raw: ()) -> Result<KeywordReport, StageError> {
        let title = if self.document.title.trim().is_empty() {
            self.hit.title.clone()
        } else {
            self.document.title.clone()
        };

        Ok(KeywordReport {
            keyword: self.keyword.to_string(),
            url: self.document.url.clone(),
            title,
            content_excerpt: truncate_chars(&self.document.content, self.excerpt_chars)
                .trim_end()
                .to_string(),
            analysis: self.analysis.clone(),
            source_type: self.hit.source_type.clone(),
            search_rank: self.hit.rank,
            processed_at: Utc::now(),
        })
    }
}

/// Longest prefix of `s` holding at most `max_chars` characters.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
