//! Core domain types for keyword research sessions.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for research session identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stage / PipelineState
// ---------------------------------------------------------------------------

/// One of the four stages a keyword moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Fetch,
    Analyze,
    Assemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Fetch => "fetch",
            Self::Analyze => "analyze",
            Self::Assemble => "assemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single keyword pipeline.
///
/// `Pending → Searching → Fetching → Analyzing → Assembling → {Done | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Searching,
    Fetching,
    Analyzing,
    Assembling,
    Done,
    Failed,
}

impl PipelineState {
    /// The stage in flight in this state. `Pending` maps to `Search`, the
    /// stage that would run next.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Pending | Self::Searching => Some(Stage::Search),
            Self::Fetching => Some(Stage::Fetch),
            Self::Analyzing => Some(Stage::Analyze),
            Self::Assembling => Some(Stage::Assemble),
            Self::Done | Self::Failed => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and stage outputs
// ---------------------------------------------------------------------------

/// One unit of research work for a single keyword.
#[derive(Debug, Clone)]
pub struct KeywordJob {
    pub keyword: String,
    /// Natural-language objective handed to the analyzer.
    pub analysis_objective: String,
    /// Maximum number of search hits to request.
    pub max_results: usize,
    /// Wall-clock budget for the whole pipeline.
    pub timeout: Duration,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// 1-based position in the provider's ranking.
    pub rank: u32,
    /// Engine or index the hit came from.
    pub source_type: String,
    /// Provider relevance in `[0, 1]`.
    pub relevance_score: f64,
}

/// A fetched document, content already bounded in length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Structured insights extracted from a document.
///
/// Every field defaults so that sparse analyzer replies still deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    pub key_insights: Vec<String>,
    pub relevant_information: String,
    pub technical_details: Vec<String>,
    pub recommendations: Vec<String>,
    /// Relevance of the document to the objective, in `[0, 1]`.
    pub relevance_score: f64,
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Terminal artifacts
// ---------------------------------------------------------------------------

/// The successful output of one keyword pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordReport {
    pub keyword: String,
    pub url: String,
    pub title: String,
    /// Leading slice of the fetched content, bounded by the excerpt length.
    pub content_excerpt: String,
    pub analysis: AnalysisResult,
    /// Engine of the search hit the report was built from.
    pub source_type: String,
    /// Rank of the search hit the report was built from.
    pub search_rank: u32,
    pub processed_at: DateTime<Utc>,
}

/// The failed outcome of one keyword pipeline. Never carries partial analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub keyword: String,
    pub stage: Stage,
    pub error_kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Exactly one of these is produced per keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeywordOutcome {
    Success(KeywordReport),
    Failure(FailureRecord),
}

impl KeywordOutcome {
    pub fn keyword(&self) -> &str {
        match self {
            Self::Success(report) => &report.keyword,
            Self::Failure(failure) => &failure.keyword,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// How many keywords succeeded and at what quality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub total_keywords: usize,
    pub successful_keywords: usize,
    /// Mean relevance over successful reports; `0.0` when there are none.
    pub average_relevance: f64,
    pub high_quality_count: usize,
}

/// Deduplicated merge of all successful keyword reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSummary {
    pub overall_summary: String,
    pub key_findings: Vec<String>,
    pub technical_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub coverage: Coverage,
}

/// Everything returned to the caller of a research session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSessionResult {
    pub session_id: SessionId,
    /// Successful reports, in input keyword order.
    pub reports: Vec<KeywordReport>,
    /// Failures, in input keyword order.
    pub failures: Vec<FailureRecord>,
    pub summary: AggregatedSummary,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ResearchSessionResult {
    /// True when at least one keyword was requested and none succeeded.
    pub fn all_failed(&self) -> bool {
        self.reports.is_empty() && !self.failures.is_empty()
    }
}
