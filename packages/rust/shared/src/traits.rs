//! Provider traits consumed by the research pipeline.
//!
//! Implementations may be network clients; the pipeline decides how many calls
//! run concurrently, so providers only need to be `Send + Sync`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{AnalysisResult, FetchedDocument, SearchHit};

/// Keyword → ranked candidate hits.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        keyword: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, ProviderError>;

    /// Human-readable provider name for tracing.
    fn name(&self) -> &str;
}

/// URL → fetched document.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, ProviderError>;

    fn name(&self) -> &str;
}

/// (content, keyword, objective) → structured insights.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        content: &str,
        keyword: &str,
        analysis_objective: &str,
    ) -> Result<AnalysisResult, ProviderError>;

    fn name(&self) -> &str;
}

/// The three collaborators a research session needs, cheap to clone.
#[derive(Clone)]
pub struct Providers {
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub analyzer: Arc<dyn ContentAnalyzer>,
}

impl Providers {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn ContentFetcher>,
        analyzer: Arc<dyn ContentAnalyzer>,
    ) -> Self {
        Self {
            search,
            fetcher,
            analyzer,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("search", &self.search.name())
            .field("fetcher", &self.fetcher.name())
            .field("analyzer", &self.analyzer.name())
            .finish()
    }
}
