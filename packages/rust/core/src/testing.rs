//! Scripted in-memory providers for pipeline and orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use kwresearch_shared::{
    AnalysisResult, ContentAnalyzer, ContentFetcher, FetchedDocument, KeywordJob, ProviderError,
    SearchHit, SearchProvider,
};

pub(crate) fn job(keyword: &str) -> KeywordJob {
    KeywordJob {
        keyword: keyword.to_string(),
        analysis_objective: "Summarize the trade-offs".to_string(),
        max_results: 3,
        timeout: Duration::from_secs(5),
    }
}

pub(crate) fn hit(keyword: &str, rank: u32, relevance: f64) -> SearchHit {
    SearchHit {
        title: format!("{keyword} result {rank}"),
        url: format!("https://example.com/{}/{rank}", slug(keyword)),
        snippet: format!("About {keyword}"),
        rank,
        source_type: "mock".to_string(),
        relevance_score: relevance,
    }
}

fn slug(keyword: &str) -> String {
    keyword.trim().to_lowercase().replace(' ', "-")
}

/// `https://example.com/<slug>/<rank>` → `<slug>`
fn slug_from_url(url: &str) -> String {
    url.trim_start_matches("https://example.com/")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Behavior {
    delay: Duration,
    transient_failures: u32,
    error: Option<ProviderError>,
    empty: bool,
    panic: bool,
}

/// Per-key behaviors plus call accounting shared by all mocks.
#[derive(Default)]
struct Script {
    behaviors: HashMap<String, Behavior>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: Arc<AtomicU32>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Script {
    fn edit(&mut self, key: &str, f: impl FnOnce(&mut Behavior)) {
        f(self.behaviors.entry(slug(key)).or_default());
    }

    fn behavior(&self, key: &str) -> Behavior {
        self.behaviors.get(&slug(key)).cloned().unwrap_or_default()
    }

    /// Apply the scripted behavior for `key`. `Ok(true)` means "answer empty".
    async fn apply(&self, key: &str) -> Result<bool, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior(key);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !behavior.delay.is_zero() {
            tokio::time::sleep(behavior.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if behavior.panic {
            panic!("scripted panic for {key}");
        }
        if let Some(err) = behavior.error {
            return Err(err);
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(slug(key)).or_insert(0);
            *n += 1;
            *n
        };
        if attempt <= behavior.transient_failures {
            return Err(ProviderError::transient(format!("scripted failure {attempt}")));
        }
        Ok(behavior.empty)
    }
}

// ---------------------------------------------------------------------------
// MockSearch
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockSearch {
    script: Script,
}

impl MockSearch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_keyword(mut self, keyword: &str, err: ProviderError) -> Self {
        self.script.edit(keyword, |b| b.error = Some(err));
        self
    }

    pub(crate) fn empty_for(mut self, keyword: &str) -> Self {
        self.script.edit(keyword, |b| b.empty = true);
        self
    }

    pub(crate) fn delay(mut self, keyword: &str, delay: Duration) -> Self {
        self.script.edit(keyword, |b| b.delay = delay);
        self
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(
        &self,
        keyword: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        if self.script.apply(keyword).await? {
            return Ok(Vec::new());
        }
        Ok((1..=max_results.min(3) as u32)
            .map(|rank| hit(keyword, rank, 1.0 - rank as f64 * 0.1))
            .collect())
    }

    fn name(&self) -> &str {
        "mock-search"
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockFetcher {
    script: Script,
    content: Option<String>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }

    pub(crate) fn transient_failures(mut self, keyword: &str, count: u32) -> Self {
        self.script.edit(keyword, |b| b.transient_failures = count);
        self
    }

    pub(crate) fn delay(mut self, keyword: &str, delay: Duration) -> Self {
        self.script.edit(keyword, |b| b.delay = delay);
        self
    }

    pub(crate) fn delay_all(mut self, keywords: &[&str], delay: Duration) -> Self {
        for keyword in keywords {
            self.script.edit(keyword, |b| b.delay = delay);
        }
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicU32> {
        self.script.calls.clone()
    }

    pub(crate) fn max_in_flight(&self) -> Arc<AtomicUsize> {
        self.script.max_in_flight.clone()
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, ProviderError> {
        let key = slug_from_url(url);
        self.script.apply(&key).await?;
        let content = self
            .content
            .clone()
            .unwrap_or_else(|| format!("Document body for {key}. It covers caching and latency."));
        Ok(FetchedDocument {
            url: url.to_string(),
            title: format!("Page on {key}"),
            content,
            metadata: Default::default(),
        })
    }

    fn name(&self) -> &str {
        "mock-fetcher"
    }
}

// ---------------------------------------------------------------------------
// MockAnalyzer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockAnalyzer {
    script: Script,
    fixed: Option<AnalysisResult>,
    relevance: HashMap<String, f64>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl MockAnalyzer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_result(mut self, result: AnalysisResult) -> Self {
        self.fixed = Some(result);
        self
    }

    pub(crate) fn relevance(mut self, keyword: &str, score: f64) -> Self {
        self.relevance.insert(slug(keyword), score);
        self
    }

    pub(crate) fn panic_on(mut self, keyword: &str) -> Self {
        self.script.edit(keyword, |b| b.panic = true);
        self
    }

    pub(crate) fn seen_content(&self) -> Arc<Mutex<Vec<String>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl ContentAnalyzer for MockAnalyzer {
    async fn analyze(
        &self,
        content: &str,
        keyword: &str,
        _analysis_objective: &str,
    ) -> Result<AnalysisResult, ProviderError> {
        self.seen.lock().unwrap().push(content.to_string());
        self.script.apply(keyword).await?;
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        Ok(AnalysisResult {
            key_insights: vec![
                format!("{keyword} insight"),
                "Uses caching for speed".to_string(),
            ],
            relevant_information: format!("Relevant to {keyword}"),
            technical_details: vec![format!("{keyword} detail")],
            recommendations: vec!["Benchmark before optimizing".to_string()],
            relevance_score: self.relevance.get(&slug(keyword)).copied().unwrap_or(0.8),
            summary: format!("Summary of {keyword}"),
        })
    }

    fn name(&self) -> &str {
        "mock-analyzer"
    }
}
