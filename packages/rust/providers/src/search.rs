//! SearXNG-backed web search.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use kwresearch_shared::{ProviderError, Result, SearchConfig, SearchHit, SearchProvider};

use crate::http::{build_client, classify_status, transport_error};

/// Raw SearXNG response (`format=json`). Only the fields we use.
#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

/// Web search through a SearXNG instance.
pub struct SearxngSearch {
    client: Client,
    endpoint: String,
    language: Option<String>,
}

impl SearxngSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for SearxngSearch {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn search(
        &self,
        keyword: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<SearchHit>, ProviderError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(ProviderError::invalid_input("search keyword is empty"));
        }

        let url = format!("{}/search", self.endpoint);
        let mut query = vec![("q", keyword), ("format", "json")];
        if let Some(language) = &self.language {
            query.push(("language", language.as_str()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }

        let text = response.text().await.map_err(|e| transport_error(e, &url))?;
        // A 200 that does not decode will not decode on retry either.
        let body: SearxResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::permanent(format!("{url}: invalid search response: {e}")))?;

        let hits = to_hits(body.results, max_results);
        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "searxng"
    }
}

/// Rank in response order, normalize scores by the best one, drop duplicate URLs.
fn to_hits(results: Vec<SearxResult>, max_results: usize) -> Vec<SearchHit> {
    let max_score = results
        .iter()
        .filter_map(|r| r.score)
        .filter(|s| s.is_finite())
        .fold(0.0_f64, f64::max);

    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| !r.url.trim().is_empty())
        .filter(|r| seen.insert(r.url.trim().to_string()))
        .take(max_results)
        .enumerate()
        .map(|(i, r)| {
            let relevance = match r.score {
                Some(score) if max_score > 0.0 && score.is_finite() => {
                    (score / max_score).clamp(0.0, 1.0)
                }
                _ => 0.0,
            };
            SearchHit {
                title: r.title.trim().to_string(),
                url: r.url.trim().to_string(),
                snippet: r.content.unwrap_or_default().trim().to_string(),
                rank: i as u32 + 1,
                source_type: r.engine.unwrap_or_else(|| "web".to_string()),
                relevance_score: relevance,
            }
        })
        .collect()
}
