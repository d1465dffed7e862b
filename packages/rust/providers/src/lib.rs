//! HTTP-backed implementations of the research provider traits.
//!
//! - [`SearxngSearch`]: web search through a SearXNG JSON endpoint
//! - [`HttpFetcher`]: page download, main-content extraction, HTML → Markdown
//! - [`OpenRouterAnalyzer`]: LLM analysis through an OpenAI-compatible API

mod analyze;
mod fetch;
mod http;
mod search;

pub use analyze::OpenRouterAnalyzer;
pub use fetch::HttpFetcher;
pub use search::SearxngSearch;

use kwresearch_shared::{AppConfig, Providers, Result};
use std::sync::Arc;

/// Build the default provider bundle from configuration.
///
/// `api_key` is the resolved OpenRouter key (see `validate_api_key`).
pub fn build_providers(config: &AppConfig, api_key: String) -> Result<Providers> {
    let search = SearxngSearch::new(&config.search)?;
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let analyzer = OpenRouterAnalyzer::new(&config.openrouter, api_key)?;
    Ok(Providers::new(
        Arc::new(search),
        Arc::new(fetcher),
        Arc::new(analyzer),
    ))
}
