//! Shared types, error model, provider traits, and configuration for keyword research.
//!
//! This crate is the foundation depended on by all other kwresearch crates.
//! It provides:
//! - [`ResearchError`], [`ProviderError`], [`StageError`] and the [`ErrorKind`] taxonomy
//! - Domain types ([`KeywordJob`], [`SearchHit`], [`KeywordReport`], [`ResearchSessionResult`], ...)
//! - Provider traits ([`SearchProvider`], [`ContentFetcher`], [`ContentAnalyzer`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, OpenRouterConfig, RetryConfig, SearchConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
    validate_config,
};
pub use error::{ErrorKind, ProviderError, ProviderErrorKind, ResearchError, Result, StageError};
pub use traits::{ContentAnalyzer, ContentFetcher, Providers, SearchProvider};
pub use types::{
    AggregatedSummary, AnalysisResult, Coverage, FailureRecord, FetchedDocument, KeywordJob,
    KeywordOutcome, KeywordReport, PipelineState, ResearchSessionResult, SearchHit, SessionId,
    Stage,
};
