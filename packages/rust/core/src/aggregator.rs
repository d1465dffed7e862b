//! Merge successful keyword reports into one deduplicated summary.
//!
//! [`aggregate`] is a pure function of its inputs: the same reports always
//! produce the same summary, and an empty report set produces a well-formed
//! summary with zeroed coverage.

use std::collections::HashSet;

use kwresearch_shared::{AggregatedSummary, Coverage, KeywordReport};

/// Default relevance at or above which a report counts as high quality.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.85;

/// Build the [`AggregatedSummary`] for `reports` out of `total_keywords` requested.
pub fn aggregate(
    reports: &[KeywordReport],
    total_keywords: usize,
    quality_threshold: f64,
) -> AggregatedSummary {
    let key_findings = dedup(reports.iter().flat_map(|r| &r.analysis.key_insights));
    let technical_insights = dedup(reports.iter().flat_map(|r| &r.analysis.technical_details));
    let recommendations = dedup(reports.iter().flat_map(|r| &r.analysis.recommendations));

    let successful_keywords = reports.len();
    let average_relevance = average_relevance(reports);
    let high_quality_count = reports
        .iter()
        .filter(|r| r.analysis.relevance_score >= quality_threshold)
        .count();

    AggregatedSummary {
        overall_summary: format!(
            "Researched {successful_keywords} of {total_keywords} keywords successfully \
             with an average relevance of {average_relevance:.2}."
        ),
        key_findings,
        technical_insights,
        recommendations,
        coverage: Coverage {
            total_keywords,
            successful_keywords,
            average_relevance,
            high_quality_count,
        },
    }
}

/// Mean relevance, `0.0` for no reports.
fn average_relevance(reports: &[KeywordReport]) -> f64 {
    if reports.is_empty() {
        return 0.0;
    }
    let sum: f64 = reports.iter().map(|r| r.analysis.relevance_score).sum();
    sum / reports.len() as f64
}

/// Keep the first occurrence of each entry, comparing case-insensitively with
/// whitespace runs collapsed. Kept entries are trimmed.
fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let key = normalize(item);
        if key.is_empty() {
            continue;
        }
        if seen.insert(key) {
            out.push(item.trim().to_string());
        }
    }
    out
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
