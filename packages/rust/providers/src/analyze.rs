//! LLM-backed content analysis through an OpenAI-compatible chat API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use kwresearch_shared::{
    AnalysisResult, ContentAnalyzer, OpenRouterConfig, ProviderError, Result,
};

use crate::http::{build_client, classify_status, transport_error};

const SYSTEM_PROMPT: &str = "You are a research analyst. Read the provided web content and \
analyze it for the given keyword and objective. Respond with ONLY a JSON object with these \
fields: \"key_insights\" (array of short strings), \"relevant_information\" (string), \
\"technical_details\" (array of strings), \"recommendations\" (array of strings), \
\"relevance_score\" (number between 0 and 1, how relevant the content is to the objective), \
\"summary\" (one or two sentences).";

/// Analyzes fetched content with a chat-completion model (OpenRouter by default).
pub struct OpenRouterAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenRouterAnalyzer {
    pub fn new(config: &OpenRouterConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.default_model.clone(),
            api_key,
        })
    }

    fn user_prompt(content: &str, keyword: &str, analysis_objective: &str) -> String {
        format!(
            "Keyword: {keyword}\nObjective: {analysis_objective}\n\nContent:\n{content}"
        )
    }
}

#[async_trait]
impl ContentAnalyzer for OpenRouterAnalyzer {
    #[instrument(skip(self, content, analysis_objective), fields(model = %self.model, content_len = content.len()))]
    async fn analyze(
        &self,
        content: &str,
        keyword: &str,
        analysis_objective: &str,
    ) -> std::result::Result<AnalysisResult, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::user_prompt(content, keyword, analysis_objective) },
            ],
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }

        let raw = response.text().await.map_err(|e| transport_error(e, &url))?;
        // Only the envelope is held to this; the model's own text is parsed leniently below.
        let reply: Value = serde_json::from_str(&raw).map_err(|e| {
            ProviderError::permanent(format!("{url}: invalid completion response: {e}"))
        })?;

        let text = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::transient("completion response has no message content"))?;

        debug!(reply_len = text.len(), "analysis reply received");
        parse_analysis(text)
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

// ---------------------------------------------------------------------------
// Lenient reply parsing
// ---------------------------------------------------------------------------

/// Parse a model reply into an [`AnalysisResult`].
///
/// Tolerates code fences and prose around the object, missing fields, lists
/// given as a single string, and scores given as strings. A reply without any
/// JSON object is transient: asking again usually helps.
fn parse_analysis(text: &str) -> std::result::Result<AnalysisResult, ProviderError> {
    let object = extract_json_object(text)
        .ok_or_else(|| ProviderError::transient("analysis reply contains no JSON object"))?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| ProviderError::transient(format!("analysis reply is not valid JSON: {e}")))?;

    Ok(AnalysisResult {
        key_insights: string_list(field(&value, "key_insights", "keyInsights")),
        relevant_information: string(field(&value, "relevant_information", "relevantInformation")),
        technical_details: string_list(field(&value, "technical_details", "technicalDetails")),
        recommendations: string_list(field(&value, "recommendations", "recommendations")),
        relevance_score: score(field(&value, "relevance_score", "relevanceScore")),
        summary: string(field(&value, "summary", "summary")),
    })
}

/// The outermost `{ ... }` span, which also skips markdown fences.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn field<'a>(value: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    value.get(snake).or_else(|| value.get(camel))
}

fn string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| string(Some(item)))
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn score(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 }
}
