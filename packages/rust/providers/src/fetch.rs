//! Page fetching with main-content extraction and HTML → Markdown conversion.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

use kwresearch_shared::{ContentFetcher, FetchConfig, FetchedDocument, ProviderError, Result};

use crate::http::{build_client, classify_status, transport_error};

/// Tags whose content never belongs in the extracted text.
const SKIP_TAGS: [&str; 10] = [
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg", "form",
];

/// Downloads pages and reduces them to readable Markdown.
pub struct HttpFetcher {
    client: Client,
    /// Allow localhost/private IPs (for tests against mock servers).
    allow_private_hosts: bool,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            allow_private_hosts: config.allow_private_hosts,
        })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedDocument, ProviderError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| ProviderError::invalid_input(format!("{url}: invalid URL: {e}")))?;

        if !self.allow_private_hosts && is_ssrf_target(&parsed) {
            warn!(%parsed, "SSRF protection: blocked");
            return Err(ProviderError::invalid_input(format!(
                "{parsed}: refusing to fetch local or private address"
            )));
        }
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::invalid_input(format!(
                "{parsed}: unsupported scheme"
            )));
        }

        let response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .map_err(|e| transport_error(e, parsed.as_str()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, parsed.as_str()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        if !is_textual(&content_type) {
            return Err(ProviderError::permanent(format!(
                "{parsed}: unsupported content type {content_type}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::transient(format!("{parsed}: body read failed: {e}")))?;

        let is_html = content_type.contains("html") || content_type.contains("xml");
        let (title, content) = if is_html {
            let doc = Html::parse_document(&body);
            let title = extract_title(&doc).unwrap_or_else(|| parsed.to_string());
            let markdown = to_markdown(&extract_content_html(&doc))
                .map_err(|e| ProviderError::permanent(format!("{parsed}: {e}")))?;
            (title, markdown)
        } else {
            (parsed.to_string(), cleanup(&body))
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("content_type".to_string(), content_type);
        metadata.insert("status_code".to_string(), status.as_u16().to_string());
        metadata.insert("content_hash".to_string(), compute_hash(&body));
        metadata.insert("fetched_at".to_string(), Utc::now().to_rfc3339());
        metadata.insert(
            "word_count".to_string(),
            content.split_whitespace().count().to_string(),
        );

        debug!(title = %title, content_len = content.len(), "page fetched");

        Ok(FetchedDocument {
            url: parsed.to_string(),
            title,
            content,
            metadata,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn is_textual(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/")
        || mime == "application/xhtml+xml"
        || mime == "application/xml"
        || mime == "application/json"
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// `<title>`, else the first `<h1>`.
fn extract_title(doc: &Html) -> Option<String> {
    ["title", "h1"].into_iter().find_map(|tag| {
        let sel = Selector::parse(tag).ok()?;
        doc.select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

/// Main content area: `<main>`, `<article>`, `[role=main]`, `.content`, else `<body>`.
fn extract_content_html(doc: &Html) -> String {
    let selectors = ["main", "article", r#"[role="main"]"#, ".content", "body"];

    for sel_str in selectors {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            return strip_chrome(&el.inner_html());
        }
    }
    String::new()
}

/// Strip navigation and sidebar elements that class names give away.
fn strip_chrome(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let Ok(chrome_sel) = Selector::parse(".sidebar, .nav, .menu, .cookie-banner") else {
        return html.to_string();
    };

    let mut result = html.to_string();
    for el in fragment.select(&chrome_sel) {
        result = result.replace(&el.html(), "");
    }
    result
}

fn to_markdown(content_html: &str) -> std::result::Result<String, String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    let raw = converter
        .convert(content_html)
        .map_err(|e| format!("htmd conversion failed: {e}"))?;
    Ok(cleanup(&raw))
}

/// Trim trailing whitespace per line and collapse runs of blank lines.
fn cleanup(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let trimmed = md
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    MULTI_BLANK_RE
        .replace_all(&trimmed, "\n\n")
        .trim()
        .to_string()
}

/// SHA-256 hex digest of the raw body.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 (link local)
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use kwresearch_shared::ProviderErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Caching Guide</title></head>
<body>
  <nav><a href="/">Home</a> Navigation links</nav>
  <main>
    <h1>Caching</h1>
    <p>Caches trade memory for latency.</p>
    <div class="sidebar">Sidebar noise</div>
    <script>console.log("tracking")</script>
  </main>
  <footer>Copyright footer</footer>
</body>
</html>"#;

    fn fetcher(allow_private_hosts: bool) -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            allow_private_hosts,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    async fn serve(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn extracts_main_content_as_markdown() {
        let server = serve(
            ResponseTemplate::new(200).set_body_raw(PAGE, "text/html; charset=utf-8"),
        )
        .await;
        let url = format!("{}/page", server.uri());

        let doc = fetcher(true).fetch(&url).await.unwrap();
        assert_eq!(doc.title, "Caching Guide");
        assert!(doc.content.contains("Caches trade memory for latency."));
        assert!(!doc.content.contains("Navigation links"));
        assert!(!doc.content.contains("Copyright footer"));
        assert!(!doc.content.contains("tracking"));
        assert!(!doc.content.contains("Sidebar noise"));
        assert!(!doc.content.contains("<p>"));

        assert_eq!(doc.metadata["status_code"], "200");
        assert_eq!(doc.metadata["content_hash"], compute_hash(PAGE));
        assert!(doc.metadata["content_type"].starts_with("text/html"));
        assert!(doc.metadata.contains_key("fetched_at"));
        assert!(doc.metadata.contains_key("word_count"));
    }

    #[tokio::test]
    async fn plain_text_is_kept_verbatim() {
        let server = serve(
            ResponseTemplate::new(200).set_body_raw("line one   \n\n\n\nline two", "text/plain"),
        )
        .await;
        let url = format!("{}/page", server.uri());

        let doc = fetcher(true).fetch(&url).await.unwrap();
        assert_eq!(doc.content, "line one\n\nline two");
        assert_eq!(doc.title, url);
    }

    #[tokio::test]
    async fn not_found_is_permanent() {
        let server = serve(ResponseTemplate::new(404)).await;
        let err = fetcher(true)
            .fetch(&format!("{}/page", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Permanent);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = serve(ResponseTemplate::new(503)).await;
        let err = fetcher(true)
            .fetch(&format!("{}/page", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Transient);
    }

    #[tokio::test]
    async fn binary_content_is_permanent() {
        let server =
            serve(ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50, 0x4e, 0x47], "image/png"))
                .await;
        let err = fetcher(true)
            .fetch(&format!("{}/page", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Permanent);
    }

    #[tokio::test]
    async fn private_hosts_are_blocked_by_default() {
        let err = fetcher(false)
            .fetch("http://127.0.0.1:9/admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn malformed_url_is_invalid_input() {
        let err = fetcher(true).fetch("not a url").await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidInput);

        let err = fetcher(true).fetch("file:///etc/passwd").await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidInput);
    }

    #[test]
    fn ssrf_targets() {
        let blocked = [
            "file:///etc/passwd",
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
            "http://printer.local/",
        ];
        for url in blocked {
            assert!(is_ssrf_target(&Url::parse(url).unwrap()), "{url}");
        }
        assert!(!is_ssrf_target(
            &Url::parse("https://docs.example.com/page").unwrap()
        ));
    }

    #[test]
    fn title_falls_back_to_h1() {
        let doc = Html::parse_document("<html><body><h1> Heading </h1></body></html>");
        assert_eq!(extract_title(&doc).as_deref(), Some("Heading"));
        let doc = Html::parse_document("<html><body><p>none</p></body></html>");
        assert_eq!(extract_title(&doc), None);
    }

    #[test]
    fn content_falls_back_to_body() {
        let doc = Html::parse_document("<html><body><p>Body only</p></body></html>");
        assert!(extract_content_html(&doc).contains("Body only"));
    }

    #[test]
    fn known_hash() {
        assert_eq!(
            compute_hash("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
