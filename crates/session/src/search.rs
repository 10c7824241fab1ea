//! The internal search results page.
//!
//! Search queries go to the Google Custom Search REST API when credentials
//! are configured. Any upstream failure degrades to a static page linking to
//! a public search URL; a search navigation itself never fails.

use std::time::Duration;

use porthole_core::{Config, Error, Result};
use tracing::{debug, warn};

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(6);
const SEARCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

pub struct SearchClient {
    http: reqwest::Client,
    api_key: Option<String>,
    cx: Option<String>,
}

impl SearchClient {
    pub fn new(cfg: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .connect_timeout(SEARCH_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: cfg.search_api_key.clone(),
            cx: cfg.search_cx.clone(),
        }
    }

    /// Render the results page for a query. Always returns HTML.
    pub async fn results_page(&self, query: &str) -> String {
        match self.fetch(query, 1, 10).await {
            Ok(results) => render_results(query, &results),
            Err(e) => {
                warn!(error = %e, query, "Search upstream failed, serving fallback");
                fallback_page(query)
            }
        }
    }

    async fn fetch(&self, query: &str, start: u32, num: u32) -> Result<Vec<SearchResult>> {
        let (key, cx) = match (&self.api_key, &self.cx) {
            (Some(key), Some(cx)) => (key, cx),
            _ => return Err(Error::Upstream("search credentials not configured".into())),
        };
        let start = start.clamp(1, 91);
        let num = num.clamp(1, 10);

        let resp = self
            .http
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("key", key.as_str()),
                ("cx", cx.as_str()),
                ("q", query),
                ("start", &start.to_string()),
                ("num", &num.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!("API returned {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let results: Vec<SearchResult> = body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| SearchResult {
                        title: item["title"].as_str().unwrap_or("Untitled").to_string(),
                        link: item["link"].as_str().unwrap_or("").to_string(),
                        snippet: item["snippet"].as_str().unwrap_or("").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        debug!(query, count = results.len(), "Search results fetched");
        Ok(results)
    }
}

/// Escape the characters that matter inside HTML text and attribute values.
pub(crate) fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn page_shell(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 40px auto; max-width: 720px; color: #202124; }}
h1 {{ font-size: 22px; }}
.result {{ margin-bottom: 24px; }}
.result a {{ color: #1a0dab; font-size: 18px; text-decoration: none; }}
.result .url {{ color: #006621; font-size: 13px; }}
.result .snippet {{ color: #545454; font-size: 14px; }}
.notice {{ color: #70757a; }}
</style>
</head>
<body>
{body}
</body>
</html>"#
    )
}

fn render_results(query: &str, results: &[SearchResult]) -> String {
    let query_html = escape_html(query);
    let mut body = format!("<h1>Search results for \"{query_html}\"</h1>\n");
    if results.is_empty() {
        body.push_str("<p class=\"notice\">No results found.</p>\n");
    }
    for r in results {
        let title = escape_html(&r.title);
        let link = escape_html(&r.link);
        let snippet = escape_html(&r.snippet);
        body.push_str(&format!(
            "<div class=\"result\"><a href=\"{link}\">{title}</a><div class=\"url\">{link}</div><div class=\"snippet\">{snippet}</div></div>\n"
        ));
    }
    page_shell(&format!("Search: {query_html}"), &body)
}

/// Served when the upstream is unreachable or unconfigured; links out to a
/// public search URL for the same query.
pub(crate) fn fallback_page(query: &str) -> String {
    let query_html = escape_html(query);
    let query_enc = urlencoding::encode(query);
    let body = format!(
        "<h1>Search \"{query_html}\"</h1>\n\
         <p class=\"notice\">Search is unavailable right now.</p>\n\
         <p><a href=\"https://www.google.com/search?q={query_enc}\">Search the web for \"{query_html}\"</a></p>\n"
    );
    page_shell(&format!("Search: {query_html}"), &body)
}

/// Served for `internal://` pages that have no handler.
pub(crate) fn placeholder_page(url: &str) -> String {
    let url_html = escape_html(url);
    let body = format!(
        "<h1>{url_html}</h1>\n<p class=\"notice\">This internal page is not implemented.</p>\n"
    );
    page_shell(&url_html, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a & b"), "a &amp; b");
        assert_eq!(
            escape_html("<script>\"x\"</script>"),
            "&lt;script&gt;&quot;x&quot;&lt;/script&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_fallback_page_escapes_and_links() {
        let page = fallback_page("rust <async>");
        assert!(page.contains("rust &lt;async&gt;"));
        assert!(!page.contains("rust <async>"));
        assert!(page.contains("https://www.google.com/search?q=rust%20%3Casync%3E"));
    }

    #[test]
    fn test_render_results() {
        let results = vec![SearchResult {
            title: "Rust & Friends".into(),
            link: "https://example.com/?a=1&b=2".into(),
            snippet: "systems <programming>".into(),
        }];
        let page = render_results("rust", &results);
        assert!(page.contains("Rust &amp; Friends"));
        assert!(page.contains("https://example.com/?a=1&amp;b=2"));
        assert!(page.contains("systems &lt;programming&gt;"));
    }

    #[test]
    fn test_render_results_empty() {
        let page = render_results("nothing", &[]);
        assert!(page.contains("No results found"));
    }

    #[test]
    fn test_placeholder_page() {
        let page = placeholder_page("internal://bookmarks");
        assert!(page.contains("internal://bookmarks"));
        assert!(page.contains("not implemented"));
    }

    #[tokio::test]
    async fn test_fetch_without_credentials_is_upstream_error() {
        let client = SearchClient::new(&porthole_core::Config::default());
        let err = client.fetch("query", 1, 10).await.unwrap_err();
        assert!(matches!(err, porthole_core::Error::Upstream(_)));
    }

    #[tokio::test]
    async fn test_results_page_falls_back_without_credentials() {
        let client = SearchClient::new(&porthole_core::Config::default());
        let page = client.results_page("anything").await;
        assert!(page.contains("Search is unavailable"));
    }
}
