//! Pulls and parses RSS/Atom feeds via `feed-rs`, extracts articles, and
//! applies the since-filter.

use chrono::{DateTime, Utc};
use newsdesk_core::errors::{CoreError, CoreResult};
use newsdesk_core::models::Source;
use scraper::{Html, Selector};

use crate::fetcher::Fetcher;

#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub published_at: Option<i64>,
    pub author: Option<String>,
    pub summary: Option<String>,
}

/// Strips scripts/styles and collapses whitespace to single-space runs.
fn sanitize_html(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let skip = Selector::parse("script, style").unwrap();
    let skip_nodes: std::collections::HashSet<_> = fragment.select(&skip).map(|e| e.id()).collect();

    let mut text = String::new();
    for node in fragment.root_element().descendants() {
        if let Some(el) = scraper::ElementRef::wrap(node) {
            if skip_nodes.contains(&el.id()) {
                continue;
            }
        }
        if let Some(t) = node.value().as_text() {
            text.push_str(t);
            text.push(' ');
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct RssCrawler<'a> {
    fetcher: &'a Fetcher,
    per_host_rps: f64,
}

impl<'a> RssCrawler<'a> {
    pub fn new(fetcher: &'a Fetcher, per_host_rps: f64) -> Self {
        Self { fetcher, per_host_rps }
    }

    /// Polls `source.url`, returning only entries published (or updated)
    /// after `since` (default `now - 24h`). A single malformed entry is
    /// skipped and logged; a failure to fetch or parse the feed itself is
    /// an error naming the feed URL.
    pub async fn poll(&self, source: &Source, since: Option<DateTime<Utc>>) -> CoreResult<Vec<Article>> {
        let since = since.unwrap_or_else(|| Utc::now() - chrono::Duration::hours(24));

        let page = self
            .fetcher
            .fetch(&source.url, self.per_host_rps)
            .await
            .map_err(|e| CoreError::dependency(format!("polling feed {}: {e}", source.url)))?;

        let feed = feed_rs::parser::parse(page.body.as_bytes())
            .map_err(|e| CoreError::dependency(format!("parsing feed {}: {e}", source.url)))?;

        let mut articles = Vec::new();
        for entry in feed.entries {
            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp())
                .unwrap_or_else(|| Utc::now().timestamp());

            if published < since.timestamp() {
                continue;
            }

            let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
                tracing::warn!(feed = %source.url, entry_id = %entry.id, "skipping entry with no link");
                continue;
            };

            let title = entry.title.map(|t| t.content).unwrap_or_else(|| "(untitled)".to_string());
            let raw_content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
                .unwrap_or_default();

            articles.push(Article {
                title,
                content: sanitize_html(&raw_content),
                source_url: link,
                published_at: Some(published),
                author: entry.authors.first().map(|a| a.name.clone()),
                summary: entry.summary.map(|s| s.content),
            });
        }

        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_scripts_and_collapses_whitespace() {
        let html = "<div>Hello   <script>evil()</script>\n\n World</div>";
        assert_eq!(sanitize_html(html), "Hello World");
    }
}
