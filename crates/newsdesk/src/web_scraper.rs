//! Fetches individual pages and extracts title/body via a selector
//! fallback chain, respecting robots.txt through the shared [`Fetcher`].

use newsdesk_core::errors::CoreResult;
use scraper::{Html, Selector};

use crate::fetcher::Fetcher;
use crate::rss_crawler::Article;

const TITLE_SELECTORS: &[&str] = &["h1", ".headline", ".title", "[class*=title], [class*=headline]"];
const BODY_SELECTORS: &[&str] = &[
    ".article-content",
    ".post-content",
    ".entry-content",
    ".content",
    "[class*=article] p, [class*=content] p",
];

pub struct WebScraper<'a> {
    fetcher: &'a Fetcher,
    per_host_rps: f64,
}

impl<'a> WebScraper<'a> {
    pub fn new(fetcher: &'a Fetcher, per_host_rps: f64) -> Self {
        Self { fetcher, per_host_rps }
    }

    /// Returns `None` if neither title nor body could be extracted from
    /// any selector in the fallback chain.
    pub async fn fetch(&self, url: &str) -> CoreResult<Option<Article>> {
        let page = self.fetcher.fetch(url, self.per_host_rps).await?;
        let document = Html::parse_document(&page.body);

        let title = first_match(&document, TITLE_SELECTORS);
        let body = first_match_join(&document, BODY_SELECTORS);

        if title.is_none() && body.is_none() {
            return Ok(None);
        }

        Ok(Some(Article {
            title: title.unwrap_or_else(|| "(untitled)".to_string()),
            content: body.unwrap_or_default(),
            source_url: page.final_url,
            published_at: None,
            author: None,
            summary: None,
        }))
    }
}

fn first_match(document: &Html, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else { continue };
        if let Some(el) = document.select(&selector).next() {
            let text: String = el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn first_match_join(document: &Html, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else { continue };
        let paragraphs: Vec<String> = document
            .select(&selector)
            .map(|el| el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty())
            .collect();
        if !paragraphs.is_empty() {
            return Some(paragraphs.join("\n\n"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_body_from_first_matching_selector() {
        let html = r#"<html><body><h1>Big News</h1><div class="article-content"><p>First para.</p><p>Second para.</p></div></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(first_match(&document, TITLE_SELECTORS).as_deref(), Some("Big News"));
        assert_eq!(first_match_join(&document, BODY_SELECTORS).as_deref(), Some("First para.\n\nSecond para."));
    }

    #[test]
    fn falls_back_through_the_chain() {
        let html = r#"<html><body><span class="headline">Fallback</span></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(first_match(&document, TITLE_SELECTORS).as_deref(), Some("Fallback"));
    }
}
