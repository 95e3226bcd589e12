//! External search used when the user's own corpus doesn't have enough
//! relevant material for a query. A single-method trait so swapping search
//! providers never touches the retrieval pipeline.

use async_trait::async_trait;
use newsdesk_core::errors::{CoreError, CoreResult};
use serde::Deserialize;

use crate::config::WebFallbackConfig;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExternalHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait ExternalSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> CoreResult<Vec<ExternalHit>>;
}

#[derive(Deserialize)]
struct RawHit {
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    results: Vec<RawHit>,
}

/// Queries a JSON search API over HTTP. Any non-2xx response or transport
/// error is `Dependency`, which the retrieval pipeline treats as
/// non-fatal: a failed external lookup degrades the response, it doesn't
/// fail the request.
pub struct HttpExternalSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_hits: usize,
}

impl HttpExternalSearchProvider {
    pub fn new(config: &WebFallbackConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::dependency(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            max_hits: config.max_hits,
        })
    }
}

#[async_trait]
impl ExternalSearchProvider for HttpExternalSearchProvider {
    async fn search(&self, query: &str) -> CoreResult<Vec<ExternalHit>> {
        let mut request = self.client.get(&self.endpoint).query(&[("q", query)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| CoreError::dependency(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::dependency(format!("external search returned {}", response.status())));
        }

        let parsed: RawResponse = response.json().await.map_err(|e| CoreError::dependency(e.to_string()))?;
        Ok(parsed
            .results
            .into_iter()
            .take(self.max_hits)
            .map(|r| ExternalHit { title: r.title, url: r.url, snippet: r.snippet })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_nothing_by_default() {
        let config = WebFallbackConfig { api_key: None, endpoint: "https://example.invalid/search".to_string(), max_hits: 5 };
        assert!(HttpExternalSearchProvider::new(&config).is_ok());
    }
}
