//! Talks to the configured local LLM endpoint (Ollama-style: newline-delimited
//! JSON objects, `{"response": "...", "done": bool}` per line) for both a
//! blocking `generate` and a token-streaming `generate_stream`.

use std::time::Duration;

use futures::StreamExt;
use newsdesk_core::errors::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::LlmConfig;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    model_id: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| CoreError::dependency(e.to_string()))?;
        Ok(Self { client, endpoint: config.endpoint.clone(), model_id: config.model_id.clone() })
    }

    /// Collects the full streamed response into one string. Used for
    /// server-side summarization where the caller has no stream to forward
    /// tokens onto (e.g. the non-streaming search endpoint).
    pub async fn generate(&self, prompt: &str) -> CoreResult<String> {
        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let body = GenerateRequest { model: &self.model_id, prompt, stream: false };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::dependency(format!("llm request: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::dependency(format!("llm endpoint returned {}", response.status())));
        }
        let chunk: GenerateChunk = response.json().await.map_err(|e| CoreError::dependency(e.to_string()))?;
        Ok(chunk.response)
    }

    /// Streams tokens onto the returned channel as they arrive. The spawned
    /// task stops as soon as `send` fails, so dropping the receiver (the
    /// caller cancelling, or the client disconnecting from the SSE
    /// endpoint upstream) cancels generation without any extra signal.
    pub fn generate_stream(&self, prompt: String) -> mpsc::Receiver<CoreResult<String>> {
        let (tx, rx) = mpsc::channel(32);
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let model_id = self.model_id.clone();

        tokio::spawn(async move {
            let url = format!("{}/api/generate", endpoint.trim_end_matches('/'));
            let body = GenerateRequest { model: &model_id, prompt: &prompt, stream: true };
            let response = match client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(Err(CoreError::dependency(format!("llm request: {e}")))).await;
                    return;
                }
            };
            if !response.status().is_success() {
                let _ = tx.send(Err(CoreError::dependency(format!("llm endpoint returned {}", response.status())))).await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(next) = stream.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(CoreError::dependency(e.to_string()))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<GenerateChunk>(&line) {
                        Ok(chunk) => {
                            if !chunk.response.is_empty() && tx.send(Ok(chunk.response)).await.is_err() {
                                return;
                            }
                            if chunk.done {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, line, "skipping malformed llm stream line");
                        }
                    }
                }
            }
        });

        rx
    }
}
