//! SSE progress protocol shared by the streaming search and upload
//! endpoints: one JSON object per `data:` line, `event` as the discriminant.

use serde::Serialize;
use tokio::sync::mpsc;

/// Formats one SSE `data:` line (including the trailing blank line SSE
/// requires between events). Falls back to an `error` event of its own if
/// serialization itself somehow fails, so a bad event never silently drops.
pub fn to_sse_line<T: Serialize>(event: &T) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(e) => format!("data: {{\"event\":\"error\",\"message\":\"{e}\"}}\n\n"),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SearchProgressEvent {
    Started { query: String },
    Progress { stage: String },
    ResultPartial { document_id: String, title: String, similarity: f32 },
    SummaryToken { token: String },
    SummaryEnd,
    ExternalUnavailable { reason: String },
    Completed { result_count: usize, elapsed_ms: i64, used_external: bool },
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadProgressEvent {
    Started { total_rows: Option<usize> },
    Progress { processed: usize },
    RowOk { row: usize, document_id: String },
    RowError { row: usize, reason: String },
    Completed { inserted: usize, failed: usize },
    Error { code: String, message: String },
}

/// Thin wrapper so pipeline code can emit progress without special-casing
/// "no subscriber" (plain, non-streaming calls) at every call site.
pub struct ProgressSink<T> {
    sender: Option<mpsc::Sender<T>>,
}

impl<T> ProgressSink<T> {
    pub fn new(sender: Option<mpsc::Sender<T>>) -> Self {
        Self { sender }
    }

    pub fn none() -> Self {
        Self { sender: None }
    }

    /// Best-effort: a dropped receiver (client disconnected mid-stream)
    /// just means subsequent emits are no-ops, not an error for the caller.
    pub async fn emit(&self, event: T) {
        if let Some(tx) = &self.sender {
            let _ = tx.send(event).await;
        }
    }

    /// Whether a subscriber is attached at all — callers use this to choose
    /// between streaming intermediate output and collecting it in one shot.
    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_has_data_prefix_and_trailing_blank_line() {
        let line = to_sse_line(&SearchProgressEvent::SummaryEnd);
        assert!(line.starts_with("data: "));
        assert!(line.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn emit_with_no_sender_is_a_silent_no_op() {
        let sink: ProgressSink<SearchProgressEvent> = ProgressSink::none();
        sink.emit(SearchProgressEvent::SummaryEnd).await;
    }
}
