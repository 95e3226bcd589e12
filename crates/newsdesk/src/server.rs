//! HTTP API: content CRUD, streaming upload/search, source management, and
//! tag/query analytics. Authentication is a collaborator's concern (out of
//! scope here); the caller's identity is carried in an `x-user-id` header
//! and every handler scopes its store/vector-index access to that user.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use newsdesk_core::errors::CoreError;
use newsdesk_core::models::{Document, Source, SourceHealth, SourceKind, SourceType};
use newsdesk_core::store::{DocumentFilter, MetadataStore, Page, TagCount, TrendingQuery};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use uuid::Uuid;

use crate::executor::{Executor, Task};
use crate::ingest::IngestCoordinator;
use crate::progress::{to_sse_line, ProgressSink, SearchProgressEvent, UploadProgressEvent};
use crate::retrieval::RetrievalPipeline;
use crate::scheduler::SchedulerJob;
use crate::structured_importer::{self, RowOutcome};
use crate::vector_store::VectorStoreManager;
use crate::web_fallback::ExternalHit;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub vectors: Arc<VectorStoreManager>,
    pub ingest: Arc<IngestCoordinator>,
    pub retrieval: Arc<RetrievalPipeline>,
    pub executor: Arc<Executor>,
    pub upload_max_bytes: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/content/documents", post(create_document).get(list_documents))
        .route(
            "/api/content/documents/{id}",
            get(get_document).put(update_document).delete(delete_document),
        )
        .route("/api/content/documents/upload/stream", post(upload_stream))
        .route("/api/search/semantic", post(search))
        .route("/api/search/semantic/stream", post(search_stream))
        .route("/api/sources", get(list_sources).post(create_source))
        .route("/api/sources/{id}", put(update_source).delete(delete_source))
        .route("/api/sources/{id}/poll", post(poll_source))
        .route("/api/analytics/keywords", get(top_tags))
        .route("/api/analytics/trending-queries", get(trending_queries))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// ===== errors =====

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_secs: Option<u64>,
}

impl AppError {
    fn validation(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "validation", message: message.into(), retry_after_secs: None }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, code: "unauthorized", message: message.into(), retry_after_secs: None }
    }

    fn payload_too_large() -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            code: "validation",
            message: "upload exceeds the configured maximum size".to_string(),
            retry_after_secs: None,
        }
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        let (status, retry_after_secs) = match &e {
            CoreError::Validation { .. } => (StatusCode::BAD_REQUEST, None),
            CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, None),
            CoreError::CrossUserForbidden { .. } => (StatusCode::FORBIDDEN, None),
            CoreError::Duplicate { .. } => (StatusCode::CONFLICT, None),
            CoreError::Dependency { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            CoreError::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
            CoreError::Backpressure { .. } => (StatusCode::SERVICE_UNAVAILABLE, Some(1)),
            CoreError::Corrupt { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            CoreError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, None),
        };
        Self { status, code: e.code(), message: e.to_string(), retry_after_secs }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response =
            (self.status, Json(ErrorBody { code: self.code.to_string(), message: self.message, details: None })).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Identity is a collaborator's concern; this is the seam it plugs into.
fn require_user(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::unauthorized("missing x-user-id header"))
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .expect("static sse response headers are always valid")
}

// ===== content =====

#[derive(Deserialize)]
struct CreateDocumentRequest {
    title: String,
    content: String,
    source_url: Option<String>,
    published_at: Option<i64>,
    #[serde(default)]
    tags: Vec<String>,
}

async fn create_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let user_id = require_user(&headers)?;
    let doc = state
        .ingest
        .ingest_document(&user_id, &req.title, &req.content, req.source_url, SourceType::Manual, req.published_at, req.tags)
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Deserialize)]
struct ListDocumentsQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    source_type: Option<String>,
    date_from: Option<i64>,
    date_to: Option<i64>,
    tags: Option<String>,
    search: Option<String>,
}

async fn list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListDocumentsQuery>,
) -> Result<Json<Vec<Document>>, AppError> {
    let user_id = require_user(&headers)?;
    let page_number = q.page.unwrap_or(1).max(1);
    let per_page = q.per_page.unwrap_or(20).clamp(1, 100);
    let filter = DocumentFilter {
        source_type: q.source_type,
        date_from: q.date_from,
        date_to: q.date_to,
        tags_any: q
            .tags
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default(),
        text_like: q.search,
    };
    let page = Page { offset: (page_number - 1) * per_page, limit: per_page };
    let documents = state.store.list_documents(&user_id, &filter, &page).await?;
    Ok(Json(documents))
}

async fn get_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let user_id = require_user(&headers)?;
    let doc = state
        .store
        .get_document(&user_id, &id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
    Ok(Json(doc))
}

#[derive(Deserialize)]
struct UpdateDocumentRequest {
    summary: Option<String>,
    tags: Option<Vec<String>>,
}

async fn update_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateDocumentRequest>,
) -> Result<Json<Document>, AppError> {
    let user_id = require_user(&headers)?;
    state.store.update_document_fields(&user_id, &id, req.summary, req.tags).await?;
    let doc = state
        .store
        .get_document(&user_id, &id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
    Ok(Json(doc))
}

async fn delete_document(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    let user_id = require_user(&headers)?;
    state.ingest.delete_document(&user_id, &id).await?;
    Ok(StatusCode::OK)
}

async fn upload_stream(State(state): State<AppState>, headers: HeaderMap, mut multipart: Multipart) -> Result<Response, AppError> {
    let user_id = require_user(&headers)?;

    let mut filename: Option<String> = None;
    let mut data: Vec<u8> = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::validation(e.to_string()))? {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map_err(|e| AppError::validation(e.to_string()))?;
            if bytes.len() as u64 > state.upload_max_bytes {
                return Err(AppError::payload_too_large());
            }
            data = bytes.to_vec();
        }
    }
    let filename = filename.ok_or_else(|| AppError::validation("multipart body must include a 'file' field"))?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_upload(state.ingest.clone(), user_id, filename, data, tx));

    let stream = ReceiverStream::new(rx).map(|event: UploadProgressEvent| Ok::<_, std::io::Error>(to_sse_line(&event).into_bytes()));
    Ok(sse_response(Body::from_stream(stream)))
}

async fn run_upload(
    ingest: Arc<IngestCoordinator>,
    user_id: String,
    filename: String,
    data: Vec<u8>,
    tx: mpsc::Sender<UploadProgressEvent>,
) {
    let sink = ProgressSink::new(Some(tx));
    let rows = if filename.to_lowercase().ends_with(".xlsx") {
        structured_importer::parse_xlsx(&data)
    } else {
        structured_importer::parse_csv(&data)
    };
    sink.emit(UploadProgressEvent::Started { total_rows: Some(rows.len()) }).await;

    let mut inserted = 0usize;
    let mut failed = 0usize;
    for outcome in rows {
        match outcome {
            RowOutcome::Ok(row) => {
                let row_number = row.row;
                match ingest
                    .ingest_document(&user_id, &row.title, &row.content, row.source_url, SourceType::Upload, row.published_at, row.tags)
                    .await
                {
                    Ok(doc) => {
                        inserted += 1;
                        sink.emit(UploadProgressEvent::RowOk { row: row_number, document_id: doc.id }).await;
                    }
                    Err(e) => {
                        failed += 1;
                        sink.emit(UploadProgressEvent::RowError { row: row_number, reason: e.to_string() }).await;
                    }
                }
            }
            RowOutcome::Error { row, reason } => {
                failed += 1;
                sink.emit(UploadProgressEvent::RowError { row, reason }).await;
            }
        }
        sink.emit(UploadProgressEvent::Progress { processed: inserted + failed }).await;
    }
    sink.emit(UploadProgressEvent::Completed { inserted, failed }).await;
}

// ===== search =====

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<i64>,
    #[serde(default)]
    include_external: bool,
    #[serde(default)]
    summarize: bool,
}

#[derive(Serialize)]
struct SearchMetadata {
    used_external: bool,
    elapsed_ms: i64,
    summary: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<crate::retrieval::SearchHit>,
    external_results: Vec<ExternalHit>,
    metadata: SearchMetadata,
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let user_id = require_user(&headers)?;
    let sink = ProgressSink::none();
    let outcome = state
        .retrieval
        .search(&user_id, &req.query, req.limit, req.include_external, req.summarize, &sink)
        .await?;
    Ok(Json(SearchResponse {
        results: outcome.hits,
        external_results: outcome.external,
        metadata: SearchMetadata { used_external: outcome.used_external, elapsed_ms: outcome.elapsed_ms, summary: outcome.summary },
    }))
}

async fn search_stream(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<SearchRequest>) -> Result<Response, AppError> {
    let user_id = require_user(&headers)?;
    let (tx, rx) = mpsc::channel(32);
    let sink = ProgressSink::new(Some(tx));
    let retrieval = state.retrieval.clone();
    tokio::spawn(async move {
        let _ = retrieval.search(&user_id, &req.query, req.limit, req.include_external, req.summarize, &sink).await;
    });

    let stream = ReceiverStream::new(rx).map(|event: SearchProgressEvent| Ok::<_, std::io::Error>(to_sse_line(&event).into_bytes()));
    Ok(sse_response(Body::from_stream(stream)))
}

// ===== sources =====

fn parse_source_kind(raw: &str) -> Result<SourceKind, AppError> {
    match raw.to_lowercase().as_str() {
        "rss" => Ok(SourceKind::Rss),
        "web" => Ok(SourceKind::Web),
        other => Err(AppError::validation(format!("unknown source kind: {other}"))),
    }
}

async fn list_sources(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<Source>>, AppError> {
    let user_id = require_user(&headers)?;
    Ok(Json(state.store.list_sources(&user_id).await?))
}

#[derive(Deserialize)]
struct CreateSourceRequest {
    name: String,
    url: String,
    kind: String,
    #[serde(default = "default_cadence_seconds")]
    cadence_seconds: i64,
    #[serde(default)]
    auto_tags: Vec<String>,
}

fn default_cadence_seconds() -> i64 {
    1_800
}

async fn create_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSourceRequest>,
) -> Result<(StatusCode, Json<Source>), AppError> {
    let user_id = require_user(&headers)?;
    let kind = parse_source_kind(&req.kind)?;
    let source = Source {
        id: Uuid::new_v4().to_string(),
        user_id,
        name: req.name,
        url: req.url,
        kind,
        cadence_seconds: req.cadence_seconds,
        active: true,
        health: SourceHealth::Active,
        last_fetched_at: None,
        last_error: None,
        auto_tags: req.auto_tags,
        consecutive_failures: 0,
    };
    state.store.upsert_source(&source).await?;
    Ok((StatusCode::CREATED, Json(source)))
}

#[derive(Deserialize)]
struct UpdateSourceRequest {
    name: Option<String>,
    url: Option<String>,
    cadence_seconds: Option<i64>,
    active: Option<bool>,
    auto_tags: Option<Vec<String>>,
}

async fn update_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateSourceRequest>,
) -> Result<Json<Source>, AppError> {
    let user_id = require_user(&headers)?;
    let mut source = state
        .store
        .get_source(&user_id, &id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("source {id}")))?;

    if let Some(name) = req.name {
        source.name = name;
    }
    if let Some(url) = req.url {
        source.url = url;
    }
    if let Some(cadence) = req.cadence_seconds {
        source.cadence_seconds = cadence;
    }
    if let Some(active) = req.active {
        source.active = active;
        source.health = if active { SourceHealth::Active } else { SourceHealth::Paused };
    }
    if let Some(tags) = req.auto_tags {
        source.auto_tags = tags;
    }

    state.store.upsert_source(&source).await?;
    Ok(Json(source))
}

async fn delete_source(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    let user_id = require_user(&headers)?;
    state.store.delete_source(&user_id, &id).await?;
    Ok(StatusCode::OK)
}

async fn poll_source(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    let user_id = require_user(&headers)?;
    let source = state
        .store
        .get_source(&user_id, &id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("source {id}")))?;
    if source.kind != SourceKind::Rss {
        return Err(AppError::validation("manual poll is only supported for rss sources; web sources are swept on schedule"));
    }

    state
        .executor
        .submit(Task::RunSchedulerJob { job: SchedulerJob::PollRssSource { source_id: source.id, user_id } })?;
    Ok(StatusCode::ACCEPTED)
}

// ===== analytics =====

#[derive(Deserialize)]
struct KeywordsQuery {
    limit: Option<i64>,
}

async fn top_tags(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<KeywordsQuery>,
) -> Result<Json<Vec<TagCount>>, AppError> {
    let user_id = require_user(&headers)?;
    let n = q.limit.unwrap_or(20).clamp(1, 100);
    Ok(Json(state.store.top_tags(&user_id, n).await?))
}

#[derive(Deserialize)]
struct TrendingQueriesQuery {
    window: Option<String>,
    limit: Option<i64>,
}

async fn trending_queries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<TrendingQueriesQuery>,
) -> Result<Json<Vec<TrendingQuery>>, AppError> {
    let user_id = require_user(&headers)?;
    let window_secs = parse_window(q.window.as_deref().unwrap_or("7d"));
    let n = q.limit.unwrap_or(10).clamp(1, 100);
    Ok(Json(state.store.trending_queries(&user_id, window_secs, n).await?))
}

/// Parses a trailing-unit duration like `7d`, `24h`, `30m`. Unparsable
/// input falls back to 7 days rather than erroring on an analytics query.
fn parse_window(raw: &str) -> i64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 7 * 86_400;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    match (digits.parse::<i64>(), unit) {
        (Ok(n), "d") => n * 86_400,
        (Ok(n), "h") => n * 3_600,
        (Ok(n), "m") => n * 60,
        (Ok(n), "s") => n,
        _ => {
            warn!(window = raw, "unparsable trending-queries window, defaulting to 7d");
            7 * 86_400
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_window_accepts_day_hour_minute_suffixes() {
        assert_eq!(parse_window("7d"), 7 * 86_400);
        assert_eq!(parse_window("24h"), 24 * 3_600);
        assert_eq!(parse_window("30m"), 30 * 60);
    }

    #[test]
    fn parse_window_falls_back_on_garbage() {
        assert_eq!(parse_window("banana"), 7 * 86_400);
    }

    #[test]
    fn unknown_source_kind_is_rejected() {
        assert!(parse_source_kind("ftp").is_err());
        assert!(parse_source_kind("rss").is_ok());
    }
}
