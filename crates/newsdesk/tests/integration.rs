//! End-to-end tests against a real HTTP server bound to a loopback port,
//! backed by the in-memory store, a tempdir-backed vector index, and the
//! deterministic hash embedder / term-overlap reranker. No network access
//! except the RSS scenario, which points the real fetcher at a wiremock
//! server standing in for the feed host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use newsdesk::config::{ExecutorConfig, FetcherConfig, SearchConfig, VectorStoreConfig};
use newsdesk::executor::{Executor, Task, TaskHandler};
use newsdesk::fetcher::Fetcher;
use newsdesk::ingest::IngestCoordinator;
use newsdesk::retrieval::RetrievalPipeline;
use newsdesk::scheduler::SchedulerJob;
use newsdesk::server::{self, AppState};
use newsdesk::vector_store::VectorStoreManager;
use newsdesk::web_fallback::{ExternalHit, ExternalSearchProvider};
use newsdesk_core::embedding::{Embedder, HashEmbedder};
use newsdesk_core::errors::CoreResult;
use newsdesk_core::models::{IndexedState, Source, SourceHealth, SourceKind};
use newsdesk_core::reranker::{Reranker, TermOverlapReranker};
use newsdesk_core::store::memory::InMemoryStore;
use newsdesk_core::store::MetadataStore;
use serde_json::{json, Value};
use tempfile::TempDir;

/// A fully wired stack — everything `main.rs` assembles, minus SQLite and
/// any real model download, so tests run offline and deterministically.
struct TestStack {
    _vector_tmp: TempDir,
    store: Arc<dyn MetadataStore>,
    ingest: Arc<IngestCoordinator>,
    executor: Arc<Executor>,
    retrieval: Arc<RetrievalPipeline>,
}

impl TestStack {
    fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            vectors: self.ingest_vectors(),
            ingest: self.ingest.clone(),
            retrieval: self.retrieval.clone(),
            executor: self.executor.clone(),
            upload_max_bytes: 16 * 1024 * 1024,
        }
    }

    // `IngestCoordinator` owns the `Arc<VectorStoreManager>` privately; the
    // stack keeps its own clone alongside so `AppState` can be built without
    // exposing ingest internals.
    fn ingest_vectors(&self) -> Arc<VectorStoreManager> {
        self.vectors.clone()
    }
}

fn build_stack(executor_config: ExecutorConfig, search_config: SearchConfig, external: Option<Arc<dyn ExternalSearchProvider>>) -> (TestStack, Arc<VectorStoreManager>) {
    build_stack_with_reranker(executor_config, search_config, external, Arc::new(TermOverlapReranker))
}

fn build_stack_with_reranker(
    executor_config: ExecutorConfig,
    search_config: SearchConfig,
    external: Option<Arc<dyn ExternalSearchProvider>>,
    reranker: Arc<dyn Reranker>,
) -> (TestStack, Arc<VectorStoreManager>) {
    let vector_tmp = TempDir::new().unwrap();
    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
    let fetcher = Arc::new(Fetcher::new(&FetcherConfig::default()).unwrap());

    let vector_config = VectorStoreConfig { root: vector_tmp.path().to_path_buf(), ..VectorStoreConfig::default() };
    let vectors = Arc::new(VectorStoreManager::new(&vector_config, embedder.model_id().to_string()));

    let ingest = IngestCoordinator::new(store.clone(), vectors.clone(), embedder.clone(), fetcher, 50.0);
    let executor = Arc::new(Executor::spawn(&executor_config, ingest.clone() as Arc<dyn TaskHandler>));
    ingest.attach_executor(executor.clone());

    let retrieval = Arc::new(RetrievalPipeline::new(store.clone(), vectors.clone(), embedder, reranker, external, None, search_config));

    let stack = TestStack { _vector_tmp: vector_tmp, store, ingest, executor, retrieval };
    (stack, vectors)
}

struct SpawnedVectors(Arc<VectorStoreManager>);

/// Starts the real Axum app on an ephemeral loopback port and waits for
/// `/health`. Mirrors the way the acquisition-harness suite boots its own
/// server under test rather than driving the router in-process.
async fn spawn_server(state: AppState) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = server::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    wait_for_health(port).await;
    port
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not become healthy in time");
}

async fn wait_until_indexed(store: &Arc<dyn MetadataStore>, user_id: &str, document_id: &str) -> IndexedState {
    for _ in 0..100 {
        let doc = store.get_document(user_id, document_id).await.unwrap();
        if let Some(doc) = doc {
            if matches!(doc.indexed_state, IndexedState::Indexed | IndexedState::Failed) {
                return doc.indexed_state;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("document {document_id} was never indexed");
}

/// Canned external provider for the web-fallback scenario; avoids a real
/// network call while still exercising the full trigger/merge path.
struct FakeExternalProvider;

#[async_trait]
impl ExternalSearchProvider for FakeExternalProvider {
    async fn search(&self, query: &str) -> CoreResult<Vec<ExternalHit>> {
        Ok(vec![ExternalHit {
            title: format!("External result for {query}"),
            url: "https://example.invalid/article".to_string(),
            snippet: "Fetched from the web fallback provider.".to_string(),
        }])
    }
}

fn rss_feed_xml(link: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test Feed</title>
<item>
<title>Rust adoption keeps climbing</title>
<link>{link}</link>
<pubDate>{}</pubDate>
<description>Ownership and borrowing continue to win over systems programmers this year.</description>
</item>
</channel></rss>"#,
        chrono::Utc::now().to_rfc2822()
    )
}

// ===== 1. RSS ingest happy path =====

#[tokio::test]
async fn rss_poll_ingests_and_indexes_a_feed_entry() {
    let mock_server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/feed.xml"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(rss_feed_xml("https://news.example.com/rust-adoption")))
        .mount(&mock_server)
        .await;

    let (stack, _vectors) = build_stack(ExecutorConfig::default(), SearchConfig::default(), None);
    let user_id = "user-rss";

    let source = Source {
        id: "src-1".to_string(),
        user_id: user_id.to_string(),
        name: "Example Feed".to_string(),
        url: format!("{}/feed.xml", mock_server.uri()),
        kind: SourceKind::Rss,
        cadence_seconds: 1_800,
        active: true,
        health: SourceHealth::Active,
        last_fetched_at: None,
        last_error: None,
        auto_tags: vec!["tech".to_string()],
        consecutive_failures: 0,
    };
    stack.store.upsert_source(&source).await.unwrap();

    stack
        .ingest
        .handle(Task::RunSchedulerJob { job: SchedulerJob::PollRssSource { source_id: source.id.clone(), user_id: user_id.to_string() } })
        .await
        .unwrap();

    let mut found = None;
    for _ in 0..100 {
        let docs = stack.store.list_documents(user_id, &Default::default(), &newsdesk_core::store::Page { offset: 0, limit: 20 }).await.unwrap();
        if let Some(doc) = docs.into_iter().next() {
            found = Some(doc);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let doc = found.expect("rss poll should have ingested one document");
    assert_eq!(doc.title, "Rust adoption keeps climbing");
    assert_eq!(doc.tags, vec!["tech".to_string()]);

    let state = wait_until_indexed(&stack.store, user_id, &doc.id).await;
    assert_eq!(state, IndexedState::Indexed);

    let source_after = stack.store.get_source(user_id, &source.id).await.unwrap().unwrap();
    assert!(source_after.last_fetched_at.is_some());
    assert_eq!(source_after.consecutive_failures, 0);
}

// ===== 2. Semantic search with rerank =====

#[tokio::test]
async fn semantic_search_ranks_the_most_relevant_document_first() {
    let (stack, _vectors) = build_stack(ExecutorConfig::default(), SearchConfig::default(), None);
    let port = spawn_server(stack.app_state()).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    let user_id = "user-search";

    let docs = [
        ("Kubernetes Deployment Guide", "Kubernetes and Docker containers orchestrate production deployments at scale."),
        ("Sourdough Baking Basics", "Flour, water, and a healthy starter culture make a great sourdough loaf."),
        ("Container Security Tips", "Docker container security starts with minimal base images and signed manifests."),
    ];

    let mut ids = Vec::new();
    for (title, content) in docs {
        let resp = client
            .post(format!("{base}/api/content/documents"))
            .header("x-user-id", user_id)
            .json(&json!({ "title": title, "content": content }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        ids.push(body["id"].as_str().unwrap().to_string());
    }
    for id in &ids {
        wait_until_indexed(&stack.store, user_id, id).await;
    }

    let resp = client
        .post(format!("{base}/api/search/semantic"))
        .header("x-user-id", user_id)
        .json(&json!({ "query": "docker container orchestration" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    let top_title = results[0]["title"].as_str().unwrap();
    assert!(
        top_title == "Kubernetes Deployment Guide" || top_title == "Container Security Tips",
        "expected a docker-related document first, got {top_title}"
    );
    assert!(results[0]["rerank_score"].as_f64().unwrap() > 0.0);
}

/// Scores passages purely by an embedded marker, ignoring shared vocabulary
/// with the query entirely — so rerank order can be engineered independently
/// of the raw vector-distance order the hash embedder produces.
struct MarkerReranker;

impl Reranker for MarkerReranker {
    fn model_id(&self) -> &str {
        "marker-test-v1"
    }

    fn rerank(&self, _query: &str, passages: &[String]) -> Vec<f64> {
        passages
            .iter()
            .map(|p| {
                if p.contains("MARK_HIGH") {
                    3.0
                } else if p.contains("MARK_MID") {
                    2.0
                } else {
                    1.0
                }
            })
            .collect()
    }
}

#[tokio::test]
async fn streamed_result_similarity_is_monotonic_even_when_rerank_reorders_by_distance() {
    let reranker: Arc<dyn Reranker> = Arc::new(MarkerReranker);
    let (stack, vectors) = build_stack_with_reranker(ExecutorConfig::default(), SearchConfig::default(), None, reranker);
    let port = spawn_server(stack.app_state()).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    let user_id = "user-sse-monotonic";

    let docs = [
        ("Low Priority Doc", "river valley river valley river valley MARK_LOW meadow stream"),
        ("Mid Priority Doc", "forest canyon desert plateau MARK_MID tundra glacier"),
        ("High Priority Doc", "volcano archipelago tectonic MARK_HIGH basalt magma"),
    ];
    let mut doc_ids = std::collections::HashMap::new();
    for (title, content) in docs {
        let resp = client
            .post(format!("{base}/api/content/documents"))
            .header("x-user-id", user_id)
            .json(&json!({ "title": title, "content": content }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        let id = body["id"].as_str().unwrap().to_string();
        wait_until_indexed(&stack.store, user_id, &id).await;
        doc_ids.insert(title, id);
    }

    // The query shares every word with the low-priority document's content
    // and none with the high-priority one's, so the hash embedder ranks the
    // low-priority document closest by raw vector distance — the opposite of
    // the marker reranker's order. If the SSE `result_partial` stream
    // reported raw `similarity` instead of the post-rerank calibrated score,
    // this divergence would surface as a non-monotonic sequence below.
    let query = "river valley river valley river valley meadow stream";
    let query_vec = HashEmbedder::default().embed(query);
    let raw_hits = vectors.search(user_id, &query_vec, 10).await.unwrap();
    let raw_similarity_of = |title: &str| {
        let id = &doc_ids[title];
        raw_hits.iter().find(|h| &h.document_id == id).map(|h| h.similarity).unwrap_or(0.0)
    };
    assert!(
        raw_similarity_of("Low Priority Doc") > raw_similarity_of("High Priority Doc"),
        "test setup requires the low-priority doc to be the closer one by raw vector distance"
    );

    let resp = client
        .post(format!("{base}/api/search/semantic/stream"))
        .header("x-user-id", user_id)
        .json(&json!({ "query": query }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();

    let mut similarities = Vec::new();
    for line in body.lines() {
        let Some(json_part) = line.strip_prefix("data: ") else { continue };
        let event: Value = serde_json::from_str(json_part).unwrap();
        if event["event"] == "result_partial" {
            similarities.push(event["similarity"].as_f64().unwrap());
        }
    }
    assert_eq!(similarities.len(), 3, "expected one result_partial event per document, got {similarities:?}");
    for pair in similarities.windows(2) {
        assert!(pair[0] >= pair[1], "result_partial similarity must be non-increasing, got {similarities:?}");
    }
}

// ===== 3. External fallback trigger =====

#[tokio::test]
async fn empty_corpus_triggers_external_fallback() {
    let search_config = SearchConfig { default_limit: 10, external_trigger_threshold: 0.9, external_trigger_min_results: 3 };
    let external: Arc<dyn ExternalSearchProvider> = Arc::new(FakeExternalProvider);
    let (stack, _vectors) = build_stack(ExecutorConfig::default(), search_config, Some(external));
    let port = spawn_server(stack.app_state()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{port}/api/search/semantic"))
        .header("x-user-id", "user-fallback")
        .json(&json!({ "query": "quantum computing breakthroughs", "include_external": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["results"].as_array().unwrap().is_empty());
    assert_eq!(body["metadata"]["used_external"], true);
    let external_results = body["external_results"].as_array().unwrap();
    assert_eq!(external_results.len(), 1);
    assert!(external_results[0]["title"].as_str().unwrap().contains("quantum computing breakthroughs"));
}

// ===== 4. Delete eviction =====

#[tokio::test]
async fn delete_evicts_vectors_and_removes_the_document() {
    let (stack, vectors) = build_stack(ExecutorConfig::default(), SearchConfig::default(), None);
    let port = spawn_server(stack.app_state()).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    let user_id = "user-delete";

    let resp = client
        .post(format!("{base}/api/content/documents"))
        .header("x-user-id", user_id)
        .json(&json!({ "title": "Transient Article", "content": "This article will be deleted shortly after ingestion." }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();
    wait_until_indexed(&stack.store, user_id, &id).await;

    let resp = client.delete(format!("{base}/api/content/documents/{id}")).header("x-user-id", user_id).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let mut gone = false;
    for _ in 0..100 {
        let resp = client.get(format!("{base}/api/content/documents/{id}")).header("x-user-id", user_id).send().await.unwrap();
        if resp.status() == 404 {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "document should be hard-deleted once eviction completes");

    let query_vec = HashEmbedder::default().embed("transient article deleted");
    let hits = vectors.search(user_id, &query_vec, 10).await.unwrap();
    assert!(hits.iter().all(|h| h.document_id != id));
}

// ===== 5. Upload stream =====

#[tokio::test]
async fn csv_upload_streams_per_row_progress_and_a_final_summary() {
    let (stack, _vectors) = build_stack(ExecutorConfig::default(), SearchConfig::default(), None);
    let port = spawn_server(stack.app_state()).await;
    let client = reqwest::Client::new();

    let csv = "title,content\nFirst Piece,An article about distributed systems consensus.\nSecond Piece,An article about garbage collection strategies.\n";
    let part = reqwest::multipart::Part::bytes(csv.as_bytes().to_vec()).file_name("articles.csv").mime_str("text/csv").unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);

    let resp = client
        .post(format!("http://127.0.0.1:{port}/api/content/documents/upload/stream"))
        .header("x-user-id", "user-upload")
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/event-stream");

    let body = resp.text().await.unwrap();
    assert!(body.contains("\"event\":\"started\""));
    assert!(body.contains("\"event\":\"row_ok\""));
    assert!(body.contains("\"event\":\"completed\""));
    assert!(body.contains("\"inserted\":2"));
    assert!(body.contains("\"failed\":0"));
}

// ===== 6. Backpressure =====

#[tokio::test]
async fn full_executor_queue_surfaces_as_503_with_retry_after() {
    let executor_config = ExecutorConfig { workers: 0, queue_capacity: 1, drain_deadline_s: 1 };
    let (stack, _vectors) = build_stack(executor_config, SearchConfig::default(), None);
    let port = spawn_server(stack.app_state()).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    let user_id = "user-backpressure";

    let first = client
        .post(format!("{base}/api/content/documents"))
        .header("x-user-id", user_id)
        .json(&json!({ "title": "First Article", "content": "Content that fills the one available queue slot." }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);

    let second = client
        .post(format!("{base}/api/content/documents"))
        .header("x-user-id", user_id)
        .json(&json!({ "title": "Second Article", "content": "Content that should be rejected as the queue is already full." }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 503);
    assert_eq!(second.headers().get("retry-after").unwrap(), "1");
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["code"], "backpressure");
}
