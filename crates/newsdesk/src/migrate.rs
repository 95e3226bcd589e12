//! Schema creation for the metadata store. The vector index itself is not
//! relational — see `vector_store.rs` — so there are no chunk or embedding
//! tables here, unlike a hybrid-search schema that keeps vectors in SQLite.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    run_migrations_on(&pool).await
}

pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            login_handle TEXT NOT NULL UNIQUE,
            display_name TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            summary TEXT,
            source_url TEXT,
            source_type TEXT NOT NULL,
            published_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            indexed_state TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_user_source_url \
         ON documents(user_id, source_url) WHERE source_url IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_user_content_hash \
         ON documents(user_id, content_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_user_created \
         ON documents(user_id, created_at DESC, id DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            kind TEXT NOT NULL,
            cadence_seconds INTEGER NOT NULL,
            active INTEGER NOT NULL,
            health TEXT NOT NULL DEFAULT 'active',
            last_fetched_at INTEGER,
            last_error TEXT,
            auto_tags_json TEXT NOT NULL DEFAULT '[]',
            consecutive_failures INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_user ON sources(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_active_kind ON sources(active, kind)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_records (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            query TEXT NOT NULL,
            result_count INTEGER NOT NULL,
            elapsed_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_search_records_user_created \
         ON search_records(user_id, created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
