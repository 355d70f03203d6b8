use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        group_id   TEXT PRIMARY KEY,
        label      TEXT NOT NULL,
        timezone   TEXT NOT NULL,
        version    BIGINT NOT NULL,
        snapshot   JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        event_id    UUID PRIMARY KEY,
        group_id    TEXT NOT NULL,
        session_id  TEXT NOT NULL,
        action      TEXT NOT NULL,
        payload     JSONB NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_group ON events (group_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_session ON events (session_id)",
];

/// Create the snapshot and event tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
