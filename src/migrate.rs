use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database (`assist init`).
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema setup on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per vector collection (one per program version)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Points: embedding as little-endian f32 BLOB, payload as a flat JSON object
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_points (
            collection TEXT NOT NULL,
            point_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            payload_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (collection, point_id),
            FOREIGN KEY (collection) REFERENCES vector_collections(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_points_collection ON vector_points(collection)")
        .execute(pool)
        .await?;

    Ok(())
}
