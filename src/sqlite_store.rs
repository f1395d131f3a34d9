//! Persistent [`VectorStore`] on SQLite.
//!
//! Collections are rows in `vector_collections`; points live in
//! `vector_points` with the embedding as a little-endian `f32` BLOB and the
//! payload as a flat JSON object. Similarity is computed in Rust over the
//! collection's points, the same brute-force approach as the in-memory
//! store, which is adequate for one project's worth of chunks.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use code_assist_core::embedding::{blob_to_vec, similarity_score, vec_to_blob};
use code_assist_core::store::{
    payload_matches, rank_points, Payload, PayloadFilter, ScoredPoint, VectorPoint, VectorStore,
};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Wrap an open pool. The schema must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_points(&self, collection: &str) -> Result<Vec<VectorPoint>> {
        let rows = sqlx::query(
            "SELECT point_id, embedding, payload_json FROM vector_points \
             WHERE collection = ? ORDER BY point_id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("point_id");
            let blob: Vec<u8> = row.get("embedding");
            let payload_json: String = row.get("payload_json");
            let payload: Payload = serde_json::from_str(&payload_json)
                .with_context(|| format!("point {} in {} has an unreadable payload", id, collection))?;
            points.push(VectorPoint {
                id,
                vector: blob_to_vec(&blob),
                payload,
            });
        }
        Ok(points)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn provider_name(&self) -> &str {
        "sqlite"
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM vector_collections WHERE name = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_collection_if_absent(&self, collection: &str, dims: usize) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO vector_collections (name, dims, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(collection)
        .bind(dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vector_points WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM vector_collections WHERE name = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d.max(0) as usize))
    }

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let Some(dims) = self.collection_dims(collection).await? else {
            bail!("collection '{}' does not exist", collection);
        };

        let mut tx = self.pool.begin().await?;
        for p in &points {
            if p.vector.len() != dims {
                bail!(
                    "point {} has {} dimensions, collection '{}' expects {}",
                    p.id,
                    p.vector.len(),
                    collection,
                    dims
                );
            }
            let payload_json = serde_json::to_string(&p.payload)?;
            sqlx::query(
                r#"
                INSERT INTO vector_points (collection, point_id, embedding, payload_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(collection, point_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    payload_json = excluded.payload_json
                "#,
            )
            .bind(collection)
            .bind(&p.id)
            .bind(vec_to_blob(&p.vector))
            .bind(payload_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        min_score: f64,
        filter: &PayloadFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let scored = self
            .load_points(collection)
            .await?
            .into_iter()
            .filter(|p| payload_matches(&p.payload, filter))
            .map(|p| ScoredPoint {
                score: similarity_score(query, &p.vector),
                id: p.id,
                payload: p.payload,
            })
            .collect();
        Ok(rank_points(scored, limit, min_score))
    }

    async fn delete_point(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vector_points WHERE collection = ? AND point_id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_points(&self, collection: &str, filter: &PayloadFilter) -> Result<usize> {
        if filter.is_empty() {
            let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_points WHERE collection = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
            return Ok(n.max(0) as usize);
        }
        Ok(self
            .load_points(collection)
            .await?
            .iter()
            .filter(|p| payload_matches(&p.payload, filter))
            .count())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<VectorPoint>> {
        Ok(self
            .load_points(collection)
            .await?
            .into_iter()
            .filter(|p| payload_matches(&p.payload, filter))
            .take(limit)
            .collect())
    }
}

/// Collection names and sizes, for `assist status --all`.
pub async fn list_collections(pool: &SqlitePool) -> Result<BTreeMap<String, (usize, usize)>> {
    let rows = sqlx::query(
        r#"
        SELECT c.name, c.dims, COUNT(p.point_id) AS points
        FROM vector_collections c
        LEFT JOIN vector_points p ON p.collection = c.name
        GROUP BY c.name, c.dims
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let name: String = row.get("name");
            let dims: i64 = row.get("dims");
            let points: i64 = row.get("points");
            (name, (dims.max(0) as usize, points.max(0) as usize))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_assist_core::store::PayloadValue;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteVectorStore) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.db.path = tmp.path().join("data").join("assist.sqlite");
        let store = SqliteVectorStore::open(&config).await.unwrap();
        (tmp, store)
    }

    fn point(id: &str, vector: Vec<f32>, file: &str) -> VectorPoint {
        let mut payload = Payload::new();
        payload.insert("file_path".into(), PayloadValue::Str(file.into()));
        payload.insert("start_line".into(), PayloadValue::Int(3));
        VectorPoint {
            id: id.into(),
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn test_create_if_absent_reports_creator_once() {
        let (_tmp, store) = store().await;
        assert!(store.create_collection_if_absent("c", 2).await.unwrap());
        assert!(!store.create_collection_if_absent("c", 2).await.unwrap());
        assert_eq!(store.collection_dims("c").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_upsert_search_and_payload_roundtrip() {
        let (_tmp, store) = store().await;
        store.create_collection_if_absent("c", 2).await.unwrap();
        store
            .upsert_points(
                "c",
                vec![
                    point("a", vec![1.0, 0.0], "src/a.cs"),
                    point("b", vec![0.0, 1.0], "src/b.cs"),
                ],
            )
            .await
            .unwrap();
        // Re-upsert replaces instead of duplicating.
        store
            .upsert_points("c", vec![point("a", vec![1.0, 0.1], "src/a.cs")])
            .await
            .unwrap();
        assert_eq!(store.count_points("c", &PayloadFilter::new()).await.unwrap(), 2);

        let hits = store
            .search("c", &[1.0, 0.0], 10, 0.5, &PayloadFilter::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].payload.get("start_line"), Some(&PayloadValue::Int(3)));
    }

    #[tokio::test]
    async fn test_delete_collection_removes_points() {
        let (_tmp, store) = store().await;
        store.create_collection_if_absent("c", 2).await.unwrap();
        store
            .upsert_points("c", vec![point("a", vec![1.0, 0.0], "x")])
            .await
            .unwrap();
        assert!(store.delete_collection("c").await.unwrap());
        assert!(!store.collection_exists("c").await.unwrap());
        assert!(!store.delete_collection("c").await.unwrap());
        assert_eq!(store.count_points("c", &PayloadFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let (_tmp, store) = store().await;
        store.create_collection_if_absent("c", 3).await.unwrap();
        let err = store
            .upsert_points("c", vec![point("a", vec![1.0, 0.0], "x")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expects 3"));
    }

    #[tokio::test]
    async fn test_list_collections() {
        let (_tmp, store) = store().await;
        store.create_collection_if_absent("c", 2).await.unwrap();
        store.create_collection_if_absent("d", 4).await.unwrap();
        store
            .upsert_points("c", vec![point("a", vec![1.0, 0.0], "x")])
            .await
            .unwrap();
        let all = list_collections(store.pool()).await.unwrap();
        assert_eq!(all.get("c"), Some(&(2, 1)));
        assert_eq!(all.get("d"), Some(&(4, 0)));
    }
}
