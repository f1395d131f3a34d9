//! Vector storage for embedded code chunks.
//!
//! Two layers:
//!
//! - [`VectorStore`] is the backend contract: named collections of points
//!   (id, vector, flat scalar payload) with similarity search, exact-match
//!   payload filters, and an atomic create-if-absent.
//! - [`CodeVectorIndex`] maps code-index operations onto it. One
//!   collection per (program, version), named
//!   `{prefix}{program}_{version}_{hash}` after sanitization.
//!
//! Payloads are flat: every [`CodeChunk`] field becomes one scalar entry
//! and the chunk's metadata map is stored under `meta.<key>`, so any store
//! that handles string/number/bool values can hold the index.
//!
//! Each collection carries one extra point, the index metadata point. It
//! has a zero vector and records when the index was created, because the
//! backends do not expose collection creation time.
//! [`CodeVectorIndex::get_index_timestamp`] reads it back; search and
//! counts skip it.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{ChunkType, CodeChunk, VectorSearchResult};

/// A scalar payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PayloadValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Int(i) => Some(*i),
            PayloadValue::Float(f) => Some(*f as i64),
            PayloadValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(s: &str) -> Self {
        PayloadValue::Str(s.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(s: String) -> Self {
        PayloadValue::Str(s)
    }
}

impl From<usize> for PayloadValue {
    fn from(n: usize) -> Self {
        PayloadValue::Int(n as i64)
    }
}

impl<T: Into<PayloadValue>> From<Option<T>> for PayloadValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PayloadValue::Null)
    }
}

pub type Payload = BTreeMap<String, PayloadValue>;

/// Exact-match conditions, all of which must hold.
pub type PayloadFilter = BTreeMap<String, PayloadValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    /// Similarity in `[0.0, 1.0]`.
    pub score: f64,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    /// Chunk points, excluding the metadata point.
    pub chunk_count: usize,
    pub dims: usize,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Abstract vector backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection_if_absent`](VectorStore::create_collection_if_absent) | Atomic create; reports whether it created |
/// | [`upsert_points`](VectorStore::upsert_points) | Insert or replace points by id |
/// | [`search`](VectorStore::search) | Ranked similarity search with filters and a score floor |
/// | [`scroll`](VectorStore::scroll) | Filtered listing without a query vector |
/// | [`delete_collection`](VectorStore::delete_collection) / [`delete_point`](VectorStore::delete_point) | Immediate removal |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name (e.g. `"memory"`, `"sqlite"`).
    fn provider_name(&self) -> &str;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Create the collection unless it exists. Returns `true` only for the
    /// caller that actually created it, even under concurrent calls.
    async fn create_collection_if_absent(&self, collection: &str, dims: usize) -> Result<bool>;

    /// Returns `false` if there was nothing to delete.
    async fn delete_collection(&self, collection: &str) -> Result<bool>;

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>>;

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// Points with score `>= min_score` matching `filter`, best first,
    /// ties broken by ascending id.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        min_score: f64,
        filter: &PayloadFilter,
    ) -> Result<Vec<ScoredPoint>>;

    async fn delete_point(&self, collection: &str, id: &str) -> Result<bool>;

    async fn count_points(&self, collection: &str, filter: &PayloadFilter) -> Result<usize>;

    /// Up to `limit` points matching `filter`, ordered by id.
    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<VectorPoint>>;
}

/// Whether `payload` satisfies every condition in `filter`.
pub fn payload_matches(payload: &Payload, filter: &PayloadFilter) -> bool {
    filter
        .iter()
        .all(|(k, v)| payload.get(k).is_some_and(|actual| actual == v))
}

/// Apply the score floor, order by score then id, and truncate. Shared by
/// the brute-force backends.
pub fn rank_points(mut points: Vec<ScoredPoint>, limit: usize, min_score: f64) -> Vec<ScoredPoint> {
    points.retain(|p| p.score >= min_score);
    points.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    points.truncate(limit);
    points
}

/// Collection name for one program version.
///
/// The readable part is lowercased, with anything other than ASCII
/// alphanumerics, `_`, and `-` replaced by `_`. That mapping is lossy, so
/// the name ends with a short hash of the raw ids to keep every
/// (program, version) pair in its own collection.
pub fn collection_name(prefix: &str, program_id: &str, version_id: &str) -> String {
    let readable: String = format!("{}{}_{}", prefix, program_id, version_id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(program_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(version_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}_{}", readable, &digest[..12])
}

pub const POINT_TYPE: &str = "point_type";
pub const POINT_TYPE_CHUNK: &str = "chunk";
pub const POINT_TYPE_INDEX_METADATA: &str = "index_metadata";
const META_PREFIX: &str = "meta.";

/// Flatten a chunk into a scalar payload.
pub fn chunk_to_payload(chunk: &CodeChunk) -> Payload {
    let mut p = Payload::new();
    p.insert(POINT_TYPE.into(), POINT_TYPE_CHUNK.into());
    p.insert("chunk_id".into(), chunk.id.as_str().into());
    p.insert("program_id".into(), chunk.program_id.as_str().into());
    p.insert("version_id".into(), chunk.version_id.as_str().into());
    p.insert("file_path".into(), chunk.file_path.as_str().into());
    p.insert("chunk_type".into(), chunk.chunk_type.as_str().into());
    p.insert("name".into(), chunk.name.as_str().into());
    p.insert("content".into(), chunk.content.as_str().into());
    p.insert("start_line".into(), chunk.start_line.into());
    p.insert("end_line".into(), chunk.end_line.into());
    p.insert("language".into(), chunk.language.as_str().into());
    p.insert("parent_context".into(), chunk.parent_context.clone().into());
    p.insert("content_hash".into(), chunk.content_hash.as_str().into());
    p.insert("embedding_model".into(), chunk.embedding_model.clone().into());
    p.insert("embedding_dims".into(), chunk.embedding_dims.into());
    for (k, v) in &chunk.metadata {
        p.insert(format!("{}{}", META_PREFIX, k), v.as_str().into());
    }
    p
}

/// Rebuild a chunk from its payload. The embedding itself is not restored.
pub fn payload_to_chunk(point_id: &str, payload: &Payload) -> Result<CodeChunk> {
    let text = |key: &str| -> Result<String> {
        payload
            .get(key)
            .and_then(PayloadValue::as_str)
            .map(str::to_string)
            .with_context(|| format!("point {} payload missing '{}'", point_id, key))
    };
    let opt_text = |key: &str| payload.get(key).and_then(PayloadValue::as_str).map(str::to_string);
    let number = |key: &str| -> Result<usize> {
        payload
            .get(key)
            .and_then(PayloadValue::as_i64)
            .map(|n| n.max(0) as usize)
            .with_context(|| format!("point {} payload missing '{}'", point_id, key))
    };

    let chunk_type = text("chunk_type")?
        .parse::<ChunkType>()
        .with_context(|| format!("point {} has an invalid chunk_type", point_id))?;

    let metadata = payload
        .iter()
        .filter_map(|(k, v)| {
            let key = k.strip_prefix(META_PREFIX)?;
            Some((key.to_string(), v.as_str()?.to_string()))
        })
        .collect();

    Ok(CodeChunk {
        id: opt_text("chunk_id").unwrap_or_else(|| point_id.to_string()),
        program_id: text("program_id")?,
        version_id: text("version_id")?,
        file_path: text("file_path")?,
        chunk_type,
        name: text("name")?,
        content: text("content")?,
        start_line: number("start_line")?,
        end_line: number("end_line")?,
        language: text("language")?,
        parent_context: opt_text("parent_context"),
        content_hash: text("content_hash")?,
        embedding: None,
        embedding_model: opt_text("embedding_model"),
        embedding_dims: payload
            .get("embedding_dims")
            .and_then(PayloadValue::as_i64)
            .map(|n| n.max(0) as usize),
        metadata,
    })
}

/// Code-index operations over a [`VectorStore`].
#[derive(Clone)]
pub struct CodeVectorIndex {
    store: Arc<dyn VectorStore>,
    prefix: String,
}

impl CodeVectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn collection_for(&self, program_id: &str, version_id: &str) -> String {
        collection_name(&self.prefix, program_id, version_id)
    }

    fn metadata_point_id(collection: &str) -> String {
        let key = format!("{}:__index_metadata__", collection);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
    }

    fn chunk_filter() -> PayloadFilter {
        let mut f = PayloadFilter::new();
        f.insert(POINT_TYPE.into(), POINT_TYPE_CHUNK.into());
        f
    }

    /// Create the collection for this version if it does not exist and
    /// seed its metadata point. Returns `true` if it was created here.
    pub async fn create_or_update_collection(
        &self,
        program_id: &str,
        version_id: &str,
        dims: usize,
    ) -> Result<bool> {
        let collection = self.collection_for(program_id, version_id);
        let created = self
            .store
            .create_collection_if_absent(&collection, dims)
            .await
            .with_context(|| format!("creating collection {}", collection))?;

        if !created {
            if let Some(existing) = self.store.collection_dims(&collection).await? {
                if existing != dims {
                    tracing::warn!(
                        collection = %collection,
                        existing,
                        requested = dims,
                        "collection exists with different dimensions"
                    );
                }
            }
            return Ok(false);
        }

        let mut payload = Payload::new();
        payload.insert(POINT_TYPE.into(), POINT_TYPE_INDEX_METADATA.into());
        payload.insert("indexed_at".into(), Utc::now().to_rfc3339().into());
        payload.insert("program_id".into(), program_id.into());
        payload.insert("version_id".into(), version_id.into());
        self.store
            .upsert_points(
                &collection,
                vec![VectorPoint {
                    id: Self::metadata_point_id(&collection),
                    vector: vec![0.0; dims],
                    payload,
                }],
            )
            .await?;
        tracing::info!(collection = %collection, dims, "created vector collection");
        Ok(true)
    }

    /// Store embedded chunks. Chunks without an embedding are skipped and
    /// the number skipped is logged. Returns the number stored.
    pub async fn upsert_chunks(
        &self,
        program_id: &str,
        version_id: &str,
        chunks: &[CodeChunk],
    ) -> Result<usize> {
        let collection = self.collection_for(program_id, version_id);
        let points: Vec<VectorPoint> = chunks
            .iter()
            .filter_map(|c| {
                let vector = c.embedding.clone().filter(|v| !v.is_empty())?;
                Some(VectorPoint {
                    id: c.id.clone(),
                    vector,
                    payload: chunk_to_payload(c),
                })
            })
            .collect();

        let dropped = chunks.len() - points.len();
        if dropped > 0 {
            tracing::warn!(collection = %collection, dropped, "skipping chunks without embeddings");
        }
        let stored = points.len();
        if stored > 0 {
            self.store
                .upsert_points(&collection, points)
                .await
                .with_context(|| format!("upserting into {}", collection))?;
        }
        Ok(stored)
    }

    /// Ranked chunks similar to `query`.
    ///
    /// `filters` are exact matches on payload keys (`file_path`,
    /// `chunk_type`, `language`, `meta.<key>`, ...). A missing collection
    /// yields an empty list.
    pub async fn search_similar(
        &self,
        program_id: &str,
        version_id: &str,
        query: &[f32],
        limit: usize,
        min_score: f64,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<VectorSearchResult>> {
        let collection = self.collection_for(program_id, version_id);
        if !self.store.collection_exists(&collection).await? {
            return Ok(Vec::new());
        }

        let mut filter = Self::chunk_filter();
        for (k, v) in filters {
            filter.insert(k.clone(), v.as_str().into());
        }

        let hits = self
            .store
            .search(&collection, query, limit, min_score.clamp(0.0, 1.0), &filter)
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for (i, hit) in hits.into_iter().enumerate() {
            let chunk = payload_to_chunk(&hit.id, &hit.payload)?;
            results.push(VectorSearchResult {
                chunk,
                score: hit.score.clamp(0.0, 1.0),
                rank: i + 1,
            });
        }
        Ok(results)
    }

    pub async fn collection_exists(&self, program_id: &str, version_id: &str) -> Result<bool> {
        self.store
            .collection_exists(&self.collection_for(program_id, version_id))
            .await
    }

    pub async fn delete_collection(&self, program_id: &str, version_id: &str) -> Result<bool> {
        let collection = self.collection_for(program_id, version_id);
        let deleted = self.store.delete_collection(&collection).await?;
        if deleted {
            tracing::info!(collection = %collection, "deleted vector collection");
        }
        Ok(deleted)
    }

    pub async fn delete_chunk(&self, program_id: &str, version_id: &str, chunk_id: &str) -> Result<bool> {
        self.store
            .delete_point(&self.collection_for(program_id, version_id), chunk_id)
            .await
    }

    /// When the index was created, read from the metadata point.
    pub async fn get_index_timestamp(
        &self,
        program_id: &str,
        version_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let collection = self.collection_for(program_id, version_id);
        if !self.store.collection_exists(&collection).await? {
            return Ok(None);
        }
        let mut filter = PayloadFilter::new();
        filter.insert(POINT_TYPE.into(), POINT_TYPE_INDEX_METADATA.into());
        let points = self.store.scroll(&collection, &filter, 1).await?;
        Ok(points
            .first()
            .and_then(|p| p.payload.get("indexed_at"))
            .and_then(PayloadValue::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    pub async fn count_chunks(&self, program_id: &str, version_id: &str) -> Result<usize> {
        let collection = self.collection_for(program_id, version_id);
        if !self.store.collection_exists(&collection).await? {
            return Ok(0);
        }
        self.store.count_points(&collection, &Self::chunk_filter()).await
    }

    /// `None` when the collection does not exist.
    pub async fn stats(&self, program_id: &str, version_id: &str) -> Result<Option<CollectionStats>> {
        let collection = self.collection_for(program_id, version_id);
        let Some(dims) = self.store.collection_dims(&collection).await? else {
            return Ok(None);
        };
        Ok(Some(CollectionStats {
            chunk_count: self.count_chunks(program_id, version_id).await?,
            indexed_at: self.get_index_timestamp(program_id, version_id).await?,
            collection,
            dims,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryVectorStore;
    use super::*;

    fn chunk(id: &str, file: &str, embedding: Option<Vec<f32>>) -> CodeChunk {
        let mut metadata = BTreeMap::new();
        metadata.insert("strategy".to_string(), "function_level".to_string());
        CodeChunk {
            id: id.into(),
            program_id: "shop".into(),
            version_id: "v1".into(),
            file_path: file.into(),
            chunk_type: ChunkType::Function,
            name: format!("fn_{id}"),
            content: format!("// {id}"),
            start_line: 3,
            end_line: 9,
            language: "csharp".into(),
            parent_context: Some("Cart".into()),
            content_hash: "abc".into(),
            embedding_dims: embedding.as_ref().map(Vec::len),
            embedding,
            embedding_model: Some("test".into()),
            metadata,
        }
    }

    fn index() -> CodeVectorIndex {
        CodeVectorIndex::new(Arc::new(InMemoryVectorStore::new()), "code_")
    }

    #[test]
    fn test_collection_name_sanitized() {
        let name = collection_name("code_", "Shop App", "v1.2");
        assert!(name.starts_with("code_shop_app_v1_2_"), "{}", name);
        assert_eq!(name.len(), "code_shop_app_v1_2_".len() + 12);
        assert!(collection_name("code_", "p-1", "main").starts_with("code_p-1_main_"));
        assert_eq!(
            collection_name("code_", "shop", "v1"),
            collection_name("code_", "shop", "v1")
        );
    }

    #[test]
    fn test_collection_name_distinguishes_ids_that_sanitize_alike() {
        assert_ne!(
            collection_name("code_", "Shop App", "v1"),
            collection_name("code_", "shop_app", "v1")
        );
        assert_ne!(
            collection_name("code_", "a_b", "c"),
            collection_name("code_", "a", "b_c")
        );
    }

    #[tokio::test]
    async fn test_forced_delete_leaves_lookalike_collection() {
        let idx = index();
        idx.create_or_update_collection("a_b", "c", 2).await.unwrap();
        idx.create_or_update_collection("a", "b_c", 2).await.unwrap();
        assert!(idx.delete_collection("a_b", "c").await.unwrap());
        assert!(idx.collection_exists("a", "b_c").await.unwrap());
    }

    #[test]
    fn test_payload_roundtrip_keeps_fields() {
        let c = chunk("a", "src/Cart.cs", Some(vec![1.0, 0.0]));
        let payload = chunk_to_payload(&c);
        assert!(payload.values().all(|v| !matches!(v, PayloadValue::Float(_))));
        assert_eq!(payload["meta.strategy"], PayloadValue::Str("function_level".into()));
        let back = payload_to_chunk("a", &payload).unwrap();
        assert_eq!(back.embedding, None);
        assert_eq!(CodeChunk { embedding: c.embedding.clone(), ..back }, c);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_seeds_timestamp() {
        let idx = index();
        assert!(idx.create_or_update_collection("shop", "v1", 2).await.unwrap());
        assert!(!idx.create_or_update_collection("shop", "v1", 2).await.unwrap());
        assert!(idx.get_index_timestamp("shop", "v1").await.unwrap().is_some());
        assert_eq!(idx.count_chunks("shop", "v1").await.unwrap(), 0);
        assert!(idx.get_index_timestamp("shop", "v2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_drops_unembedded_and_is_idempotent() {
        let idx = index();
        idx.create_or_update_collection("shop", "v1", 2).await.unwrap();
        let chunks = vec![
            chunk("a", "src/Cart.cs", Some(vec![1.0, 0.0])),
            chunk("b", "src/Cart.cs", None),
            chunk("c", "src/Order.cs", Some(vec![0.0, 1.0])),
        ];
        assert_eq!(idx.upsert_chunks("shop", "v1", &chunks).await.unwrap(), 2);
        assert_eq!(idx.upsert_chunks("shop", "v1", &chunks).await.unwrap(), 2);
        assert_eq!(idx.count_chunks("shop", "v1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_ranks_filters_and_floors() {
        let idx = index();
        idx.create_or_update_collection("shop", "v1", 2).await.unwrap();
        let chunks = vec![
            chunk("a", "src/Cart.cs", Some(vec![1.0, 0.0])),
            chunk("b", "src/Cart.cs", Some(vec![0.8, 0.6])),
            chunk("c", "src/Order.cs", Some(vec![0.0, 1.0])),
            chunk("d", "src/Order.cs", Some(vec![-1.0, 0.0])),
        ];
        idx.upsert_chunks("shop", "v1", &chunks).await.unwrap();

        let none = BTreeMap::new();
        let results = idx
            .search_similar("shop", "v1", &[1.0, 0.0], 10, 0.5, &none)
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));

        // metadata point never shows up, even with no floor
        let all = idx
            .search_similar("shop", "v1", &[1.0, 0.0], 10, 0.0, &none)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);

        let mut filters = BTreeMap::new();
        filters.insert("file_path".to_string(), "src/Order.cs".to_string());
        let filtered = idx
            .search_similar("shop", "v1", &[1.0, 0.0], 10, 0.0, &filters)
            .await
            .unwrap();
        assert!(filtered.iter().all(|r| r.chunk.file_path == "src/Order.cs"));
    }

    #[tokio::test]
    async fn test_search_missing_collection_is_empty() {
        let idx = index();
        let results = idx
            .search_similar("shop", "nope", &[1.0], 5, 0.5, &BTreeMap::new())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_delete_chunk_and_collection() {
        let idx = index();
        idx.create_or_update_collection("shop", "v1", 2).await.unwrap();
        idx.upsert_chunks("shop", "v1", &[chunk("a", "x.cs", Some(vec![1.0, 0.0]))])
            .await
            .unwrap();
        assert!(idx.delete_chunk("shop", "v1", "a").await.unwrap());
        assert_eq!(idx.count_chunks("shop", "v1").await.unwrap(), 0);

        let stats = idx.stats("shop", "v1").await.unwrap().unwrap();
        assert_eq!(stats.dims, 2);
        assert_eq!(stats.collection, collection_name("code_", "shop", "v1"));

        assert!(idx.delete_collection("shop", "v1").await.unwrap());
        assert!(!idx.collection_exists("shop", "v1").await.unwrap());
        assert!(idx.stats("shop", "v1").await.unwrap().is_none());
    }
}
