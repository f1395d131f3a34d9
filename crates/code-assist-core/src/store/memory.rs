//! In-memory [`VectorStore`] for tests and single-process use.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every point in the collection.
//! Create-if-absent runs under the write lock, so exactly one concurrent
//! caller sees `true`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::similarity_score;

use super::{payload_matches, rank_points, PayloadFilter, ScoredPoint, VectorPoint, VectorStore};

struct Collection {
    dims: usize,
    // BTreeMap keeps scroll order stable by id.
    points: BTreeMap<String, VectorPoint>,
}

pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("in-memory vector store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("in-memory vector store lock poisoned"))
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn provider_name(&self) -> &str {
        "memory"
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(collection))
    }

    async fn create_collection_if_absent(&self, collection: &str, dims: usize) -> Result<bool> {
        let mut guard = self.write()?;
        if guard.contains_key(collection) {
            return Ok(false);
        }
        guard.insert(
            collection.to_string(),
            Collection {
                dims,
                points: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.write()?.remove(collection).is_some())
    }

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>> {
        Ok(self.read()?.get(collection).map(|c| c.dims))
    }

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut guard = self.write()?;
        let Some(coll) = guard.get_mut(collection) else {
            bail!("collection '{}' does not exist", collection);
        };
        for p in points {
            if p.vector.len() != coll.dims {
                bail!(
                    "point {} has {} dimensions, collection '{}' expects {}",
                    p.id,
                    p.vector.len(),
                    collection,
                    coll.dims
                );
            }
            coll.points.insert(p.id.clone(), p);
        }
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
        let guard = self.read()?;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        let scored = coll
            .points
            .values()
            .filter(|p| payload_matches(&p.payload, filter))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: similarity_score(query, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        Ok(rank_points(scored, limit, min_score))
    }

    async fn delete_point(&self, collection: &str, id: &str) -> Result<bool> {
        let mut guard = self.write()?;
        Ok(guard
            .get_mut(collection)
            .is_some_and(|c| c.points.remove(id).is_some()))
    }

    async fn count_points(&self, collection: &str, filter: &PayloadFilter) -> Result<usize> {
        let guard = self.read()?;
        Ok(guard.get(collection).map_or(0, |c| {
            c.points
                .values()
                .filter(|p| payload_matches(&p.payload, filter))
                .count()
        }))
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<VectorPoint>> {
        let guard = self.read()?;
        Ok(guard.get(collection).map_or_else(Vec::new, |c| {
            c.points
                .values()
                .filter(|p| payload_matches(&p.payload, filter))
                .take(limit)
                .cloned()
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{Payload, PayloadValue};

    fn point(id: &str, vector: Vec<f32>, lang: &str) -> VectorPoint {
        let mut payload = Payload::new();
        payload.insert("language".into(), PayloadValue::Str(lang.into()));
        VectorPoint {
            id: id.into(),
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn test_concurrent_create_has_single_winner() {
        let store = Arc::new(InMemoryVectorStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.create_collection_if_absent("c", 3).await.unwrap()
            }));
        }
        let mut created = 0;
        for h in handles {
            if h.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_ties_break_by_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection_if_absent("c", 2).await.unwrap();
        store
            .upsert_points(
                "c",
                vec![
                    point("z", vec![1.0, 0.0], "cs"),
                    point("a", vec![2.0, 0.0], "cs"),
                    point("m", vec![0.0, 1.0], "py"),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search("c", &[1.0, 0.0], 10, 0.0, &PayloadFilter::new())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z", "m"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new();
        store.create_collection_if_absent("c", 2).await.unwrap();
        let err = store
            .upsert_points("c", vec![point("x", vec![1.0], "cs")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expects 2"));
    }

    #[tokio::test]
    async fn test_upsert_into_missing_collection_fails() {
        let store = InMemoryVectorStore::new();
        assert!(store.upsert_points("nope", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_scroll_and_count_with_filter() {
        let store = InMemoryVectorStore::new();
        store.create_collection_if_absent("c", 2).await.unwrap();
        store
            .upsert_points(
                "c",
                vec![
                    point("1", vec![1.0, 0.0], "cs"),
                    point("2", vec![1.0, 0.0], "py"),
                    point("3", vec![1.0, 0.0], "cs"),
                ],
            )
            .await
            .unwrap();
        let mut filter = PayloadFilter::new();
        filter.insert("language".into(), PayloadValue::Str("cs".into()));
        assert_eq!(store.count_points("c", &filter).await.unwrap(), 2);
        let first = store.scroll("c", &filter, 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "1");
    }
}
