//! Semantic store (C3): vector index with metadata filters.
//!
//! Grounded in the teacher's `memory::in_memory_vector_store::InMemoryVectorStore`
//! (cosine similarity, embedding-dimension enforcement); generalized from
//! string-keyed namespaces into the `(user_id, case_id, tags)` filter spec §4.3
//! names.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MemoryRecord, StoreError};

/// AND of these optional predicates; `tags_any` matches if the record has at
/// least one of the listed tags (spec §4.3: "tags (contains any of)").
#[derive(Debug, Clone, Default)]
pub struct SemanticFilter {
    pub user_id: Option<String>,
    pub case_id: Option<String>,
    pub tags_any: Vec<String>,
}

impl SemanticFilter {
    fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(ref u) = self.user_id {
            if &record.user_id != u {
                return false;
            }
        }
        if let Some(ref c) = self.case_id {
            if record.case_id.as_deref() != Some(c.as_str()) {
                return false;
            }
        }
        if !self.tags_any.is_empty() && !record.tags.iter().any(|t| self.tags_any.contains(t)) {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait SemanticStore: Send + Sync {
    async fn insert(&self, records: Vec<MemoryRecord>) -> Result<(), StoreError>;

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: SemanticFilter,
    ) -> Result<Vec<(MemoryRecord, f32)>, StoreError>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// In-process vector store; refuses inserts whose embedding dimension does
/// not equal the index's configured dimension (spec §4.3's "configuration
/// error, not a data error").
pub struct InMemorySemanticStore {
    dimension: usize,
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemorySemanticStore {
    pub fn new(dimension: usize) -> Self {
        tracing::info!(dimension, "semantic store effective dimension");
        Self {
            dimension,
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SemanticStore for InMemorySemanticStore {
    async fn insert(&self, records: Vec<MemoryRecord>) -> Result<(), StoreError> {
        for record in &records {
            let embedding = record
                .embedding
                .as_ref()
                .ok_or_else(|| StoreError::Serialization("semantic record missing embedding".into()))?;
            if embedding.len() != self.dimension {
                return Err(StoreError::EmbeddingDimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }
        // Batch insert is atomic: either every record validated above is
        // appended, or (on the early return) none are.
        let mut guard = self.records.write().await;
        guard.extend(records);
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: SemanticFilter,
    ) -> Result<Vec<(MemoryRecord, f32)>, StoreError> {
        let guard = self.records.read().await;
        let mut scored: Vec<(MemoryRecord, f32)> = guard
            .iter()
            .filter(|r| filter.matches(r))
            .filter_map(|r| {
                r.embedding
                    .as_ref()
                    .map(|e| (r.clone(), cosine_similarity(query_embedding, e)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn semantic_record(
        user: &str,
        case: Option<&str>,
        tags: Vec<&str>,
        embedding: Vec<f32>,
    ) -> MemoryRecord {
        MemoryRecord::new_semantic(
            user,
            case.map(String::from),
            "fact",
            tags.into_iter().map(String::from).collect(),
            Map::new(),
            embedding,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn insert_rejects_wrong_dimension() {
        let store = InMemorySemanticStore::new(4);
        let record = semantic_record("u1", None, vec![], vec![1.0, 2.0]);
        let err = store.insert(vec![record]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::EmbeddingDimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn insert_batch_is_atomic_on_dimension_error() {
        let store = InMemorySemanticStore::new(3);
        let good = semantic_record("u1", None, vec![], vec![1.0, 0.0, 0.0]);
        let bad = semantic_record("u1", None, vec![], vec![1.0, 0.0]);
        let err = store.insert(vec![good, bad]).await;
        assert!(err.is_err());

        let results = store
            .search(&[1.0, 0.0, 0.0], 10, SemanticFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty(), "no partial write on batch failure");
    }

    #[tokio::test]
    async fn search_sorts_by_descending_cosine_similarity() {
        let store = InMemorySemanticStore::new(2);
        store
            .insert(vec![
                semantic_record("u1", None, vec![], vec![1.0, 0.0]),
                semantic_record("u1", None, vec![], vec![0.0, 1.0]),
                semantic_record("u1", None, vec![], vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let results = store
            .search(&[1.0, 0.0], 10, SemanticFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].1 >= results[1].1);
        assert!(results[1].1 >= results[2].1);
    }

    #[tokio::test]
    async fn search_respects_top_k_and_filter() {
        let store = InMemorySemanticStore::new(2);
        store
            .insert(vec![
                semantic_record("u1", Some("c1"), vec!["intake"], vec![1.0, 0.0]),
                semantic_record("u1", Some("c2"), vec!["intake"], vec![1.0, 0.0]),
                semantic_record("u2", Some("c1"), vec!["intake"], vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let filter = SemanticFilter {
            user_id: Some("u1".to_string()),
            case_id: Some("c1".to_string()),
            tags_any: vec![],
        };
        let results = store.search(&[1.0, 0.0], 10, filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.user_id, "u1");
        assert_eq!(results[0].0.case_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn search_top_k_caps_result_count() {
        let store = InMemorySemanticStore::new(2);
        for _ in 0..5 {
            store
                .insert(vec![semantic_record("u1", None, vec![], vec![1.0, 0.0])])
                .await
                .unwrap();
        }
        let results = store
            .search(&[1.0, 0.0], 2, SemanticFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }
}
