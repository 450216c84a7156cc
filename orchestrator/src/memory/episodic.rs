//! Episodic store (C2): an append-only log of events keyed by `(user, case, time)`.
//!
//! Grounded in the teacher's `memory::in_memory_store::InMemoryStore`, but
//! specialized: this store never overwrites a key, and `query` returns
//! records in `created_at` order with `id` as tie-break, per spec §4.2.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MemoryRecord, StoreError};

#[async_trait]
pub trait EpisodicStore: Send + Sync {
    async fn append(&self, record: MemoryRecord) -> Result<MemoryRecord, StoreError>;

    async fn query(
        &self,
        user_id: &str,
        case_id: Option<&str>,
        since: Option<chrono::DateTime<chrono::Utc>>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError>;
}

/// In-process episodic store, for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryEpisodicStore {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemoryEpisodicStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodicStore for InMemoryEpisodicStore {
    async fn append(&self, record: MemoryRecord) -> Result<MemoryRecord, StoreError> {
        let mut guard = self.records.write().await;
        guard.push(record.clone());
        Ok(record)
    }

    async fn query(
        &self,
        user_id: &str,
        case_id: Option<&str>,
        since: Option<chrono::DateTime<chrono::Utc>>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let guard = self.records.read().await;
        let mut matching: Vec<MemoryRecord> = guard
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| case_id.map(|c| r.case_id.as_deref() == Some(c)).unwrap_or(true))
            .filter(|r| since.map(|s| r.created_at >= s).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn record(user: &str, case: Option<&str>, text: &str, at: chrono::DateTime<Utc>) -> MemoryRecord {
        MemoryRecord::new_episodic(user, case.map(String::from), text, vec![], Map::new(), at)
    }

    #[tokio::test]
    async fn query_returns_records_in_created_at_order() {
        let store = InMemoryEpisodicStore::new();
        let t0 = Utc::now();
        let r1 = record("u1", None, "first", t0);
        let r2 = record("u1", None, "second", t0 + chrono::Duration::seconds(1));
        store.append(r2.clone()).await.unwrap();
        store.append(r1.clone()).await.unwrap();

        let results = store.query("u1", None, None, 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "first");
        assert_eq!(results[1].text, "second");
    }

    #[tokio::test]
    async fn query_filters_by_user_and_case() {
        let store = InMemoryEpisodicStore::new();
        let now = Utc::now();
        store
            .append(record("u1", Some("c1"), "a", now))
            .await
            .unwrap();
        store
            .append(record("u1", Some("c2"), "b", now))
            .await
            .unwrap();
        store
            .append(record("u2", Some("c1"), "c", now))
            .await
            .unwrap();

        let results = store.query("u1", Some("c1"), None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "a");
    }

    #[tokio::test]
    async fn query_respects_limit() {
        let store = InMemoryEpisodicStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .append(record(
                    "u1",
                    None,
                    &format!("event-{i}"),
                    now + chrono::Duration::seconds(i),
                ))
                .await
                .unwrap();
        }
        let results = store.query("u1", None, None, 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
