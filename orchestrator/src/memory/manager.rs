//! Memory manager facade (C6): couples the episodic log, the semantic index,
//! the embedder and the audit trail behind the operations the rest of the
//! orchestrator calls (`log_event`, `reflect`, `retrieve`, `remember`).
//!
//! Grounded in the facade pattern of the teacher's
//! `tool_source::memory_tools_source` and `tools::memory::{list_memories,
//! search_memories}`, which likewise sit in front of a store and an embedder
//! and expose a small, task-shaped surface instead of the raw store traits.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Map;

use crate::audit::AuditTrail;
use crate::ids::Clock;

use super::{EpisodicStore, MemoryRecord, SemanticFilter, SemanticStore, StoreError};
use super::embedder::Embedder;

/// The `JoinHandle` returned by `log_event`'s background `reflect` call.
///
/// Spec §5's ordering guarantee ("a successful `log_event` is visible to
/// `retrieve` only after its `reflect` completes") is satisfied by
/// `reflect` running inline inside `search`/`insert`'s own store locks in
/// most components, but for the episodic-to-semantic path `reflect` is
/// spawned in the background so `log_event` itself returns promptly; callers
/// that depend on the ordering must `.wait().await` this handle before
/// calling `retrieve`.
pub struct ReflectionHandle {
    inner: tokio::task::JoinHandle<Result<Vec<MemoryRecord>, StoreError>>,
}

impl ReflectionHandle {
    /// Awaits the background `reflect` call, surfacing a join failure
    /// (panic or cancellation) as a store error rather than propagating it.
    pub async fn wait(self) -> Result<Vec<MemoryRecord>, StoreError> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(StoreError::Unavailable(format!("reflection task: {e}"))),
        }
    }
}

/// One interaction to fold into episodic memory, and optionally reflect
/// into semantic memory.
pub struct EventInput {
    pub user_id: String,
    pub case_id: Option<String>,
    pub text: String,
    pub tags: Vec<String>,
    pub metadata: Map<String, serde_json::Value>,
}

pub struct MemoryManager {
    episodic: Arc<dyn EpisodicStore>,
    semantic: Arc<dyn SemanticStore>,
    embedder: Arc<dyn Embedder>,
    audit: Arc<dyn AuditTrail>,
    clock: Arc<dyn Clock>,
}

impl MemoryManager {
    pub fn new(
        episodic: Arc<dyn EpisodicStore>,
        semantic: Arc<dyn SemanticStore>,
        embedder: Arc<dyn Embedder>,
        audit: Arc<dyn AuditTrail>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            episodic,
            semantic,
            embedder,
            audit,
            clock,
        }
    }

    /// Appends `event` to the episodic log, emits an audit entry, and spawns
    /// `reflect` in the background. Returns the appended record plus a
    /// handle callers awaiting strict read-after-write ordering must join.
    pub async fn log_event(
        &self,
        event: EventInput,
    ) -> Result<(MemoryRecord, ReflectionHandle), StoreError> {
        let record = MemoryRecord::new_episodic(
            event.user_id.clone(),
            event.case_id.clone(),
            event.text.clone(),
            event.tags.clone(),
            event.metadata.clone(),
            self.clock.now(),
        );
        let appended = self.episodic.append(record).await?;

        self.audit
            .append(
                Some(appended.user_id.clone()),
                "memory",
                "log_event",
                serde_json::json!({ "record_id": appended.id, "case_id": appended.case_id }),
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let semantic = self.semantic.clone();
        let embedder = self.embedder.clone();
        let clock = self.clock.clone();
        let to_reflect = appended.clone();
        let handle = tokio::spawn(async move {
            let now = clock.now();
            reflect_one(semantic.as_ref(), embedder.as_ref(), &to_reflect, now).await
        });

        Ok((appended, ReflectionHandle { inner: handle }))
    }

    /// Extracts candidate facts from `record`'s text (currently: the whole
    /// text as a single candidate fact, deduplicated by exact match within
    /// this call only, per spec §4.6), embeds and inserts them into the
    /// semantic store. Blank candidates are skipped.
    pub async fn reflect(&self, record: &MemoryRecord) -> Result<Vec<MemoryRecord>, StoreError> {
        reflect_one(self.semantic.as_ref(), self.embedder.as_ref(), record, self.clock.now()).await
    }

    /// Embeds `query` and searches the semantic store.
    pub async fn retrieve(
        &self,
        query: &str,
        filter: SemanticFilter,
        top_k: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, StoreError> {
        let embeddings = self.embedder.embed(&[query]).await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Serialization("embedder returned no vector".into()))?;
        self.semantic.search(&query_embedding, top_k, filter).await
    }

    /// Directly records an explicit fact (e.g. an intake answer) into both
    /// the episodic log and the semantic index, bypassing `reflect`'s
    /// extraction step since the caller already knows this is atomic and
    /// fact-shaped.
    pub async fn remember(
        &self,
        user_id: &str,
        case_id: Option<&str>,
        text: &str,
        tags: Vec<String>,
        metadata: Map<String, serde_json::Value>,
    ) -> Result<MemoryRecord, StoreError> {
        let now = self.clock.now();
        let episodic_record = MemoryRecord::new_episodic(
            user_id,
            case_id.map(String::from),
            text,
            tags.clone(),
            metadata.clone(),
            now,
        );
        self.episodic.append(episodic_record).await?;

        let embeddings = self.embedder.embed(&[text]).await?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Serialization("embedder returned no vector".into()))?;
        let semantic_record =
            MemoryRecord::new_semantic(user_id, case_id.map(String::from), text, tags, metadata, embedding, now);
        self.semantic.insert(vec![semantic_record.clone()]).await?;

        self.audit
            .append(
                Some(user_id.to_string()),
                "memory",
                "remember",
                serde_json::json!({ "record_id": semantic_record.id, "case_id": case_id }),
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(semantic_record)
    }

    /// Thin wrapper so other components don't need to hold their own
    /// `Arc<dyn AuditTrail>`.
    pub async fn audit_log(
        &self,
        user_id: Option<String>,
        source: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.audit
            .append(user_id, source, action, payload)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

async fn reflect_one(
    semantic: &dyn SemanticStore,
    embedder: &dyn Embedder,
    record: &MemoryRecord,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<MemoryRecord>, StoreError> {
    let candidates: Vec<&str> = [record.text.as_str()]
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if candidates.is_empty() {
        return Ok(vec![]);
    }

    let mut seen = std::collections::HashSet::new();
    let deduped: Vec<&str> = candidates
        .into_iter()
        .filter(|t| seen.insert(*t))
        .collect();

    let embeddings = embedder.embed(&deduped).await?;
    let facts: Vec<MemoryRecord> = deduped
        .into_iter()
        .zip(embeddings)
        .map(|(text, embedding)| {
            MemoryRecord::new_semantic(
                record.user_id.clone(),
                record.case_id.clone(),
                text,
                record.tags.clone(),
                record.metadata.clone(),
                embedding,
                now,
            )
        })
        .collect();

    semantic.insert(facts.clone()).await?;
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditTrail;
    use crate::ids::SystemClock;
    use crate::memory::embedder::HashEmbedder;
    use crate::memory::episodic::InMemoryEpisodicStore;
    use crate::memory::semantic::InMemorySemanticStore;

    fn manager() -> MemoryManager {
        MemoryManager::new(
            Arc::new(InMemoryEpisodicStore::new()),
            Arc::new(InMemorySemanticStore::new(16)),
            Arc::new(HashEmbedder::new(16)),
            Arc::new(InMemoryAuditTrail::new(Arc::new(SystemClock))),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn log_event_then_reflect_handle_makes_record_retrievable() {
        let mgr = manager();
        let (record, handle) = mgr
            .log_event(EventInput {
                user_id: "u1".into(),
                case_id: Some("c1".into()),
                text: "applicant published 3 papers".into(),
                tags: vec!["intake".into()],
                metadata: Map::new(),
            })
            .await
            .unwrap();
        assert_eq!(record.text, "applicant published 3 papers");

        handle.wait().await.unwrap();

        let results = mgr
            .retrieve(
                "applicant published 3 papers",
                SemanticFilter {
                    user_id: Some("u1".into()),
                    case_id: Some("c1".into()),
                    tags_any: vec![],
                },
                5,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn reflect_skips_blank_text() {
        let mgr = manager();
        let blank = MemoryRecord::new_episodic("u1", None, "   ", vec![], Map::new(), Utc::now());
        let facts = mgr.reflect(&blank).await.unwrap();
        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn remember_writes_to_both_stores_and_audits() {
        let mgr = manager();
        let record = mgr
            .remember("u1", Some("c1"), "EB-1A petitioner name: Jane Doe", vec!["intake".into()], Map::new())
            .await
            .unwrap();
        assert_eq!(record.user_id, "u1");

        let results = mgr
            .retrieve(
                "EB-1A petitioner name: Jane Doe",
                SemanticFilter::default(),
                5,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn audit_log_is_callable_directly() {
        let mgr = manager();
        mgr.audit_log(Some("u1".into()), "test", "noop", serde_json::json!({}))
            .await
            .unwrap();
    }
}
