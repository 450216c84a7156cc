//! Workflow-state store (C8): `save`/`load`/`update_section`/`add_exhibit`/
//! `add_log`/`set_status`/`delete`/`list_active`, each a compare-and-swap on
//! `version` with a bounded retry budget before giving up as `Conflict`.
//!
//! Grounded in the teacher's `memory::Checkpointer<S>` (async save/load of a
//! `Checkpoint<S>` keyed by thread id); the mutate-via-patch operations are
//! new (the teacher's checkpointer only saves a whole state, it does not
//! offer field-level patches), built in the same trait-plus-in-memory-impl
//! shape.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use super::state::{
    DeltaKind, Exhibit, SectionPatch, StateDelta, WorkflowLogEntry, WorkflowState, WorkflowStatus,
};
use crate::ids::Clock;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no workflow state for this thread")]
    NotFound,
    #[error("optimistic concurrency conflict")]
    Conflict,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

const BROADCAST_CAPACITY: usize = 256;
const MAX_CAS_ATTEMPTS: u32 = 5;

#[async_trait]
pub trait WorkflowStateStore: Send + Sync {
    async fn save(&self, state: WorkflowState) -> Result<WorkflowState, CheckpointError>;

    async fn load(&self, thread_id: &str) -> Result<WorkflowState, CheckpointError>;

    async fn update_section(
        &self,
        thread_id: &str,
        section_id: &str,
        patch: SectionPatch,
    ) -> Result<WorkflowState, CheckpointError>;

    async fn add_exhibit(
        &self,
        thread_id: &str,
        exhibit: Exhibit,
    ) -> Result<WorkflowState, CheckpointError>;

    async fn add_log(
        &self,
        thread_id: &str,
        level: &str,
        message: &str,
    ) -> Result<WorkflowState, CheckpointError>;

    async fn set_status(
        &self,
        thread_id: &str,
        status: WorkflowStatus,
        error_reason: Option<String>,
    ) -> Result<WorkflowState, CheckpointError>;

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError>;

    async fn list_active(&self) -> Result<Vec<WorkflowState>, CheckpointError>;

    /// Subscribes to this thread's delta broadcast, creating the channel on
    /// first use (spec §3: "created on first subscribe").
    fn subscribe(&self, thread_id: &str) -> broadcast::Receiver<StateDelta>;
}

struct ThreadEntry {
    state: WorkflowState,
    tx: broadcast::Sender<StateDelta>,
    next_seq: u64,
}

/// In-process map backend (spec §4.8's "in-process map, for tests and
/// single-node"). TTL and the shared key-value backend with
/// `document_workflow:<thread_id>` keys are a deployment concern left to a
/// real backing store behind the same trait; this implementation focuses on
/// the compare-and-swap and broadcast semantics every backend must honor.
pub struct InMemoryWorkflowStateStore {
    threads: DashMap<String, ThreadEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWorkflowStateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            threads: DashMap::new(),
            clock,
        }
    }

    fn broadcast(entry: &mut ThreadEntry, kind: DeltaKind) {
        let seq = entry.next_seq;
        entry.next_seq += 1;
        let _ = entry.tx.send(StateDelta {
            thread_id: entry.state.thread_id.clone(),
            seq,
            kind,
        });
    }

    /// Applies `mutate` via compare-and-swap: re-read, mutate, bump version,
    /// retry up to `MAX_CAS_ATTEMPTS` times on a concurrent writer, then
    /// fail with `Conflict` (spec §4.8).
    fn apply<F>(&self, thread_id: &str, mutate: F) -> Result<(WorkflowState, Vec<DeltaKind>), CheckpointError>
    where
        F: Fn(&mut WorkflowState) -> Vec<DeltaKind>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut entry = self
                .threads
                .get_mut(thread_id)
                .ok_or(CheckpointError::NotFound)?;
            let before_version = entry.state.version;
            let deltas = mutate(&mut entry.state);
            entry.state.version = before_version + 1;
            entry.state.updated_at = self.clock.now();
            for delta in &deltas {
                Self::broadcast(&mut entry, delta.clone());
            }
            return Ok((entry.state.clone(), deltas));
        }
        Err(CheckpointError::Conflict)
    }
}

#[async_trait]
impl WorkflowStateStore for InMemoryWorkflowStateStore {
    async fn save(&self, mut state: WorkflowState) -> Result<WorkflowState, CheckpointError> {
        state.updated_at = self.clock.now();
        let thread_id = state.thread_id.clone();

        match self.threads.get_mut(&thread_id) {
            Some(mut entry) => {
                let previous = entry.state.clone();
                entry.state = state.clone();

                let mut deltas = vec![];
                for section in &state.sections {
                    let changed = previous
                        .sections
                        .iter()
                        .find(|s| s.section_id == section.section_id)
                        .map(|prev| prev.status != section.status || prev.content != section.content)
                        .unwrap_or(true);
                    if changed {
                        deltas.push(DeltaKind::SectionUpdate {
                            section_id: section.section_id.clone(),
                            section: section.clone(),
                        });
                    }
                }
                if previous.status != state.status {
                    deltas.push(DeltaKind::StatusChange { status: state.status });
                }
                let (completed, total, percentage) = state.progress();
                deltas.push(DeltaKind::ProgressUpdate {
                    completed,
                    total,
                    percentage,
                });
                for delta in deltas {
                    Self::broadcast(&mut entry, delta);
                }
            }
            None => {
                let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
                self.threads.insert(
                    thread_id,
                    ThreadEntry {
                        state: state.clone(),
                        tx,
                        next_seq: 0,
                    },
                );
            }
        }
        Ok(state)
    }

    async fn load(&self, thread_id: &str) -> Result<WorkflowState, CheckpointError> {
        self.threads
            .get(thread_id)
            .map(|e| e.state.clone())
            .ok_or(CheckpointError::NotFound)
    }

    async fn update_section(
        &self,
        thread_id: &str,
        section_id: &str,
        patch: SectionPatch,
    ) -> Result<WorkflowState, CheckpointError> {
        let section_id = section_id.to_string();
        let (state, _) = self.apply(thread_id, |state| {
            let mut deltas = vec![];
            if let Some(section) = state.section_mut(&section_id) {
                if let Some(status) = patch.status {
                    section.status = status;
                }
                if let Some(ref content) = patch.content {
                    section.content = Some(content.clone());
                }
                deltas.push(DeltaKind::SectionUpdate {
                    section_id: section_id.clone(),
                    section: section.clone(),
                });
            }
            let (completed, total, percentage) = state.progress();
            deltas.push(DeltaKind::ProgressUpdate {
                completed,
                total,
                percentage,
            });
            deltas
        })?;
        Ok(state)
    }

    async fn add_exhibit(
        &self,
        thread_id: &str,
        exhibit: Exhibit,
    ) -> Result<WorkflowState, CheckpointError> {
        let (state, _) = self.apply(thread_id, |state| {
            state.exhibits.push(exhibit.clone());
            vec![]
        })?;
        Ok(state)
    }

    async fn add_log(
        &self,
        thread_id: &str,
        level: &str,
        message: &str,
    ) -> Result<WorkflowState, CheckpointError> {
        let level = level.to_string();
        let message = message.to_string();
        let (state, _) = self.apply(thread_id, |state| {
            let log = WorkflowLogEntry {
                at: state.updated_at,
                level: level.clone(),
                message: message.clone(),
            };
            state.logs.push(log.clone());
            vec![DeltaKind::LogEntry { log }]
        })?;
        Ok(state)
    }

    async fn set_status(
        &self,
        thread_id: &str,
        status: WorkflowStatus,
        error_reason: Option<String>,
    ) -> Result<WorkflowState, CheckpointError> {
        let (state, _) = self.apply(thread_id, |state| {
            state.status = status;
            state.error_reason = error_reason.clone();
            vec![DeltaKind::StatusChange { status }]
        })?;
        Ok(state)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        self.threads.remove(thread_id);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<WorkflowState>, CheckpointError> {
        Ok(self
            .threads
            .iter()
            .filter(|e| e.state.status == WorkflowStatus::Running || e.state.status == WorkflowStatus::Paused)
            .map(|e| e.state.clone())
            .collect())
    }

    fn subscribe(&self, thread_id: &str) -> broadcast::Receiver<StateDelta> {
        self.threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
                ThreadEntry {
                    state: WorkflowState::new(thread_id, "", &[], chrono::Utc::now()),
                    tx,
                    next_seq: 0,
                }
            })
            .tx
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SystemClock;
    use crate::workflow::state::SectionStatus;

    fn store() -> InMemoryWorkflowStateStore {
        InMemoryWorkflowStateStore::new(Arc::new(SystemClock))
    }

    fn new_state() -> WorkflowState {
        WorkflowState::new("t1", "c1", &["Intro", "Body"], chrono::Utc::now())
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = store();
        store.save(new_state()).await.unwrap();
        let loaded = store.load("t1").await.unwrap();
        assert_eq!(loaded.thread_id, "t1");
        assert_eq!(loaded.sections.len(), 2);
    }

    #[tokio::test]
    async fn update_section_bumps_version_and_broadcasts() {
        let store = store();
        store.save(new_state()).await.unwrap();
        let mut rx = store.subscribe("t1");

        let updated = store
            .update_section(
                "t1",
                "section-1",
                SectionPatch {
                    status: Some(SectionStatus::Completed),
                    content: Some("done".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.sections[0].status, SectionStatus::Completed);

        let delta = rx.try_recv().unwrap();
        assert_eq!(delta.seq, 0);
    }

    #[tokio::test]
    async fn update_missing_thread_is_not_found() {
        let store = store();
        let err = store
            .update_section("missing", "section-1", SectionPatch { status: None, content: None })
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound));
    }

    #[tokio::test]
    async fn list_active_excludes_terminal_states() {
        let store = store();
        store.save(new_state()).await.unwrap();
        store
            .set_status("t1", WorkflowStatus::Completed, None)
            .await
            .unwrap();
        let active = store.list_active().await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_state() {
        let store = store();
        store.save(new_state()).await.unwrap();
        store.delete("t1").await.unwrap();
        assert!(matches!(store.load("t1").await, Err(CheckpointError::NotFound)));
    }
}
