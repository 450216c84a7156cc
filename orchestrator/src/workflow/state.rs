//! WorkflowState (C8/C9 shared type): the document a petition workflow
//! mutates section by section, plus the delta shape broadcast to C14.
//!
//! Grounded in spec §3's `WorkflowState` record; the section/exhibit/log
//! substructures are new (the teacher's graph is generic over an opaque `S`
//! with no petition-specific shape) but follow the same "plain serializable
//! struct" shape the teacher's own `RunnableConfig`/`Checkpoint` use.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub title: String,
    pub status: SectionStatus,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exhibit {
    pub exhibit_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLogEntry {
    pub at: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub message: String,
}

/// A pending `await_human_gate` request, surfaced on the state so a
/// reconnecting preview subscriber can see it without a separate channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub prompt: String,
    pub options: Vec<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub thread_id: String,
    pub case_id: String,
    pub status: WorkflowStatus,
    pub current_node: Option<String>,
    pub sections: Vec<Section>,
    pub exhibits: Vec<Exhibit>,
    pub logs: Vec<WorkflowLogEntry>,
    pub pending_approval: Option<PendingApproval>,
    pub error_reason: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Optimistic-concurrency version, incremented on every committed write.
    pub version: u64,
}

impl WorkflowState {
    pub fn new(thread_id: impl Into<String>, case_id: impl Into<String>, section_titles: &[&str], now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            case_id: case_id.into(),
            status: WorkflowStatus::Running,
            current_node: None,
            sections: section_titles
                .iter()
                .enumerate()
                .map(|(i, title)| Section {
                    section_id: format!("section-{}", i + 1),
                    title: title.to_string(),
                    status: SectionStatus::Pending,
                    content: None,
                })
                .collect(),
            exhibits: vec![],
            logs: vec![],
            pending_approval: None,
            error_reason: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn section_mut(&mut self, section_id: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.section_id == section_id)
    }

    pub fn progress(&self) -> (u32, u32, f32) {
        let total = self.sections.len() as u32;
        let completed = self
            .sections
            .iter()
            .filter(|s| s.status == SectionStatus::Completed)
            .count() as u32;
        let percentage = if total == 0 {
            0.0
        } else {
            (completed as f32 / total as f32) * 100.0
        };
        (completed, total, percentage)
    }
}

/// A single committed mutation, in the shape C14 broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDelta {
    pub thread_id: String,
    pub seq: u64,
    pub kind: DeltaKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeltaKind {
    SectionUpdate { section_id: String, section: Section },
    StatusChange { status: WorkflowStatus },
    LogEntry { log: WorkflowLogEntry },
    ProgressUpdate { completed: u32, total: u32, percentage: f32 },
}

/// A JSON patch to apply to one field of the state; used by `update_section`
/// and friends so the store, not the caller, owns version bumping.
#[derive(Debug, Clone)]
pub struct SectionPatch {
    pub status: Option<SectionStatus>,
    pub content: Option<String>,
}
