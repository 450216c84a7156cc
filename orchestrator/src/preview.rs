//! Live-preview broadcaster (C14): bridges `workflow::state_store`'s raw
//! `StateDelta` broadcast to the wire-ready `protocol::PreviewEvent` stream a
//! UI subscribes to, with snapshot-then-deltas semantics on subscribe and a
//! slow-consumer-drop path instead of unbounded buffering.
//!
//! Grounded in the workflow state store's own broadcast-channel pattern
//! (`workflow::state_store::InMemoryWorkflowStateStore::subscribe`); the
//! translation into `protocol::{PreviewEvent, EnvelopeState}` and the
//! slow-consumer handling are this crate's addition, since the teacher has
//! no live-preview concept to draw on.

use std::sync::Arc;

use protocol::event::PreviewEvent;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::workflow::state_store::WorkflowStateStore;
use crate::workflow::state::DeltaKind;
use crate::error::OrchestratorError;

/// One subscriber's feed: an initial snapshot, then translated deltas.
pub struct PreviewSubscription {
    pub initial: Value,
    pub receiver: broadcast::Receiver<PreviewEvent>,
}

/// Bridges one workflow thread's `StateDelta` broadcast into a
/// `PreviewEvent` broadcast with its own envelope sequence counter,
/// independent of the underlying store's `seq` numbering.
pub struct PreviewBroadcaster {
    store: Arc<dyn WorkflowStateStore>,
}

impl PreviewBroadcaster {
    pub fn new(store: Arc<dyn WorkflowStateStore>) -> Self {
        Self { store }
    }

    /// Subscribes to `thread_id`: loads the current state as the initial
    /// snapshot (spec §4.14's "snapshot, then deltas"), then spawns a task
    /// that translates the store's delta broadcast into `PreviewEvent`s on
    /// a fresh broadcast channel sized the same as the store's.
    pub async fn subscribe(&self, thread_id: &str) -> Result<PreviewSubscription, OrchestratorError> {
        let state = self.store.load(thread_id).await?;
        let initial = serde_json::to_value(&state).map_err(|e| OrchestratorError::Internal(e.to_string()))?;

        let mut source = self.store.subscribe(thread_id);
        let (tx, rx) = broadcast::channel(256);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(delta) => {
                        let event = translate(&delta.kind);
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(resume_from_seq)) => {
                        if tx.send(PreviewEvent::SlowConsumer { resume_from_seq }).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(PreviewSubscription { initial, receiver: rx })
    }
}

fn translate(kind: &DeltaKind) -> PreviewEvent {
    match kind {
        DeltaKind::SectionUpdate { section_id, section } => PreviewEvent::SectionUpdate {
            section_id: section_id.clone(),
            section: serde_json::to_value(section).unwrap_or(Value::Null),
        },
        DeltaKind::StatusChange { status } => PreviewEvent::StatusChange {
            status: serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "unknown".to_string()),
        },
        DeltaKind::LogEntry { log } => PreviewEvent::LogEntry {
            log: serde_json::to_value(log).unwrap_or(Value::Null),
        },
        DeltaKind::ProgressUpdate { completed, total, percentage } => PreviewEvent::ProgressUpdate {
            completed: *completed,
            total: *total,
            percentage: *percentage,
        },
    }
}
