//! Live-preview event types (spec §6: discriminated shapes pushed to subscribers).
//! State-carrying variants use `serde_json::Value`; orchestrator serializes workflow
//! state/section payloads into that shape before handing them to this crate.

use serde::Serialize;
use serde_json::Value;

/// Wire shape for one live-preview message (type + payload). Envelope fields
/// (session_id, node_id, event_id) are applied separately by `EnvelopeState`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreviewEvent {
    Connected,
    InitialState {
        state: Value,
    },
    WorkflowUpdate {
        section_id: Option<String>,
        delta: Value,
    },
    SectionUpdate {
        section_id: String,
        section: Value,
    },
    LogEntry {
        log: Value,
    },
    StatusChange {
        status: String,
    },
    ProgressUpdate {
        completed: u32,
        total: u32,
        percentage: f32,
    },
    Error {
        message: String,
    },
    Pong,
    /// A reconnecting subscriber outran the buffer and was dropped.
    SlowConsumer {
        resume_from_seq: u64,
    },
}

impl PreviewEvent {
    /// Serializes this event to a JSON object (type + payload only, no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
