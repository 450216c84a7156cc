//! Envelope (thread_id, seq) attached to every live-preview message (spec §4.14, §6).
//! `EnvelopeState` tracks the monotonic per-thread sequence number so a
//! reconnecting subscriber can request a resync from a known point.

use crate::event::PreviewEvent;
use serde_json::Value;

/// Envelope fields attached to each message.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Workflow thread id; constant for the lifetime of a subscription.
    pub thread_id: Option<String>,
    /// Monotonically increasing commit sequence number within the thread.
    pub seq: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = Some(id.into());
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.thread_id {
            obj.entry("thread_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(seq) = self.seq {
            obj.entry("seq")
                .or_insert_with(|| Value::Number(serde_json::Number::from(seq)));
        }
    }
}

/// Per-thread envelope state: next sequence number to assign.
pub struct EnvelopeState {
    pub thread_id: String,
    pub next_seq: u64,
}

impl EnvelopeState {
    pub fn new(thread_id: String) -> Self {
        Self {
            thread_id,
            next_seq: 1,
        }
    }

    /// Injects the envelope into the event value and advances the sequence counter.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_thread_id(&self.thread_id)
            .with_seq(self.next_seq);
        self.next_seq += 1;
        env.inject_into(value);
    }
}

/// Converts a preview event to JSON and injects the envelope using the given state.
pub fn to_json(
    event: &PreviewEvent,
    state: &mut EnvelopeState,
) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_does_not_overwrite() {
        let mut obj = serde_json::json!({"type":"status_change","status":"paused","thread_id":"keep-me"});
        let env = Envelope::new().with_thread_id("other").with_seq(5);
        env.inject_into(&mut obj);
        assert_eq!(obj["thread_id"], "keep-me");
        assert_eq!(obj["seq"], 5);
    }

    #[test]
    fn to_json_injects_envelope_and_increments_seq() {
        let ev = PreviewEvent::Connected;
        let mut state = EnvelopeState::new("thread-abc".to_string());
        let first = to_json(&ev, &mut state).unwrap();
        assert_eq!(first["type"], "connected");
        assert_eq!(first["thread_id"], "thread-abc");
        assert_eq!(first["seq"], 1);

        let second = to_json(&ev, &mut state).unwrap();
        assert_eq!(second["seq"], 2);
    }

    #[test]
    fn section_update_roundtrip() {
        let ev = PreviewEvent::SectionUpdate {
            section_id: "1".to_string(),
            section: serde_json::json!({"status": "completed"}),
        };
        let mut state = EnvelopeState::new("thread-xyz".to_string());
        let value = to_json(&ev, &mut state).unwrap();
        assert_eq!(value["type"], "section_update");
        assert_eq!(value["section_id"], "1");
        assert_eq!(value["section"]["status"], "completed");
    }
}
