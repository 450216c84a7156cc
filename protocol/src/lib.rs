//! Live-preview stream protocol (spec §6): event type + payload + envelope.
//!
//! This crate defines the wire shape the preview broadcaster (C14) sends to
//! subscribers. It does not depend on orchestrator; orchestrator bridges its
//! internal workflow deltas into `PreviewEvent` and calls `to_json`.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::PreviewEvent;
