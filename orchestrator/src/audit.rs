//! Audit trail (C11): hash-chained, append-only event log.
//!
//! New relative to the teacher (the teacher has no audit log); grounded in
//! the `other_examples` hash-chained ledger-event pattern (an
//! `EventId`/`blake3::Hasher`-over-canonical-bytes ledger), built in the
//! teacher's trait/error idiom (`async_trait` store trait, `thiserror` error
//! enum).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::ids::{chained_hash, content_hash, Hash};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("hash chain verification failed at event {0}")]
    ChainBroken(String),
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Serialization(e.to_string())
    }
}

/// One immutable audit record. `hash = H(prev_hash || canonical(record_minus_hash))`
/// per spec §3; `prev_hash` of the first record is the fixed genesis hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub prev_hash: String,
    pub hash: String,
    pub user_id: Option<String>,
    pub source: String,
    pub action: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Canonical (field-order-stable) encoding of everything except `hash`, used
/// as the hash chain's preimage.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    event_id: &'a str,
    prev_hash: &'a str,
    user_id: &'a Option<String>,
    source: &'a str,
    action: &'a str,
    payload: &'a serde_json::Value,
    timestamp: &'a chrono::DateTime<chrono::Utc>,
}

fn canonical_bytes(
    event_id: &str,
    prev_hash: &str,
    user_id: &Option<String>,
    source: &str,
    action: &str,
    payload: &serde_json::Value,
    timestamp: &chrono::DateTime<chrono::Utc>,
) -> Result<Vec<u8>, AuditError> {
    let record = CanonicalRecord {
        event_id,
        prev_hash,
        user_id,
        source,
        action,
        payload,
        timestamp,
    };
    Ok(serde_json::to_vec(&record)?)
}

#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Appends one event to the chain, computing its hash from the current
    /// tip, and returns the new record including its hash.
    async fn append(
        &self,
        user_id: Option<String>,
        source: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<AuditEvent, AuditError>;

    /// Verifies that the hash chain over `range` (by index, 0-based,
    /// half-open) is unbroken. A single mutated record anywhere in storage
    /// makes this return `false` — implementations must fail closed, never
    /// silently skip the mismatch.
    async fn verify(&self, range: std::ops::Range<usize>) -> Result<bool, AuditError>;

    async fn all(&self) -> Result<Vec<AuditEvent>, AuditError>;
}

/// In-process, single-writer-per-user hash chain. A `tokio::sync::Mutex`
/// serializes writers, matching spec §5's "single-writer per user; batching
/// is allowed as long as hash-chain order is preserved" (this implementation
/// does not batch, but preserves the invariant the batching rule protects).
pub struct InMemoryAuditTrail {
    events: Mutex<Vec<AuditEvent>>,
    clock: std::sync::Arc<dyn crate::ids::Clock>,
}

impl InMemoryAuditTrail {
    pub fn new(clock: std::sync::Arc<dyn crate::ids::Clock>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            clock,
        }
    }
}

#[async_trait]
impl AuditTrail for InMemoryAuditTrail {
    async fn append(
        &self,
        user_id: Option<String>,
        source: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<AuditEvent, AuditError> {
        let mut guard = self.events.lock().await;
        let prev_hash = guard
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| Hash::genesis().to_string());
        let event_id = crate::ids::new_id().to_string();
        let timestamp = self.clock.now();

        let bytes = canonical_bytes(
            &event_id, &prev_hash, &user_id, source, action, &payload, &timestamp,
        )?;
        let prev = content_hash(prev_hash.as_bytes());
        let hash = chained_hash(&prev, &bytes);

        let event = AuditEvent {
            event_id,
            prev_hash,
            hash: hash.to_string(),
            user_id,
            source: source.to_string(),
            action: action.to_string(),
            payload,
            timestamp,
        };
        guard.push(event.clone());
        Ok(event)
    }

    async fn verify(&self, range: std::ops::Range<usize>) -> Result<bool, AuditError> {
        let guard = self.events.lock().await;
        for idx in range {
            let Some(event) = guard.get(idx) else {
                return Ok(false);
            };
            let bytes = canonical_bytes(
                &event.event_id,
                &event.prev_hash,
                &event.user_id,
                &event.source,
                &event.action,
                &event.payload,
                &event.timestamp,
            )?;
            let prev = content_hash(event.prev_hash.as_bytes());
            let expected = chained_hash(&prev, &bytes).to_string();
            if expected != event.hash {
                return Ok(false);
            }
            if idx > 0 {
                let previous_event = &guard[idx - 1];
                if previous_event.hash != event.prev_hash {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self.events.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SystemClock;
    use serde_json::json;
    use std::sync::Arc;

    fn trail() -> InMemoryAuditTrail {
        InMemoryAuditTrail::new(Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn append_chains_hashes() {
        let trail = trail();
        let e1 = trail
            .append(Some("u1".into()), "dispatch", "ask", json!({}))
            .await
            .unwrap();
        let e2 = trail
            .append(Some("u1".into()), "dispatch", "case_create", json!({}))
            .await
            .unwrap();
        assert_eq!(e2.prev_hash, e1.hash);
        assert_eq!(e1.prev_hash, crate::ids::Hash::genesis().to_string());
    }

    #[tokio::test]
    async fn verify_returns_true_for_untampered_chain() {
        let trail = trail();
        for i in 0..5 {
            trail
                .append(Some("u1".into()), "dispatch", "ask", json!({"i": i}))
                .await
                .unwrap();
        }
        assert!(trail.verify(0..5).await.unwrap());
    }

    #[tokio::test]
    async fn verify_returns_false_when_a_record_is_mutated() {
        let trail = trail();
        for i in 0..3 {
            trail
                .append(Some("u1".into()), "dispatch", "ask", json!({"i": i}))
                .await
                .unwrap();
        }
        {
            let mut guard = trail.events.lock().await;
            guard[1].action = "tampered".to_string();
        }
        assert!(!trail.verify(0..3).await.unwrap());
    }

    #[tokio::test]
    async fn verify_out_of_range_returns_false() {
        let trail = trail();
        trail
            .append(Some("u1".into()), "dispatch", "ask", json!({}))
            .await
            .unwrap();
        assert!(!trail.verify(0..5).await.unwrap());
    }
}
