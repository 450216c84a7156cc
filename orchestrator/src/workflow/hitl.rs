//! Human-in-the-loop gate (C13): `await_human_gate` suspends a node until an
//! external `resolve` call arrives or a timeout elapses.
//!
//! Grounded in the teacher's `graph::interrupt::{Interrupt, GraphInterrupt,
//! InterruptHandler}` (a node-raised value that pauses execution pending
//! external input), rebuilt around a `tokio::sync::oneshot` wakeup instead of
//! a synchronous `InterruptHandler::handle_interrupt`, since spec §4.13
//! requires the wait to be awaited asynchronously rather than resolved
//! inline by the same call stack that raised it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// One choice made for a pending gate; normally one of the `options` passed
/// to `await_human_gate`, but not validated here (the node validates on
/// resume if it cares).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanChoice {
    pub choice: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Resolved,
    TimedOut,
}

/// Registry of pending gates, keyed by `thread_id`. A workflow has at most
/// one pending gate at a time, matching spec §4.13's single
/// `pending_approval` slot on `WorkflowState`.
#[derive(Default)]
pub struct HumanGateRegistry {
    waiters: Mutex<HashMap<String, oneshot::Sender<HumanChoice>>>,
}

impl HumanGateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a wait for `thread_id`, returning a receiver the node
    /// awaits (bounded by `timeout`). If `resolve` is never called before
    /// `timeout` elapses, the caller falls back to `default_choice`.
    pub fn register(&self, thread_id: &str) -> oneshot::Receiver<HumanChoice> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(thread_id.to_string(), tx);
        rx
    }

    /// Resolves a pending gate with an external choice. Returns `false` if
    /// no gate is pending for this thread (already resolved, timed out, or
    /// never registered).
    pub fn resolve(&self, thread_id: &str, choice: HumanChoice) -> bool {
        if let Some(tx) = self.waiters.lock().unwrap().remove(thread_id) {
            tx.send(choice).is_ok()
        } else {
            false
        }
    }

    pub fn is_pending(&self, thread_id: &str) -> bool {
        self.waiters.lock().unwrap().contains_key(thread_id)
    }

    fn clear(&self, thread_id: &str) {
        self.waiters.lock().unwrap().remove(thread_id);
    }
}

/// Awaits either an external `resolve` or `timeout`, whichever comes first.
/// On timeout, returns `default_choice` tagged with `GateOutcome::TimedOut`
/// so the caller can still record which path was taken.
pub async fn wait_for_resolution(
    registry: &HumanGateRegistry,
    thread_id: &str,
    rx: oneshot::Receiver<HumanChoice>,
    timeout: Duration,
    default_choice: &str,
) -> (HumanChoice, GateOutcome) {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(choice)) => (choice, GateOutcome::Resolved),
        Ok(Err(_)) => (
            HumanChoice {
                choice: default_choice.to_string(),
                note: Some("gate cancelled before resolution".to_string()),
            },
            GateOutcome::TimedOut,
        ),
        Err(_) => {
            registry.clear(thread_id);
            (
                HumanChoice {
                    choice: default_choice.to_string(),
                    note: Some("timed out waiting for human response".to_string()),
                },
                GateOutcome::TimedOut,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_before_timeout_wins() {
        let registry = HumanGateRegistry::new();
        let rx = registry.register("t1");
        registry.resolve(
            "t1",
            HumanChoice {
                choice: "approve".into(),
                note: None,
            },
        );
        let (choice, outcome) =
            wait_for_resolution(&registry, "t1", rx, Duration::from_secs(5), "reject").await;
        assert_eq!(choice.choice, "approve");
        assert_eq!(outcome, GateOutcome::Resolved);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_default_choice() {
        let registry = HumanGateRegistry::new();
        let rx = registry.register("t1");
        let (choice, outcome) =
            wait_for_resolution(&registry, "t1", rx, Duration::from_millis(20), "reject").await;
        assert_eq!(choice.choice, "reject");
        assert_eq!(outcome, GateOutcome::TimedOut);
        assert!(!registry.is_pending("t1"));
    }

    #[tokio::test]
    async fn resolve_with_no_pending_gate_returns_false() {
        let registry = HumanGateRegistry::new();
        assert!(!registry.resolve("missing", HumanChoice { choice: "x".into(), note: None }));
    }
}
