//! Top-level error type, mirroring the teacher's layered error style: each
//! component has its own `thiserror` enum (`StoreError`, `CacheError`,
//! `CheckpointError`, `CompilationError`) and those bubble up into one
//! crate-wide error via `From` impls, the way the teacher's `AgentError`
//! absorbs `GraphInterrupt`.

use thiserror::Error;

use crate::cache::CacheError;
use crate::case::CaseError;
use crate::intake::IntakeError;
use crate::memory::StoreError;
use crate::workflow::state_store::CheckpointError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("forbidden: role lacks permission for this action")]
    Forbidden,

    #[error("suspected prompt injection (confidence {confidence:.2})")]
    SuspectedInjection { confidence: f32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("concurrent update to {0}, retries exhausted")]
    ConcurrentUpdate(String),

    #[error("orphaned intake for case {case_id}")]
    OrphanedIntake { case_id: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("retry exhausted: {0}")]
    RetryExhausted(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("budget exceeded")]
    BudgetExceeded,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => OrchestratorError::NotFound("store item".to_string()),
            StoreError::EmbeddingDimensionMismatch { expected, actual } => {
                OrchestratorError::EmbeddingDimensionMismatch { expected, actual }
            }
            StoreError::Unavailable(msg) => OrchestratorError::StoreUnavailable(msg),
            StoreError::Serialization(msg) => OrchestratorError::Internal(msg),
        }
    }
}

impl From<CacheError> for OrchestratorError {
    fn from(e: CacheError) -> Self {
        OrchestratorError::Internal(e.to_string())
    }
}

impl From<CheckpointError> for OrchestratorError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::NotFound => OrchestratorError::NotFound("workflow state".to_string()),
            CheckpointError::Conflict => {
                OrchestratorError::ConcurrentUpdate("workflow state".to_string())
            }
            CheckpointError::Storage(msg) => OrchestratorError::StoreUnavailable(msg),
            CheckpointError::Serialization(msg) => OrchestratorError::Internal(msg),
        }
    }
}

impl From<CaseError> for OrchestratorError {
    fn from(e: CaseError) -> Self {
        match e {
            CaseError::NotFound => OrchestratorError::NotFound("case".to_string()),
            CaseError::Unavailable(msg) => OrchestratorError::StoreUnavailable(msg),
        }
    }
}

impl From<IntakeError> for OrchestratorError {
    fn from(e: IntakeError) -> Self {
        match e {
            IntakeError::NoCase => OrchestratorError::NotFound("case".to_string()),
            IntakeError::Orphaned { case_id } => OrchestratorError::OrphanedIntake { case_id },
            IntakeError::NotFound(user_id, case_id) => {
                OrchestratorError::NotFound(format!("intake progress for user {user_id}, case {case_id}"))
            }
            IntakeError::RequiredStep => OrchestratorError::InvalidState("step is required".to_string()),
            IntakeError::InvalidState => OrchestratorError::InvalidState("intake already complete or cancelled".to_string()),
        }
    }
}

/// Stable, user-facing reason code. Internals (stack traces, provider error
/// bodies) are never surfaced; only this short string and an optional detail
/// travel back to the caller (spec §7).
impl OrchestratorError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrchestratorError::Forbidden => "forbidden",
            OrchestratorError::SuspectedInjection { .. } => "suspected_injection",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::Conflict(_) => "conflict",
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::ConcurrentUpdate(_) => "conflict",
            OrchestratorError::OrphanedIntake { .. } => "orphaned_intake",
            OrchestratorError::StoreUnavailable(_) => "store_unavailable",
            OrchestratorError::ProviderUnavailable(_) => "provider_unavailable",
            OrchestratorError::RetryExhausted(_) => "retry_exhausted",
            OrchestratorError::TimedOut(_) => "timed_out",
            OrchestratorError::BudgetExceeded => "budget_exceeded",
            OrchestratorError::EmbeddingDimensionMismatch { .. } => "embedding_dimension_mismatch",
            OrchestratorError::Cancelled(_) => "cancelled",
            OrchestratorError::Internal(_) => "internal",
        }
    }
}
