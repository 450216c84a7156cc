//! Tiered memory subsystem (C2-C6): episodic log, semantic vector index,
//! working-memory slot buffer, the embedder interface, and the facade that
//! couples them with reflection and audit emission.
//!
//! Grounded in the teacher's `memory::store::{Store, Item, SearchItem,
//! StoreError}` shape, specialized here into two narrower traits
//! (`EpisodicStore`, `SemanticStore`) instead of one general key-value
//! `Store`, since episodic records are append-only and semantic records are
//! always vector-searchable.

pub mod embedder;
pub mod episodic;
pub mod manager;
pub mod semantic;
pub mod working;

pub use embedder::{Embedder, HashEmbedder};
pub use episodic::{EpisodicStore, InMemoryEpisodicStore};
pub use manager::{MemoryManager, ReflectionHandle};
pub use semantic::{InMemorySemanticStore, SemanticFilter, SemanticStore};
pub use working::WorkingMemory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors common to the memory stores, mirroring the teacher's `StoreError`.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// `episodic` rows carry no embedding; `semantic` rows always do (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Episodic,
    Semantic,
}

/// One memory record, shared by the episodic and semantic stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub case_id: Option<String>,
    pub record_type: RecordType,
    pub text: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl MemoryRecord {
    pub fn new_episodic(
        user_id: impl Into<String>,
        case_id: Option<String>,
        text: impl Into<String>,
        tags: Vec<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            id: crate::ids::new_id().to_string(),
            user_id: user_id.into(),
            case_id,
            record_type: RecordType::Episodic,
            text: text.into(),
            tags,
            metadata,
            embedding: None,
            created_at,
        }
    }

    pub fn new_semantic(
        user_id: impl Into<String>,
        case_id: Option<String>,
        text: impl Into<String>,
        tags: Vec<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
        embedding: Vec<f32>,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            id: crate::ids::new_id().to_string(),
            user_id: user_id.into(),
            case_id,
            record_type: RecordType::Semantic,
            text: text.into(),
            tags,
            metadata,
            embedding: Some(embedding),
            created_at,
        }
    }
}
