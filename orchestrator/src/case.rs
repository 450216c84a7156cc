//! Case (referenced, external, spec §3): the narrow interface the intake
//! state machine depends on. A real deployment backs this with whatever
//! case-management system owns petitioner records; this in-process store is
//! the fixture used by tests and the demo CLI.
//!
//! Grounded in the same `async_trait` store-plus-in-memory-impl shape as
//! [`crate::memory::episodic`], since `Case` rows are likewise
//! append-then-mutate records keyed by id.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    InProgress,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    Eb1a,
    O1,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    pub user_id: String,
    pub title: String,
    pub status: CaseStatus,
    pub case_type: CaseType,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Error)]
pub enum CaseError {
    #[error("case not found")]
    NotFound,
    #[error("case store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        case_type: CaseType,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Case, CaseError>;

    async fn get(&self, case_id: &str) -> Result<Case, CaseError>;

    /// Active (non-deleted) cases for a user, most-recently-updated first.
    async fn list_active_for_user(&self, user_id: &str) -> Result<Vec<Case>, CaseError>;

    async fn soft_delete(&self, case_id: &str, now: chrono::DateTime<chrono::Utc>) -> Result<(), CaseError>;

    /// Recreates a case under a caller-chosen `case_id` rather than minting a
    /// fresh one, for restoring a row a dependent record (e.g. an
    /// `IntakeProgress`) is still keyed by.
    async fn restore(
        &self,
        case_id: &str,
        user_id: &str,
        title: &str,
        case_type: CaseType,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Case, CaseError>;
}

pub struct InMemoryCaseStore {
    cases: DashMap<String, Case>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self {
            cases: DashMap::new(),
        }
    }

    pub fn into_shared(self) -> Arc<dyn CaseStore> {
        Arc::new(self)
    }
}

impl Default for InMemoryCaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        case_type: CaseType,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Case, CaseError> {
        let case = Case {
            case_id: crate::ids::new_id().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            status: CaseStatus::Draft,
            case_type,
            data: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.cases.insert(case.case_id.clone(), case.clone());
        Ok(case)
    }

    async fn get(&self, case_id: &str) -> Result<Case, CaseError> {
        self.cases
            .get(case_id)
            .map(|c| c.clone())
            .ok_or(CaseError::NotFound)
    }

    async fn list_active_for_user(&self, user_id: &str) -> Result<Vec<Case>, CaseError> {
        let mut cases: Vec<Case> = self
            .cases
            .iter()
            .filter(|c| c.user_id == user_id && c.deleted_at.is_none())
            .map(|c| c.clone())
            .collect();
        cases.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(cases)
    }

    async fn soft_delete(&self, case_id: &str, now: chrono::DateTime<chrono::Utc>) -> Result<(), CaseError> {
        let mut case = self.cases.get_mut(case_id).ok_or(CaseError::NotFound)?;
        case.deleted_at = Some(now);
        Ok(())
    }

    async fn restore(
        &self,
        case_id: &str,
        user_id: &str,
        title: &str,
        case_type: CaseType,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Case, CaseError> {
        let case = Case {
            case_id: case_id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            status: CaseStatus::Draft,
            case_type,
            data: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.cases.insert(case.case_id.clone(), case.clone());
        Ok(case)
    }
}
