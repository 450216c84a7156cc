//! Concrete agent handlers (C10): `Case`, `Writer`, `Validator`, `Research`
//! and `Supervisor`, the variants spec §4.10 names for the `Agent` trait
//! dispatch routes to by command kind.
//!
//! Grounded in the same facade-over-a-store shape as [`crate::memory::manager`]
//! and [`crate::intake`]: each agent here is a thin adapter from a
//! `Command`'s untyped payload onto one of the already-built component
//! APIs (case store, intake engine, memory manager, model router, workflow
//! state store). The Supervisor is the one agent that calls into another
//! agent directly rather than only into a store, so it is also where the
//! hop-counter cycle guard (spec §4.10: "a single level of controlled
//! re-entry") lives.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::case::{CaseStore, CaseType};
use crate::dispatch::{Agent, Command, CommandKind};
use crate::error::OrchestratorError;
use crate::ids::Clock;
use crate::intake::IntakeEngine;
use crate::memory::{manager::MemoryManager, SemanticFilter};
use crate::preview::PreviewBroadcaster;
use crate::routing::ModelRouter;
use crate::workflow::state::{Exhibit, SectionPatch, SectionStatus, WorkflowState, WorkflowStatus};
use crate::workflow::state_store::WorkflowStateStore;

fn field<'a>(payload: &'a Value, name: &str) -> Result<&'a str, OrchestratorError> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::InvalidState(format!("missing field '{name}'")))
}

/// `Case` agent: case lifecycle commands (spec §6: `case_create`,
/// `case_get`, `case_active`).
pub struct CaseAgent {
    cases: Arc<dyn CaseStore>,
    clock: Arc<dyn Clock>,
}

impl CaseAgent {
    pub fn new(cases: Arc<dyn CaseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cases, clock }
    }
}

#[async_trait]
impl Agent for CaseAgent {
    fn name(&self) -> &str {
        "case"
    }

    async fn handle(&self, command: &Command) -> Result<Value, OrchestratorError> {
        match command.kind {
            CommandKind::CaseCreate => {
                let title = field(&command.payload, "title")?;
                let case = self
                    .cases
                    .create(&command.user_id, title, CaseType::General, self.clock.now())
                    .await?;
                Ok(json!(case))
            }
            CommandKind::CaseGet => {
                let case_id = field(&command.payload, "case_id")?;
                let case = self.cases.get(case_id).await?;
                Ok(json!(case))
            }
            CommandKind::CaseActive => {
                let cases = self.cases.list_active_for_user(&command.user_id).await?;
                Ok(json!(cases))
            }
            other => Err(OrchestratorError::NotFound(format!(
                "case agent has no handler for {other:?}"
            ))),
        }
    }
}

/// `Research` agent: retrieval-backed commands (spec §6: `memory_lookup`,
/// `ask`).
pub struct ResearchAgent {
    memory: Arc<MemoryManager>,
    router: Arc<ModelRouter>,
}

impl ResearchAgent {
    pub fn new(memory: Arc<MemoryManager>, router: Arc<ModelRouter>) -> Self {
        Self { memory, router }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn name(&self) -> &str {
        "research"
    }

    async fn handle(&self, command: &Command) -> Result<Value, OrchestratorError> {
        match command.kind {
            CommandKind::MemoryLookup => {
                let query = field(&command.payload, "query")?;
                let filter = SemanticFilter {
                    user_id: Some(command.user_id.clone()),
                    case_id: command.payload.get("case_id").and_then(Value::as_str).map(String::from),
                    tags_any: vec![],
                };
                let hits = self.memory.retrieve(query, filter, 5).await?;
                let results: Vec<Value> = hits
                    .into_iter()
                    .map(|(record, score)| json!({ "record": record, "score": score }))
                    .collect();
                Ok(json!({ "results": results }))
            }
            CommandKind::Ask => {
                let text = field(&command.payload, "text")?;
                let filter = SemanticFilter {
                    user_id: Some(command.user_id.clone()),
                    case_id: None,
                    tags_any: vec![],
                };
                let context = self.memory.retrieve(text, filter, 3).await?;
                let context_text: String = context
                    .iter()
                    .map(|(record, _)| record.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let prompt = if context_text.is_empty() {
                    text.to_string()
                } else {
                    format!("Context:\n{context_text}\n\nQuestion: {text}")
                };
                let completion = self.router.complete(&prompt, 0.0).await?;
                Ok(json!({ "answer": completion.text, "cached": completion.cached }))
            }
            other => Err(OrchestratorError::NotFound(format!(
                "research agent has no handler for {other:?}"
            ))),
        }
    }
}

/// `Writer` agent: drafts a single labeled piece of text via the model
/// router and records it in memory (spec §6: `generate_letter`).
pub struct WriterAgent {
    router: Arc<ModelRouter>,
    memory: Arc<MemoryManager>,
}

impl WriterAgent {
    pub fn new(router: Arc<ModelRouter>, memory: Arc<MemoryManager>) -> Self {
        Self { router, memory }
    }

    /// Drafts `title` for `case_id`, independent of the `Agent` plumbing, so
    /// the Supervisor can call it once per petition section without
    /// round-tripping through a `Command`.
    pub async fn draft(
        &self,
        user_id: &str,
        case_id: Option<&str>,
        title: &str,
    ) -> Result<String, OrchestratorError> {
        let prompt = format!("Draft the '{title}' section of an EB-1A petition letter.");
        let completion = self.router.complete(&prompt, 0.0).await?;
        self.memory
            .remember(
                user_id,
                case_id,
                &completion.text,
                vec!["letter".to_string(), title.to_string()],
                serde_json::Map::new(),
            )
            .await?;
        Ok(completion.text)
    }
}

#[async_trait]
impl Agent for WriterAgent {
    fn name(&self) -> &str {
        "writer"
    }

    async fn handle(&self, command: &Command) -> Result<Value, OrchestratorError> {
        match command.kind {
            CommandKind::GenerateLetter => {
                let title = field(&command.payload, "title")?;
                let case_id = command.payload.get("case_id").and_then(Value::as_str);
                let text = self.draft(&command.user_id, case_id, title).await?;
                Ok(json!({ "title": title, "content": text }))
            }
            other => Err(OrchestratorError::NotFound(format!(
                "writer agent has no handler for {other:?}"
            ))),
        }
    }
}

const MAX_EXHIBIT_BYTES: usize = 25 * 1024 * 1024;
const ALLOWED_EXHIBIT_MIME_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg"];

/// `Validator` agent: exhibit intake and download-readiness checks (spec
/// §6: `upload_exhibit`, `download_pdf`).
pub struct ValidatorAgent {
    state_store: Arc<dyn WorkflowStateStore>,
}

impl ValidatorAgent {
    pub fn new(state_store: Arc<dyn WorkflowStateStore>) -> Self {
        Self { state_store }
    }
}

#[async_trait]
impl Agent for ValidatorAgent {
    fn name(&self) -> &str {
        "validator"
    }

    async fn handle(&self, command: &Command) -> Result<Value, OrchestratorError> {
        match command.kind {
            CommandKind::UploadExhibit => {
                let thread_id = field(&command.payload, "thread_id")?;
                let exhibit_id = field(&command.payload, "exhibit_id")?;
                let filename = field(&command.payload, "filename")?;
                let mime_type = field(&command.payload, "mime_type")?;
                let size_bytes = command
                    .payload
                    .get("bytes")
                    .and_then(Value::as_str)
                    .map(str::len)
                    .unwrap_or(0);

                if !ALLOWED_EXHIBIT_MIME_TYPES.contains(&mime_type) {
                    return Err(OrchestratorError::InvalidState(format!(
                        "unsupported exhibit mime type: {mime_type}"
                    )));
                }
                if size_bytes > MAX_EXHIBIT_BYTES {
                    return Err(OrchestratorError::InvalidState(
                        "exhibit exceeds maximum size".to_string(),
                    ));
                }

                let state = self
                    .state_store
                    .add_exhibit(
                        thread_id,
                        Exhibit {
                            exhibit_id: exhibit_id.to_string(),
                            filename: filename.to_string(),
                            mime_type: mime_type.to_string(),
                            size_bytes,
                        },
                    )
                    .await?;
                Ok(json!({ "thread_id": thread_id, "exhibits": state.exhibits.len() }))
            }
            CommandKind::DownloadPdf => {
                let thread_id = field(&command.payload, "thread_id")?;
                let state = self.state_store.load(thread_id).await?;
                if state.status != WorkflowStatus::Completed {
                    return Err(OrchestratorError::InvalidState(
                        "workflow is not completed yet".to_string(),
                    ));
                }
                Ok(json!({ "thread_id": thread_id, "ready": true, "sections": state.sections.len() }))
            }
            other => Err(OrchestratorError::NotFound(format!(
                "validator agent has no handler for {other:?}"
            ))),
        }
    }
}

/// `Supervisor` agent: whole-petition lifecycle commands (spec §6:
/// `generate_petition`, `pause`, `resume`, `get_preview`). This is the only
/// agent that invokes another agent's `handle` directly (`WriterAgent`, once
/// per section, via `Command::delegate`) rather than only a store, so it is
/// the one place the re-entry hop guard applies.
pub struct SupervisorAgent {
    cases: Arc<dyn CaseStore>,
    writer: Arc<WriterAgent>,
    state_store: Arc<dyn WorkflowStateStore>,
    preview: Arc<PreviewBroadcaster>,
    clock: Arc<dyn Clock>,
}

const DEFAULT_PETITION_SECTIONS: &[&str] = &["Cover Letter", "Criteria Summary", "Recommendation Digest"];

impl SupervisorAgent {
    pub fn new(
        cases: Arc<dyn CaseStore>,
        writer: Arc<WriterAgent>,
        state_store: Arc<dyn WorkflowStateStore>,
        preview: Arc<PreviewBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cases,
            writer,
            state_store,
            preview,
            clock,
        }
    }
}

#[async_trait]
impl Agent for SupervisorAgent {
    fn name(&self) -> &str {
        "supervisor"
    }

    async fn handle(&self, command: &Command) -> Result<Value, OrchestratorError> {
        // The Supervisor is meant to be a command's entry point, not a
        // delegate target: refusing anything with a nonzero hop is what
        // keeps `Supervisor -> Writer -> ... -> Supervisor` from forming a
        // cycle (spec §4.10's "single level of controlled re-entry").
        if command.hop > 0 {
            return Err(OrchestratorError::Forbidden);
        }

        match command.kind {
            CommandKind::GeneratePetition => {
                let case_id = field(&command.payload, "case_id")?;
                let case = self.cases.get(case_id).await?;

                let thread_id = format!("thread-{case_id}");
                let now = self.clock.now();
                let state = WorkflowState::new(&thread_id, case_id, DEFAULT_PETITION_SECTIONS, now);
                self.state_store.save(state).await?;

                for (i, title) in DEFAULT_PETITION_SECTIONS.iter().enumerate() {
                    let sub_command = command.delegate(
                        CommandKind::GenerateLetter,
                        json!({ "title": title, "case_id": case_id }),
                    );
                    let drafted = self.writer.handle(&sub_command).await?;
                    let content = drafted["content"].as_str().unwrap_or_default().to_string();
                    let section_id = format!("section-{}", i + 1);
                    self.state_store
                        .update_section(
                            &thread_id,
                            &section_id,
                            SectionPatch {
                                status: Some(SectionStatus::Completed),
                                content: Some(content),
                            },
                        )
                        .await?;
                }
                let final_state = self
                    .state_store
                    .set_status(&thread_id, WorkflowStatus::Completed, None)
                    .await?;
                Ok(json!({ "thread_id": final_state.thread_id, "status": final_state.status }))
            }
            CommandKind::Pause => {
                let thread_id = field(&command.payload, "thread_id")?;
                let state = self.state_store.set_status(thread_id, WorkflowStatus::Paused, None).await?;
                Ok(json!({ "thread_id": thread_id, "status": state.status }))
            }
            CommandKind::Resume => {
                let thread_id = field(&command.payload, "thread_id")?;
                let state = self.state_store.set_status(thread_id, WorkflowStatus::Running, None).await?;
                Ok(json!({ "thread_id": thread_id, "status": state.status }))
            }
            CommandKind::GetPreview => {
                let thread_id = field(&command.payload, "thread_id")?;
                let subscription = self.preview.subscribe(thread_id).await?;
                Ok(subscription.initial)
            }
            other => Err(OrchestratorError::NotFound(format!(
                "supervisor agent has no handler for {other:?}"
            ))),
        }
    }
}

/// `Intake` agent: questionnaire progression commands (spec §6:
/// `intake_start`, `intake_answer`, `intake_skip`, `intake_status`,
/// `intake_cancel`, `intake_resume`). Not one of the `{Case, Writer,
/// Validator, Research, Supervisor}` variants spec §4.10 names by example,
/// but the same `{handle, stats}` capability set applies, and "variants
/// include" (not "variants are exactly") leaves room for it.
pub struct IntakeAgent {
    intake: Arc<IntakeEngine>,
    clock: Arc<dyn Clock>,
}

impl IntakeAgent {
    pub fn new(intake: Arc<IntakeEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { intake, clock }
    }
}

fn case_id_of(payload: &Value) -> Result<&str, OrchestratorError> {
    field(payload, "case_id")
}

#[async_trait]
impl Agent for IntakeAgent {
    fn name(&self) -> &str {
        "intake"
    }

    async fn handle(&self, command: &Command) -> Result<Value, OrchestratorError> {
        let now = self.clock.now();
        match command.kind {
            CommandKind::IntakeStart => {
                let title = field(&command.payload, "title")?;
                let category = match command.payload.get("category").and_then(Value::as_str) {
                    Some("eb1a") => CaseType::Eb1a,
                    Some("o1") => CaseType::O1,
                    _ => CaseType::General,
                };
                let (case, progress, question) = self
                    .intake
                    .start_with_new_case(&command.user_id, title, category, now)
                    .await?;
                Ok(json!({ "case": case, "progress": progress, "next_question": question }))
            }
            CommandKind::IntakeAnswer => {
                let case_id = case_id_of(&command.payload)?;
                let text = field(&command.payload, "text")?;
                let progress = self.intake.answer(&command.user_id, case_id, text, now).await?;
                Ok(json!(progress))
            }
            CommandKind::IntakeSkip => {
                let case_id = case_id_of(&command.payload)?;
                let progress = self.intake.skip(&command.user_id, case_id, now).await?;
                Ok(json!(progress))
            }
            CommandKind::IntakeStatus => {
                let case_id = case_id_of(&command.payload)?;
                let status = self.intake.status(&command.user_id, case_id, now).await?;
                Ok(json!(status))
            }
            CommandKind::IntakeCancel => {
                let case_id = case_id_of(&command.payload)?;
                self.intake.cancel(&command.user_id, case_id).await?;
                Ok(json!({ "cancelled": true }))
            }
            CommandKind::IntakeResume => {
                let case_id = case_id_of(&command.payload)?;
                let progress = self.intake.resume(&command.user_id, case_id).await?;
                Ok(json!(progress))
            }
            other => Err(OrchestratorError::NotFound(format!(
                "intake agent has no handler for {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditTrail;
    use crate::case::InMemoryCaseStore;
    use crate::dispatch::{AgentRegistry, Dispatcher, InjectionDetector, RolePermissionMatrix};
    use crate::ids::SystemClock;
    use crate::memory::embedder::HashEmbedder;
    use crate::memory::episodic::InMemoryEpisodicStore;
    use crate::memory::semantic::InMemorySemanticStore;
    use crate::routing::MockModelClient;
    use crate::workflow::state_store::InMemoryWorkflowStateStore;
    use std::collections::HashMap;

    fn memory() -> Arc<MemoryManager> {
        Arc::new(MemoryManager::new(
            Arc::new(InMemoryEpisodicStore::new()),
            Arc::new(InMemorySemanticStore::new(8)),
            Arc::new(HashEmbedder::new(8)),
            Arc::new(InMemoryAuditTrail::new(Arc::new(SystemClock))),
            Arc::new(SystemClock),
        ))
    }

    fn router() -> Arc<ModelRouter> {
        let mut clients: HashMap<String, Arc<dyn crate::routing::ModelClient>> = HashMap::new();
        clients.insert("m1".into(), Arc::new(MockModelClient::new("m1", "drafted text")));
        Arc::new(ModelRouter::new(
            vec![config::ProviderConfig {
                id: "m1".into(),
                cost_per_token: 0.0,
                token_limit: 8192,
                supports_chat: true,
                supports_embed: false,
            }],
            clients,
            None,
            10.0,
            10.0,
            0.0,
        ))
    }

    fn full_matrix(roles: &[&str]) -> RolePermissionMatrix {
        let actions = vec![
            "case_create", "case_get", "case_active", "memory_lookup", "ask",
            "generate_letter", "generate_petition", "upload_exhibit", "download_pdf",
            "pause", "resume", "get_preview",
        ];
        let mut map = HashMap::new();
        for role in roles {
            map.insert(role.to_string(), actions.iter().map(|a| a.to_string()).collect());
        }
        RolePermissionMatrix(map)
    }

    fn cmd(kind: CommandKind, user_id: &str, payload: Value) -> Command {
        Command {
            command_id: "c1".into(),
            user_id: user_id.into(),
            role: "user".into(),
            kind,
            payload,
            hop: 0,
        }
    }

    #[tokio::test]
    async fn case_agent_creates_and_fetches() {
        let cases = Arc::new(InMemoryCaseStore::new());
        let agent = CaseAgent::new(cases.clone(), Arc::new(SystemClock));
        let created = agent
            .handle(&cmd(CommandKind::CaseCreate, "u1", json!({ "title": "T1" })))
            .await
            .unwrap();
        let case_id = created["case_id"].as_str().unwrap().to_string();

        let fetched = agent
            .handle(&cmd(CommandKind::CaseGet, "u1", json!({ "case_id": case_id })))
            .await
            .unwrap();
        assert_eq!(fetched["title"], "T1");
    }

    #[tokio::test]
    async fn writer_agent_drafts_and_remembers() {
        let agent = WriterAgent::new(router(), memory());
        let response = agent
            .handle(&cmd(CommandKind::GenerateLetter, "u1", json!({ "title": "Cover Letter" })))
            .await
            .unwrap();
        assert_eq!(response["content"], "drafted text");
    }

    #[tokio::test]
    async fn validator_rejects_oversized_exhibit_mime() {
        let store: Arc<dyn WorkflowStateStore> = Arc::new(InMemoryWorkflowStateStore::new(Arc::new(SystemClock)));
        let state = WorkflowState::new("t1", "c1", &["Intro"], chrono::Utc::now());
        store.save(state).await.unwrap();

        let agent = ValidatorAgent::new(store);
        let err = agent
            .handle(&cmd(
                CommandKind::UploadExhibit,
                "u1",
                json!({
                    "thread_id": "t1",
                    "exhibit_id": "e1",
                    "filename": "f.exe",
                    "mime_type": "application/x-msdownload",
                    "bytes": "aaaa",
                }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState(_)));
    }

    #[tokio::test]
    async fn validator_accepts_known_mime_and_records_exhibit() {
        let store: Arc<dyn WorkflowStateStore> = Arc::new(InMemoryWorkflowStateStore::new(Arc::new(SystemClock)));
        let state = WorkflowState::new("t1", "c1", &["Intro"], chrono::Utc::now());
        store.save(state).await.unwrap();

        let agent = ValidatorAgent::new(store);
        let response = agent
            .handle(&cmd(
                CommandKind::UploadExhibit,
                "u1",
                json!({
                    "thread_id": "t1",
                    "exhibit_id": "e1",
                    "filename": "letter.pdf",
                    "mime_type": "application/pdf",
                    "bytes": "aaaa",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response["exhibits"], 1);
    }

    #[tokio::test]
    async fn supervisor_generates_petition_by_delegating_to_writer() {
        let cases = Arc::new(InMemoryCaseStore::new());
        let case = cases.create("u1", "T1", CaseType::Eb1a, chrono::Utc::now()).await.unwrap();
        let store: Arc<dyn WorkflowStateStore> = Arc::new(InMemoryWorkflowStateStore::new(Arc::new(SystemClock)));
        let preview = Arc::new(PreviewBroadcaster::new(store.clone()));
        let writer = Arc::new(WriterAgent::new(router(), memory()));
        let supervisor = SupervisorAgent::new(cases, writer, store, preview, Arc::new(SystemClock));

        let response = supervisor
            .handle(&cmd(CommandKind::GeneratePetition, "u1", json!({ "case_id": case.case_id })))
            .await
            .unwrap();
        assert_eq!(response["status"], "completed");
    }

    #[tokio::test]
    async fn supervisor_refuses_commands_with_nonzero_hop() {
        let cases = Arc::new(InMemoryCaseStore::new());
        let store: Arc<dyn WorkflowStateStore> = Arc::new(InMemoryWorkflowStateStore::new(Arc::new(SystemClock)));
        let preview = Arc::new(PreviewBroadcaster::new(store.clone()));
        let writer = Arc::new(WriterAgent::new(router(), memory()));
        let supervisor = SupervisorAgent::new(cases, writer, store, preview, Arc::new(SystemClock));

        let mut command = cmd(CommandKind::GeneratePetition, "u1", json!({ "case_id": "c1" }));
        command.hop = 1;
        let err = supervisor.handle(&command).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Forbidden));
    }

    #[tokio::test]
    async fn dispatcher_routes_case_create_through_registry() {
        let cases = Arc::new(InMemoryCaseStore::new());
        let mut registry = AgentRegistry::new();
        registry.register(CommandKind::CaseCreate, Arc::new(CaseAgent::new(cases, Arc::new(SystemClock))));
        let dispatcher = Dispatcher::new(
            full_matrix(&["user"]),
            InjectionDetector::new(false, 0.6),
            registry,
            Arc::new(InMemoryAuditTrail::new(Arc::new(SystemClock))),
        );
        let response = dispatcher
            .submit(cmd(CommandKind::CaseCreate, "u1", json!({ "title": "T1" })))
            .await;
        assert_eq!(response.status, "ok");
    }
}
