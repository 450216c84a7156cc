//! The EB-1A petition orchestrator: workflow engine, tiered memory, model
//! routing, dispatch, audit, intake, and live preview, wired behind one
//! facade.
//!
//! Grounded in the teacher's top-level `graphweave` crate, which exposes its
//! subsystems (llm, memory, graph, cache) as library modules behind a small
//! set of composition points rather than a single god-object; `Orchestrator`
//! plays that composition role here. Per spec §9's resolved open question on
//! global state, every long-lived component is handed out by explicit
//! construction through [`Orchestrator::init`] rather than a process-global
//! singleton, and `shutdown` exists as a matching lifecycle bookend even
//! though the in-memory backends have nothing to flush today.

pub mod agents;
pub mod audit;
pub mod cache;
pub mod case;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod intake;
pub mod memory;
pub mod preview;
pub mod routing;
pub mod workflow;

use std::collections::HashMap;
use std::sync::Arc;

use config::Settings;

pub use agents::{CaseAgent, IntakeAgent, ResearchAgent, SupervisorAgent, ValidatorAgent, WriterAgent};
pub use audit::{AuditError, AuditEvent, AuditTrail, InMemoryAuditTrail};
pub use cache::{CacheError, CacheLookup, ResponseCache};
pub use case::{Case, CaseError, CaseStatus, CaseStore, CaseType, InMemoryCaseStore};
pub use dispatch::{
    Agent, AgentRegistry, Command, CommandKind, CommandResponse, Dispatcher, InjectionDetector,
    RolePermissionMatrix,
};
pub use error::OrchestratorError;
pub use ids::{Clock, FixedClock, Hash, Id, ManualClock, SystemClock};
pub use intake::{IntakeEngine, IntakeError, IntakeProgress, IntakeStatus};
pub use memory::{Embedder, EpisodicStore, HashEmbedder, MemoryManager, SemanticStore, WorkingMemory};
pub use preview::{PreviewBroadcaster, PreviewSubscription};
pub use routing::{MockModelClient, ModelClient, ModelCompletion, ModelRouter};
pub use workflow::{
    CheckpointError, CompiledWorkflowGraph, InMemoryWorkflowStateStore, SqliteWorkflowStateStore,
    WorkflowEngine, WorkflowGraphBuilder, WorkflowState, WorkflowStateStore, WorkflowStatus,
};

/// Every long-lived component a running orchestrator needs, constructed once
/// from [`Settings`] and handed out by reference from here on. Holding an
/// `Orchestrator` is the only way callers reach these components; there is
/// no process-global accessor.
pub struct Orchestrator {
    pub clock: Arc<dyn Clock>,
    pub cases: Arc<dyn CaseStore>,
    pub audit: Arc<dyn AuditTrail>,
    pub memory: Arc<MemoryManager>,
    pub cache: Arc<ResponseCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub intake: Arc<IntakeEngine>,
    pub state_store: Arc<dyn WorkflowStateStore>,
    pub preview: Arc<PreviewBroadcaster>,
    pub router: Arc<ModelRouter>,
    engine_config: config::EngineConfig,
}

impl Orchestrator {
    /// Builds every component from `settings`. Infallible except when the
    /// workflow-state backend is configured as SQLite and the database file
    /// cannot be opened.
    pub fn init(settings: &Settings) -> Result<Self, OrchestratorError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let cases: Arc<dyn CaseStore> = Arc::new(InMemoryCaseStore::new());
        let audit: Arc<dyn AuditTrail> = Arc::new(InMemoryAuditTrail::new(clock.clone()));
        let episodic = Arc::new(memory::InMemoryEpisodicStore::new());
        let semantic = Arc::new(memory::InMemorySemanticStore::new(settings.memory.embedding_dimension));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(settings.memory.embedding_dimension));

        let memory = Arc::new(MemoryManager::new(
            episodic.clone(),
            semantic.clone(),
            embedder.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let cache = Arc::new(ResponseCache::new(
            embedder.clone(),
            settings.cache.ttl,
            settings.cache.max_entries,
            settings.cache.temperature_cacheable_ceiling,
            settings.cache.l2_similarity_threshold,
        ));

        let intake = Arc::new(IntakeEngine::new(cases.clone(), memory.clone(), audit.clone()));

        let state_store: Arc<dyn WorkflowStateStore> = match &settings.engine.state_backend {
            config::StateBackend::InMemory => Arc::new(InMemoryWorkflowStateStore::new(clock.clone())),
            config::StateBackend::Sqlite(path) => Arc::new(
                SqliteWorkflowStateStore::with_ttl(
                    path,
                    settings.engine.state_ttl.as_secs() as i64,
                    clock.clone(),
                )
                .map_err(|e| OrchestratorError::StoreUnavailable(e.to_string()))?,
            ),
        };

        let preview = Arc::new(PreviewBroadcaster::new(state_store.clone()));

        // Every configured provider gets a mock client here; a deployment
        // that talks to real providers builds its own `ModelRouter` with
        // real `ModelClient` impls instead of going through `init`, the same
        // way the teacher's binaries choose between `MockLlm` and
        // `ChatOpenAI` at their own construction sites rather than inside a
        // shared bootstrap path.
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        for provider in &settings.routing.providers {
            clients.insert(provider.id.clone(), Arc::new(MockModelClient::new(provider.id.clone(), "")));
        }
        let router = Arc::new(ModelRouter::new(
            settings.routing.providers.clone(),
            clients,
            if settings.cache.enabled { Some(cache.clone()) } else { None },
            settings.routing.per_request_budget,
            settings.routing.global_budget,
            settings.routing.warn_threshold,
        ));

        let writer = Arc::new(agents::WriterAgent::new(router.clone(), memory.clone()));
        let mut registry = AgentRegistry::new();
        registry.register(CommandKind::CaseCreate, Arc::new(agents::CaseAgent::new(cases.clone(), clock.clone())));
        registry.register(CommandKind::CaseGet, Arc::new(agents::CaseAgent::new(cases.clone(), clock.clone())));
        registry.register(CommandKind::CaseActive, Arc::new(agents::CaseAgent::new(cases.clone(), clock.clone())));
        registry.register(CommandKind::MemoryLookup, Arc::new(agents::ResearchAgent::new(memory.clone(), router.clone())));
        registry.register(CommandKind::Ask, Arc::new(agents::ResearchAgent::new(memory.clone(), router.clone())));
        registry.register(CommandKind::GenerateLetter, writer.clone());
        registry.register(
            CommandKind::UploadExhibit,
            Arc::new(agents::ValidatorAgent::new(state_store.clone())),
        );
        registry.register(
            CommandKind::DownloadPdf,
            Arc::new(agents::ValidatorAgent::new(state_store.clone())),
        );
        let supervisor = Arc::new(agents::SupervisorAgent::new(
            cases.clone(),
            writer,
            state_store.clone(),
            preview.clone(),
            clock.clone(),
        ));
        registry.register(CommandKind::GeneratePetition, supervisor.clone());
        registry.register(CommandKind::Pause, supervisor.clone());
        registry.register(CommandKind::Resume, supervisor.clone());
        registry.register(CommandKind::GetPreview, supervisor);
        let intake_agent = Arc::new(agents::IntakeAgent::new(intake.clone(), clock.clone()));
        registry.register(CommandKind::IntakeStart, intake_agent.clone());
        registry.register(CommandKind::IntakeAnswer, intake_agent.clone());
        registry.register(CommandKind::IntakeSkip, intake_agent.clone());
        registry.register(CommandKind::IntakeStatus, intake_agent.clone());
        registry.register(CommandKind::IntakeCancel, intake_agent.clone());
        registry.register(CommandKind::IntakeResume, intake_agent);

        let matrix = RolePermissionMatrix(settings.dispatch.role_permission_matrix.clone());
        let detector = InjectionDetector::new(
            settings.dispatch.injection_detector_enabled,
            settings.dispatch.injection_confidence_threshold,
        );
        let dispatcher = Arc::new(Dispatcher::new(matrix, detector, registry, audit.clone()));

        Ok(Self {
            clock,
            cases,
            audit,
            memory,
            cache,
            dispatcher,
            intake,
            state_store,
            preview,
            router,
            engine_config: settings.engine.clone(),
        })
    }

    /// Compiles `graph` into a runnable [`WorkflowEngine`] wired to this
    /// orchestrator's state store, audit trail, memory manager and clock.
    /// Graphs themselves are workflow-specific (one per document type) and
    /// so are not built by `init`; callers assemble them with
    /// [`WorkflowGraphBuilder`] and hand the compiled result here.
    pub fn build_engine(&self, graph: Arc<CompiledWorkflowGraph>) -> WorkflowEngine {
        WorkflowEngine::new(
            graph,
            self.state_store.clone(),
            self.audit.clone(),
            self.memory.clone(),
            self.clock.clone(),
            self.engine_config.default_human_gate_timeout,
        )
    }

    /// Lifecycle bookend for `init`. The in-memory backends have nothing to
    /// flush; a durable state backend or a real provider client pool would
    /// drain in-flight requests here.
    pub async fn shutdown(&self) {
        tracing::info!("orchestrator shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_wires_every_component() {
        let settings = Settings::default();
        let orchestrator = Orchestrator::init(&settings).unwrap();

        let case = orchestrator
            .cases
            .create("user-1", "EB-1A petition", CaseType::Eb1a, orchestrator.clock.now())
            .await
            .unwrap();
        assert_eq!(case.user_id, "user-1");

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn init_with_sqlite_backend_persists_state() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut settings = Settings::default();
        settings.engine.state_backend = config::StateBackend::Sqlite(file.path().to_path_buf());
        let orchestrator = Orchestrator::init(&settings).unwrap();

        let state = WorkflowState::new("t1", "c1", &["Intro"], orchestrator.clock.now());
        orchestrator.state_store.save(state).await.unwrap();
        let loaded = orchestrator.state_store.load("t1").await.unwrap();
        assert_eq!(loaded.thread_id, "t1");
    }
}
