//! Workflow engine (C9): a typed directed graph over [`WorkflowState`].
//!
//! Grounded in the teacher's `graph::compiled::CompiledStateGraph<S>` (node
//! map, linear edge order, conditional routing via `next_map`,
//! `execute_node_with_retry`, `RetryPolicy`) and `graph::{Next, conditional,
//! interrupt, run_context}`. Specialized from the teacher's graph generic
//! over `S` down to a single concrete state (`WorkflowState`), since this
//! spec's graph is not reused across unrelated state shapes; the
//! fan-out/fan-in, pause/resume, and cancel-with-compensations behavior is
//! new, grounded in spec §4.9 rather than in teacher code (the teacher's
//! compiled graph has no pause primitive and no fan-out node kind).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::audit::AuditTrail;
use crate::error::OrchestratorError;
use crate::ids::Clock;
use crate::memory::MemoryManager;

use super::hitl::{wait_for_resolution, HumanChoice, HumanGateRegistry};
use super::state::{WorkflowState, WorkflowStatus};
use super::state_store::WorkflowStateStore;

/// Next step after running a node, mirroring the teacher's `graph::Next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Continue,
    Node(String),
    End,
}

/// Retry policy for node execution, mirroring the teacher's
/// `graph::retry::RetryPolicy`, with jitter added per spec §4.9 ("bounded
/// attempts, jittered"). Jitter is derived deterministically from a BLAKE3
/// hash of `(seed, attempt)` rather than from a random source, so workflow
/// runs stay reproducible under a fixed clock and fixture set (spec §4.9's
/// determinism requirement extends naturally to retry timing in tests).
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    None,
    Exponential {
        max_attempts: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    pub fn exponential(max_attempts: usize, initial_interval: Duration, max_interval: Duration) -> Self {
        RetryPolicy::Exponential {
            max_attempts,
            initial_interval,
            max_interval,
            multiplier: 2.0,
        }
    }

    fn should_retry(&self, attempt: usize) -> bool {
        match self {
            RetryPolicy::None => false,
            RetryPolicy::Exponential { max_attempts, .. } => attempt < *max_attempts,
        }
    }

    fn delay(&self, attempt: usize, seed: &str) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Exponential {
                initial_interval,
                max_interval,
                multiplier,
                ..
            } => {
                let base_secs = initial_interval.as_secs_f64() * multiplier.powi(attempt as i32);
                let base = Duration::from_secs_f64(base_secs).min(*max_interval);
                jitter(base, attempt, seed)
            }
        }
    }
}

fn jitter(base: Duration, attempt: usize, seed: &str) -> Duration {
    let digest = blake3::hash(format!("{seed}:{attempt}").as_bytes());
    let byte = digest.as_bytes()[0];
    let factor = 1.0 + (byte as f64 / 255.0) * 0.2;
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// Router function: `(state) -> routing key`, looked up in an optional path
/// map (teacher's `graph::conditional::ConditionalRouter`).
pub type RouterFn = Arc<dyn Fn(&WorkflowState) -> String + Send + Sync>;

#[derive(Clone)]
pub struct ConditionalRouter {
    path: RouterFn,
    path_map: Option<HashMap<String, String>>,
}

impl ConditionalRouter {
    pub fn new(path: RouterFn, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    fn resolve(&self, state: &WorkflowState) -> String {
        let key = (self.path)(state);
        self.path_map
            .as_ref()
            .and_then(|m| m.get(&key))
            .cloned()
            .unwrap_or(key)
    }
}

#[derive(Clone)]
pub enum NextEntry {
    Unconditional(String),
    Conditional(ConditionalRouter),
}

pub const END: &str = "__end__";

/// Shared context passed into every node, carrying the collaborators a node
/// needs without giving it direct access to the engine's internals.
pub struct RunContext {
    pub thread_id: String,
    pub user_id: String,
    pub case_id: String,
    pub memory: Arc<MemoryManager>,
    pub audit: Arc<dyn AuditTrail>,
    pub clock: Arc<dyn Clock>,
    pub human_gates: Arc<HumanGateRegistry>,
    pub human_gate_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Suspends the node until an external `resolve(thread_id, choice)`
    /// call arrives, or `human_gate_timeout` elapses (spec §4.13). The
    /// state's `pending_approval` must be set by the caller (normally via
    /// the state store) before this is awaited, and cleared after.
    pub async fn await_human_gate(&self, prompt: &str, options: &[String]) -> HumanChoice {
        let rx = self.human_gates.register(&self.thread_id);
        tracing::info!(thread_id = %self.thread_id, prompt, ?options, "awaiting human gate");
        let (choice, outcome) = wait_for_resolution(
            &self.human_gates,
            &self.thread_id,
            rx,
            self.human_gate_timeout,
            "reject",
        )
        .await;
        tracing::info!(thread_id = %self.thread_id, ?outcome, choice = %choice.choice, "human gate resolved");
        choice
    }
}

#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> &str;

    async fn run(
        &self,
        state: WorkflowState,
        ctx: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError>;
}

/// Concurrently runs declared child subgraphs against a clone of the
/// incoming state, joins in declaration order, and folds the results
/// through `reducer`, which also decides continue-vs-abort on partial
/// failure (spec §4.9 fan-out/fan-in).
pub struct FanOutNode {
    id: String,
    children: Vec<Arc<CompiledWorkflowGraph>>,
    reducer: Arc<
        dyn Fn(WorkflowState, Vec<Result<WorkflowState, OrchestratorError>>) -> Result<(WorkflowState, Next), OrchestratorError>
            + Send
            + Sync,
    >,
}

impl FanOutNode {
    pub fn new(
        id: impl Into<String>,
        children: Vec<Arc<CompiledWorkflowGraph>>,
        reducer: impl Fn(WorkflowState, Vec<Result<WorkflowState, OrchestratorError>>) -> Result<(WorkflowState, Next), OrchestratorError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            children,
            reducer: Arc::new(reducer),
        }
    }
}

#[async_trait]
impl Node for FanOutNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        state: WorkflowState,
        ctx: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let mut futures = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let branch_state = state.clone();
            let child = child.clone();
            futures.push(async move { child.run_to_completion(branch_state, ctx).await });
        }
        let results = futures::future::join_all(futures).await;
        (self.reducer)(state, results)
    }
}

/// A compiled, immutable graph ready to execute. Built via
/// [`WorkflowGraphBuilder::compile`].
pub struct CompiledWorkflowGraph {
    nodes: HashMap<String, Arc<dyn Node>>,
    entry: String,
    edge_order: Vec<String>,
    next_map: HashMap<String, NextEntry>,
    /// Compensating nodes, run in reverse declaration order on cancel
    /// (spec §4.9's "cancel... runs any registered compensating nodes in
    /// reverse declaration order").
    compensations: Vec<Arc<dyn Node>>,
    retry_policy: RetryPolicy,
}

impl CompiledWorkflowGraph {
    fn next_node_id(&self, current: &str, returned: &Next, state: &WorkflowState) -> String {
        if let Some(entry) = self.next_map.get(current) {
            match entry {
                NextEntry::Unconditional(to) => return to.clone(),
                NextEntry::Conditional(router) => return router.resolve(state),
            }
        }
        match returned {
            Next::Node(id) => id.clone(),
            Next::End => END.to_string(),
            Next::Continue => {
                let pos = self.edge_order.iter().position(|n| n == current);
                match pos.and_then(|i| self.edge_order.get(i + 1)) {
                    Some(next) => next.clone(),
                    None => END.to_string(),
                }
            }
        }
    }

    async fn execute_node_with_retry(
        &self,
        node: &Arc<dyn Node>,
        state: WorkflowState,
        ctx: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let mut attempt = 0;
        loop {
            match node.run(state.clone(), ctx).await {
                Ok(result) => return Ok(result),
                Err(err) if self.retry_policy.should_retry(attempt) => {
                    let delay = self.retry_policy.delay(attempt, node.id());
                    tracing::warn!(node = node.id(), attempt, ?delay, %err, "node failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(OrchestratorError::RetryExhausted(err.to_string())),
            }
        }
    }

    /// Runs the graph to completion without touching a state store; used by
    /// [`FanOutNode`]'s child subgraphs, which are scoped to their own
    /// branch state and merged by the parent's reducer.
    async fn run_to_completion(
        &self,
        mut state: WorkflowState,
        ctx: &RunContext,
    ) -> Result<WorkflowState, OrchestratorError> {
        let mut current = self.entry.clone();
        loop {
            if current == END {
                return Ok(state);
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| OrchestratorError::Internal(format!("unknown node {current}")))?
                .clone();
            let (next_state, returned) = self.execute_node_with_retry(&node, state, ctx).await?;
            let next_id = self.next_node_id(&current, &returned, &next_state);
            state = next_state;
            current = next_id;
        }
    }
}

pub struct WorkflowGraphBuilder {
    nodes: HashMap<String, Arc<dyn Node>>,
    entry: Option<String>,
    edge_order: Vec<String>,
    next_map: HashMap<String, NextEntry>,
    compensations: Vec<Arc<dyn Node>>,
    retry_policy: RetryPolicy,
}

impl Default for WorkflowGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowGraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            entry: None,
            edge_order: vec![],
            next_map: HashMap::new(),
            compensations: vec![],
            retry_policy: RetryPolicy::None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn add_node(mut self, node: Arc<dyn Node>) -> Self {
        let id = node.id().to_string();
        if self.entry.is_none() {
            self.entry = Some(id.clone());
        }
        self.edge_order.push(id.clone());
        self.nodes.insert(id, node);
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.next_map
            .insert(from.to_string(), NextEntry::Unconditional(to.to_string()));
        self
    }

    pub fn add_conditional_edges(mut self, from: &str, router: ConditionalRouter) -> Self {
        self.next_map
            .insert(from.to_string(), NextEntry::Conditional(router));
        self
    }

    /// Registers a compensating node, run in reverse declaration order on
    /// cancel.
    pub fn add_compensation(mut self, node: Arc<dyn Node>) -> Self {
        self.compensations.push(node);
        self
    }

    pub fn compile(self) -> Result<Arc<CompiledWorkflowGraph>, OrchestratorError> {
        let entry = self
            .entry
            .ok_or_else(|| OrchestratorError::InvalidState("graph has no nodes".to_string()))?;
        Ok(Arc::new(CompiledWorkflowGraph {
            nodes: self.nodes,
            entry,
            edge_order: self.edge_order,
            next_map: self.next_map,
            compensations: self.compensations,
            retry_policy: self.retry_policy,
        }))
    }
}

struct ThreadControl {
    cancel: Arc<AtomicBool>,
    pause_requested: Arc<AtomicBool>,
}

/// Drives a [`CompiledWorkflowGraph`] against durable state, committing a
/// checkpoint (store write, audit append, broadcast) after every node per
/// spec §4.9.
pub struct WorkflowEngine {
    graph: Arc<CompiledWorkflowGraph>,
    state_store: Arc<dyn WorkflowStateStore>,
    audit: Arc<dyn AuditTrail>,
    memory: Arc<MemoryManager>,
    clock: Arc<dyn Clock>,
    human_gates: Arc<HumanGateRegistry>,
    human_gate_timeout: Duration,
    controls: DashMap<String, ThreadControl>,
}

impl WorkflowEngine {
    pub fn new(
        graph: Arc<CompiledWorkflowGraph>,
        state_store: Arc<dyn WorkflowStateStore>,
        audit: Arc<dyn AuditTrail>,
        memory: Arc<MemoryManager>,
        clock: Arc<dyn Clock>,
        human_gate_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            state_store,
            audit,
            memory,
            clock,
            human_gates: Arc::new(HumanGateRegistry::new()),
            human_gate_timeout,
            controls: DashMap::new(),
        }
    }

    fn context_for(&self, thread_id: &str, user_id: &str, case_id: &str) -> (RunContext, Arc<AtomicBool>) {
        let cancel = Arc::new(AtomicBool::new(false));
        let pause_requested = Arc::new(AtomicBool::new(false));
        self.controls.insert(
            thread_id.to_string(),
            ThreadControl {
                cancel: cancel.clone(),
                pause_requested: pause_requested.clone(),
            },
        );
        (
            RunContext {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
                case_id: case_id.to_string(),
                memory: self.memory.clone(),
                audit: self.audit.clone(),
                clock: self.clock.clone(),
                human_gates: self.human_gates.clone(),
                human_gate_timeout: self.human_gate_timeout,
                cancel,
            },
            pause_requested,
        )
    }

    /// Starts a new run from the graph's entry node, saving the initial
    /// state before the first node executes.
    pub async fn start(
        &self,
        initial_state: WorkflowState,
        user_id: &str,
    ) -> Result<WorkflowState, OrchestratorError> {
        let thread_id = initial_state.thread_id.clone();
        let case_id = initial_state.case_id.clone();
        self.state_store.save(initial_state).await?;
        let (ctx, pause_requested) = self.context_for(&thread_id, user_id, &case_id);
        self.run_loop(self.graph.entry.clone(), ctx, pause_requested).await
    }

    /// Resumes a paused (or crash-interrupted) thread from its last
    /// recorded `current_node`, re-evaluating routers as if the node had
    /// just completed (spec §4.9).
    pub async fn resume(&self, thread_id: &str, user_id: &str) -> Result<WorkflowState, OrchestratorError> {
        let state = self.state_store.load(thread_id).await?;
        if state.status == WorkflowStatus::Completed || state.status == WorkflowStatus::Error {
            return Err(OrchestratorError::InvalidState(format!(
                "thread {thread_id} is terminal"
            )));
        }
        let start_node = match &state.current_node {
            Some(node_id) => self.graph.next_node_id(node_id, &Next::Continue, &state),
            None => self.graph.entry.clone(),
        };
        self.state_store
            .set_status(thread_id, WorkflowStatus::Running, None)
            .await?;
        let (ctx, pause_requested) = self.context_for(thread_id, user_id, &state.case_id);
        self.run_loop(start_node, ctx, pause_requested).await
    }

    pub fn pause(&self, thread_id: &str) -> Result<(), OrchestratorError> {
        match self.controls.get(thread_id) {
            Some(control) => {
                control.pause_requested.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(OrchestratorError::InvalidState(format!(
                "thread {thread_id} is not running"
            ))),
        }
    }

    pub fn cancel(&self, thread_id: &str) -> Result<(), OrchestratorError> {
        match self.controls.get(thread_id) {
            Some(control) => {
                control.cancel.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(OrchestratorError::InvalidState(format!(
                "thread {thread_id} is not running"
            ))),
        }
    }

    async fn run_compensations(&self, thread_id: &str, state: WorkflowState, ctx: &RunContext) -> WorkflowState {
        let mut state = state;
        for node in self.graph.compensations.iter().rev() {
            match node.run(state.clone(), ctx).await {
                Ok((next_state, _)) => state = next_state,
                Err(err) => {
                    tracing::error!(thread_id, node = node.id(), %err, "compensation failed");
                }
            }
        }
        state
    }

    async fn run_loop(
        &self,
        mut current: String,
        ctx: RunContext,
        pause_requested: Arc<AtomicBool>,
    ) -> Result<WorkflowState, OrchestratorError> {
        loop {
            if current == END {
                let state = self
                    .state_store
                    .set_status(&ctx.thread_id, WorkflowStatus::Completed, None)
                    .await?;
                self.audit
                    .append(Some(ctx.user_id.clone()), "workflow", "completed", serde_json::json!({ "thread_id": ctx.thread_id }))
                    .await
                    .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                return Ok(state);
            }

            if ctx.is_cancelled() {
                let state = self.state_store.load(&ctx.thread_id).await?;
                let state = self.run_compensations(&ctx.thread_id, state, &ctx).await;
                let final_state = self
                    .state_store
                    .set_status(&ctx.thread_id, WorkflowStatus::Error, Some("cancelled".to_string()))
                    .await?;
                self.audit
                    .append(Some(ctx.user_id.clone()), "workflow", "cancelled", serde_json::json!({ "thread_id": ctx.thread_id }))
                    .await
                    .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                let _ = state;
                return Ok(final_state);
            }

            if pause_requested.load(Ordering::SeqCst) {
                let state = self
                    .state_store
                    .set_status(&ctx.thread_id, WorkflowStatus::Paused, None)
                    .await?;
                return Ok(state);
            }

            let state = self.state_store.load(&ctx.thread_id).await?;
            let node = match self.graph.nodes.get(&current) {
                Some(node) => node.clone(),
                None => {
                    return Err(OrchestratorError::Internal(format!("unknown node {current}")));
                }
            };

            let outcome = self.graph.execute_node_with_retry(&node, state.clone(), &ctx).await;
            match outcome {
                Ok((next_state, returned)) => {
                    let next_id = self.graph.next_node_id(&current, &returned, &next_state);
                    self.commit(&ctx, &current, next_state).await?;
                    current = next_id;
                }
                Err(err) => {
                    self.state_store
                        .set_status(&ctx.thread_id, WorkflowStatus::Error, Some(err.to_string()))
                        .await?;
                    self.audit
                        .append(
                            Some(ctx.user_id.clone()),
                            "workflow",
                            "node_failed",
                            serde_json::json!({ "thread_id": ctx.thread_id, "node": current, "reason": err.reason_code() }),
                        )
                        .await
                        .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                    return Err(err);
                }
            }
        }
    }

    /// Commits a node's output: saves the section patches it implies, then
    /// records `current_node`, then appends the audit entry. Broadcasting
    /// happens inside the state store's writes (spec §4.9: "commits a
    /// checkpoint: atomic save... audit append, broadcast of the delta").
    async fn commit(
        &self,
        ctx: &RunContext,
        completed_node: &str,
        mut next_state: WorkflowState,
    ) -> Result<(), OrchestratorError> {
        next_state.current_node = Some(completed_node.to_string());
        self.state_store.save(next_state).await?;
        self.audit
            .append(
                Some(ctx.user_id.clone()),
                "workflow",
                "node_committed",
                serde_json::json!({ "thread_id": ctx.thread_id, "node": completed_node }),
            )
            .await
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn human_gates(&self) -> Arc<HumanGateRegistry> {
        self.human_gates.clone()
    }
}

/// Convenience node wrapping a plain async closure, for simple
/// single-section nodes that only need to update a section's content and
/// status (most petition-drafting nodes).
pub struct SectionWriterNode {
    id: String,
    section_id: String,
    write: Arc<dyn Fn(&WorkflowState) -> String + Send + Sync>,
}

impl SectionWriterNode {
    pub fn new(
        id: impl Into<String>,
        section_id: impl Into<String>,
        write: impl Fn(&WorkflowState) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            section_id: section_id.into(),
            write: Arc::new(write),
        }
    }
}

#[async_trait]
impl Node for SectionWriterNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let content = (self.write)(&state);
        if let Some(section) = state.section_mut(&self.section_id) {
            section.content = Some(content);
            section.status = super::state::SectionStatus::Completed;
        }
        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditTrail;
    use crate::ids::SystemClock;
    use crate::memory::embedder::HashEmbedder;
    use crate::memory::episodic::InMemoryEpisodicStore;
    use crate::memory::semantic::InMemorySemanticStore;
    use crate::workflow::state_store::InMemoryWorkflowStateStore;
    use std::sync::atomic::AtomicUsize;

    fn memory_manager() -> Arc<MemoryManager> {
        Arc::new(MemoryManager::new(
            Arc::new(InMemoryEpisodicStore::new()),
            Arc::new(InMemorySemanticStore::new(8)),
            Arc::new(HashEmbedder::new(8)),
            Arc::new(InMemoryAuditTrail::new(Arc::new(SystemClock))),
            Arc::new(SystemClock),
        ))
    }

    fn three_section_graph() -> Arc<CompiledWorkflowGraph> {
        let n1 = Arc::new(SectionWriterNode::new("write-1", "section-1", |_| "intro".to_string()));
        let n2 = Arc::new(SectionWriterNode::new("write-2", "section-2", |_| "body".to_string()));
        let n3 = Arc::new(SectionWriterNode::new("write-3", "section-3", |_| "closing".to_string()));
        WorkflowGraphBuilder::new()
            .add_node(n1)
            .add_node(n2)
            .add_node(n3)
            .compile()
            .unwrap()
    }

    fn engine(graph: Arc<CompiledWorkflowGraph>) -> WorkflowEngine {
        WorkflowEngine::new(
            graph,
            Arc::new(InMemoryWorkflowStateStore::new(Arc::new(SystemClock))),
            Arc::new(InMemoryAuditTrail::new(Arc::new(SystemClock))),
            memory_manager(),
            Arc::new(SystemClock),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn runs_all_nodes_to_completion() {
        let graph = three_section_graph();
        let engine = engine(graph);
        let state = WorkflowState::new("t1", "c1", &["Intro", "Body", "Closing"], chrono::Utc::now());
        let final_state = engine.start(state, "u1").await.unwrap();
        assert_eq!(final_state.status, WorkflowStatus::Completed);
        assert!(final_state
            .sections
            .iter()
            .all(|s| s.status == super::super::state::SectionStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_marks_error_with_cancelled_reason() {
        struct SlowNode {
            hit: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl Node for SlowNode {
            fn id(&self) -> &str {
                "slow"
            }
            async fn run(
                &self,
                state: WorkflowState,
                ctx: &RunContext,
            ) -> Result<(WorkflowState, Next), OrchestratorError> {
                self.hit.fetch_add(1, Ordering::SeqCst);
                ctx.cancel.store(true, Ordering::SeqCst);
                Ok((state, Next::Continue))
            }
        }
        let hit = Arc::new(AtomicUsize::new(0));
        let graph = WorkflowGraphBuilder::new()
            .add_node(Arc::new(SlowNode { hit: hit.clone() }))
            .compile()
            .unwrap();
        let engine = engine(graph);
        let state = WorkflowState::new("t1", "c1", &["Only"], chrono::Utc::now());
        let final_state = engine.start(state, "u1").await.unwrap();
        assert_eq!(final_state.status, WorkflowStatus::Error);
        assert_eq!(final_state.error_reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn pause_halts_after_current_node_and_resume_continues() {
        let graph = three_section_graph();
        let state_store = Arc::new(InMemoryWorkflowStateStore::new(Arc::new(SystemClock)));
        let engine = WorkflowEngine::new(
            graph,
            state_store.clone(),
            Arc::new(InMemoryAuditTrail::new(Arc::new(SystemClock))),
            memory_manager(),
            Arc::new(SystemClock),
            Duration::from_secs(300),
        );

        let initial = WorkflowState::new("t1", "c1", &["Intro", "Body", "Closing"], chrono::Utc::now());
        state_store.save(initial).await.unwrap();
        let (ctx, pause_requested) = engine.context_for("t1", "u1", "c1");
        pause_requested.store(true, Ordering::SeqCst);
        let paused_state = engine.run_loop("write-1".to_string(), ctx, pause_requested).await.unwrap();
        assert_eq!(paused_state.status, WorkflowStatus::Paused);

        let final_state = engine.resume("t1", "u1").await.unwrap();
        assert_eq!(final_state.status, WorkflowStatus::Completed);
    }
}
