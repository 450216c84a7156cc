//! Workflow subsystem (C8/C9/C13): durable state, the typed graph engine
//! that mutates it, and the human-in-the-loop gate nodes suspend on.

pub mod graph;
pub mod hitl;
pub mod sqlite_store;
pub mod state;
pub mod state_store;

pub use graph::{
    CompiledWorkflowGraph, ConditionalRouter, FanOutNode, Next, Node, RetryPolicy, RunContext,
    SectionWriterNode, WorkflowEngine, WorkflowGraphBuilder, END,
};
pub use hitl::{GateOutcome, HumanChoice, HumanGateRegistry};
pub use sqlite_store::SqliteWorkflowStateStore;
pub use state::{
    DeltaKind, Exhibit, PendingApproval, Section, SectionPatch, SectionStatus, StateDelta,
    WorkflowLogEntry, WorkflowState, WorkflowStatus,
};
pub use state_store::{CheckpointError, InMemoryWorkflowStateStore, WorkflowStateStore};
