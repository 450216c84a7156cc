//! A section-writing workflow node backed by the model router.
//!
//! `workflow::graph::SectionWriterNode` only takes a synchronous closure,
//! which cannot `await` [`ModelRouter::complete`]; this is the same node
//! shape generalized to an async model call, grounded in the teacher's
//! pattern of implementing `graph::Node` directly for anything a plain
//! closure can't express (see `graph::FanOutNode` in the same module).

use async_trait::async_trait;
use std::sync::Arc;

use orchestrator::workflow::{Next, Node, RunContext, SectionStatus, WorkflowState};
use orchestrator::{ModelRouter, OrchestratorError};

pub struct ModelSectionWriterNode {
    id: String,
    section_id: String,
    prompt: String,
    router: Arc<ModelRouter>,
}

impl ModelSectionWriterNode {
    pub fn new(
        id: impl Into<String>,
        section_id: impl Into<String>,
        prompt: impl Into<String>,
        router: Arc<ModelRouter>,
    ) -> Self {
        Self {
            id: id.into(),
            section_id: section_id.into(),
            prompt: prompt.into(),
            router,
        }
    }
}

#[async_trait]
impl Node for ModelSectionWriterNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let completion = self.router.complete(&self.prompt, 0.0).await?;
        tracing::info!(
            node = %self.id,
            provider = %completion.provider_id,
            cached = completion.cached,
            "section drafted"
        );
        if let Some(section) = state.section_mut(&self.section_id) {
            section.content = Some(completion.text);
            section.status = SectionStatus::Completed;
        }
        Ok((state, Next::Continue))
    }
}
