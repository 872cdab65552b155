use async_trait::async_trait;
use quote_flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use tracing::info;

use crate::collaborators::Collaborators;

use super::types::{load_state, session_keys, store_state, task_ids};

/// Looks up reference passages for an informational question
pub struct SearchKnowledgeTask {
    collaborators: Collaborators,
}

impl SearchKnowledgeTask {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl Task for SearchKnowledgeTask {
    fn id(&self) -> &str {
        task_ids::SEARCH_KNOWLEDGE
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!("running task: {}", self.id());

        let query: String = context
            .get(session_keys::USER_INPUT)
            .await
            .ok_or_else(|| GraphError::ContextError("user_input not found".to_string()))?;
        let mut state = load_state(&context).await;

        state.knowledge_context = self
            .collaborators
            .knowledge_context(&query, state.line_of_business)
            .await;
        info!(
            found = state.knowledge_context.is_some(),
            filter = ?state.line_of_business,
            "Knowledge search finished"
        );

        store_state(&context, &state).await;
        context.set(session_keys::KNOWLEDGE_READY, true).await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some("Knowledge context retrieved".to_string()),
        ))
    }
}
