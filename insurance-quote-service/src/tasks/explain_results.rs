use async_trait::async_trait;
use quote_flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use tracing::{info, warn};

use crate::collaborators::{ChatMessage, Collaborators};

use super::{
    prompts::{EXPLAIN_PROMPT, narrate_quote},
    types::{PROMPT_HISTORY, load_state, task_ids},
};

/// Presents the freshly calculated quote and ends the pass
pub struct ExplainResultsTask {
    collaborators: Collaborators,
}

impl ExplainResultsTask {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl Task for ExplainResultsTask {
    fn id(&self) -> &str {
        task_ids::EXPLAIN_RESULTS
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!("running task: {}", self.id());

        let state = load_state(&context).await;
        let quote = state
            .quote
            .ok_or_else(|| GraphError::ContextError("quote not found".to_string()))?;

        let breakdown = narrate_quote(&quote);
        let mut messages = vec![
            ChatMessage::system(EXPLAIN_PROMPT),
            ChatMessage::system(format!("Quote details:\n{breakdown}")),
        ];
        messages.extend(context.get_last_messages(PROMPT_HISTORY).await);

        let response = match self.collaborators.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Narration unavailable, sending plain breakdown");
                breakdown
            }
        };

        context.add_assistant_message(response.clone()).await;
        Ok(TaskResult::new_with_status(
            Some(response),
            NextAction::End,
            Some("Quote presented".to_string()),
        ))
    }
}
