use async_trait::async_trait;
use quote_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::{info, warn};

use crate::{rating::rate_profile, routing::Route};

use super::{
    prompts::missing_details_reply,
    types::{load_state, store_state, task_ids},
};

/// Runs the rating engine for the active line of business
pub struct CalculateQuoteTask;

#[async_trait]
impl Task for CalculateQuoteTask {
    fn id(&self) -> &str {
        task_ids::CALCULATE_QUOTE
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!("running task: {}", self.id());

        let mut state = load_state(&context).await;

        let rated = match state.line_of_business {
            Some(line) => rate_profile(line, &state.profile).map_err(|e| e.to_string()),
            None => Err("no line of business selected".to_string()),
        };

        match rated {
            Ok(quote) => {
                info!(
                    line = %quote.line_of_business(),
                    annual = quote.annual_premium(),
                    monthly = quote.monthly_premium(),
                    "Quote calculated"
                );
                state.record_quote(quote);
                store_state(&context, &state).await;
                Ok(TaskResult::new_with_status(
                    None,
                    NextAction::ContinueAndExecute,
                    Some("Quote calculated".to_string()),
                ))
            }
            Err(reason) => {
                warn!(reason = %reason, "Quote calculation skipped");
                state.route = Route::GatherMore;
                store_state(&context, &state).await;

                let response = missing_details_reply(state.line_of_business, &state);
                context.add_assistant_message(response.clone()).await;
                Ok(TaskResult::new_with_status(
                    Some(response),
                    NextAction::GoTo(task_ids::GATHER_INFO.to_string()),
                    Some(reason),
                ))
            }
        }
    }
}
