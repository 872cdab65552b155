use async_trait::async_trait;
use quote_flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    collaborators::{ChatMessage, Collaborators, ModelReply},
    profile::{LineOfBusiness, ProfileError},
    rating::{tool_line, tool_specs},
    routing::{Route, has_sufficient_profile, route},
    state::ConversationState,
};

use super::{
    prompts::{
        DEGRADED_REPLY, GATHER_INFO_PROMPT, KNOWLEDGE_PROMPT, missing_details_reply, profile_note,
        unchanged_quote_reply,
    },
    types::{PROMPT_HISTORY, load_state, session_keys, store_state, task_ids},
};

/// Default state of a turn: records the message, updates the profile and
/// decides where the turn goes next
pub struct GatherInfoTask {
    collaborators: Collaborators,
}

impl GatherInfoTask {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    async fn history(&self, context: &Context, system: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let mut messages = system;
        messages.extend(context.get_last_messages(PROMPT_HISTORY).await);
        messages
    }

    async fn reply(
        &self,
        context: &Context,
        state: &ConversationState,
        response: String,
        status: String,
    ) -> Result<TaskResult> {
        store_state(context, state).await;
        context.add_assistant_message(response.clone()).await;
        Ok(TaskResult::new_with_status(
            Some(response),
            NextAction::WaitForInput,
            Some(status),
        ))
    }

    /// Second visit in a pass: answer the question from the retrieved context
    async fn answer_from_knowledge(
        &self,
        context: &Context,
        state: ConversationState,
    ) -> Result<TaskResult> {
        let mut system = vec![ChatMessage::system(KNOWLEDGE_PROMPT)];
        if let Some(references) = &state.knowledge_context {
            system.push(ChatMessage::system(format!("Reference material:\n{references}")));
        }
        let messages = self.history(context, system).await;

        let response = match self.collaborators.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Knowledge answer degraded");
                match &state.knowledge_context {
                    Some(references) => format!(
                        "{DEGRADED_REPLY} Here is what I found on that topic:\n\n{references}"
                    ),
                    None => format!("{DEGRADED_REPLY} Please try your question again shortly."),
                }
            }
        };

        self.reply(context, &state, response, "Answered knowledge question".into())
            .await
    }

    async fn continue_to(&self, context: &Context, state: &ConversationState) -> Result<TaskResult> {
        store_state(context, state).await;
        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(format!("Routing to {}", state.route)),
        ))
    }

    /// Let the model ask the next question or pull details out of the message
    /// through a rating tool call. A sufficient profile without a current quote
    /// is rated even when the model answers in text or is unavailable.
    async fn converse(&self, context: &Context, mut state: ConversationState) -> Result<TaskResult> {
        let system = vec![
            ChatMessage::system(GATHER_INFO_PROMPT),
            ChatMessage::system(profile_note(&state)),
        ];
        let messages = self.history(context, system).await;

        let reply = self
            .collaborators
            .complete_with_tools(&messages, &tool_specs())
            .await;

        match reply {
            Ok(ModelReply::Text(text)) => {
                if quote_due(&state) {
                    return self.calculate(context, &mut state).await;
                }
                state.route = Route::GatherMore;
                self.reply(context, &state, text, "Gathering details".into())
                    .await
            }
            Ok(ModelReply::ToolCall { name, arguments }) => {
                let Some(line) = tool_line(&name) else {
                    warn!(tool = %name, "Model called an unknown tool");
                    if quote_due(&state) {
                        return self.calculate(context, &mut state).await;
                    }
                    state.route = Route::GatherMore;
                    let response = missing_details_reply(state.line_of_business, &state);
                    return self
                        .reply(context, &state, response, "Gathering details".into())
                        .await;
                };

                info!(tool = %name, "Applying tool call arguments to profile");
                let update = arguments.as_object().cloned().unwrap_or_default();
                let report = match state.profile.apply_update(&update) {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(error = %e, "Rejected tool call arguments");
                        state.route = Route::GatherMore;
                        return self
                            .reply(context, &state, invalid_fields_reply(&e), "Invalid details".into())
                            .await;
                    }
                };
                state.line_of_business = Some(line);

                if !has_sufficient_profile(&state) {
                    state.route = Route::GatherMore;
                    let response = missing_details_reply(Some(line), &state);
                    self.reply(context, &state, response, "Gathering details".into())
                        .await
                } else if !report.changed.is_empty() || !state.has_current_quote() {
                    info!(changed = ?report.changed, "Profile changed, rating again");
                    self.calculate(context, &mut state).await
                } else {
                    state.route = Route::GatherMore;
                    let response = match &state.quote {
                        Some(quote) => unchanged_quote_reply(quote),
                        None => missing_details_reply(Some(line), &state),
                    };
                    self.reply(context, &state, response, "Quote unchanged".into())
                        .await
                }
            }
            Err(e) => {
                warn!(error = %e, "Language model unavailable, replying without it");
                if quote_due(&state) {
                    return self.calculate(context, &mut state).await;
                }
                state.route = Route::GatherMore;
                let response = format!(
                    "{DEGRADED_REPLY} {}",
                    missing_details_reply(state.line_of_business, &state)
                );
                self.reply(context, &state, response, "Degraded reply".into())
                    .await
            }
        }
    }

    async fn calculate(&self, context: &Context, state: &mut ConversationState) -> Result<TaskResult> {
        state.route = Route::Calculate;
        self.continue_to(context, state).await
    }
}

/// The profile can be rated and no quote exists for the active line yet
fn quote_due(state: &ConversationState) -> bool {
    has_sufficient_profile(state) && !state.has_current_quote()
}

fn invalid_fields_reply(error: &ProfileError) -> String {
    let details = error
        .field_errors()
        .iter()
        .map(|e| format!("- {}: {}", e.field.replace('_', " "), e.reason))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Some of those details don't look right:\n{details}\nCould you double-check them?")
}

#[async_trait]
impl Task for GatherInfoTask {
    fn id(&self) -> &str {
        task_ids::GATHER_INFO
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!("running task: {}", self.id());

        let mut state = load_state(&context).await;

        if context.remove(session_keys::KNOWLEDGE_READY).await.is_some() {
            return self.answer_from_knowledge(&context, state).await;
        }

        let user_input: String = context
            .get(session_keys::USER_INPUT)
            .await
            .ok_or_else(|| GraphError::ContextError("user_input not found".to_string()))?;
        context.add_user_message(user_input.clone()).await;

        if let Some(line) = state.observe_message(&user_input) {
            info!(line = %line, "Line of business mentioned");
        }

        let mut form_submitted = false;
        if let Some(Value::Object(update)) = context.remove(session_keys::PROFILE_UPDATE).await {
            if let Err(response) = apply_form_update(&mut state, &update) {
                return self
                    .reply(&context, &state, response, "Invalid details".into())
                    .await;
            }
            form_submitted = true;
        }

        state.route = route(&state, &user_input);
        info!(route = %state.route, "Routing turn");

        // without a form the model extracts changed details before any rating
        match state.route {
            Route::SearchKnowledge => self.continue_to(&context, &state).await,
            Route::Calculate if form_submitted => self.continue_to(&context, &state).await,
            Route::Calculate | Route::GatherMore => self.converse(&context, state).await,
        }
    }
}

fn apply_form_update(
    state: &mut ConversationState,
    update: &Map<String, Value>,
) -> std::result::Result<(), String> {
    match state.profile.apply_update(update) {
        Ok(report) => {
            if let Some(line) = update
                .get("insurance_type")
                .and_then(|v| serde_json::from_value::<LineOfBusiness>(v.clone()).ok())
            {
                state.line_of_business = Some(line);
            }
            let ignored: Vec<_> = report
                .ignored
                .iter()
                .filter(|key| key.as_str() != "insurance_type")
                .collect();
            if !ignored.is_empty() {
                info!(ignored = ?ignored, "Ignored unknown profile keys");
            }
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Rejected profile update");
            Err(invalid_fields_reply(&e))
        }
    }
}
