use quote_flow::Context;

use crate::state::ConversationState;

/// Keys used in the session context
pub mod session_keys {
    /// Latest user message of the turn
    pub const USER_INPUT: &str = "user_input";
    /// Structured profile fields submitted with the turn
    pub const PROFILE_UPDATE: &str = "profile_update";
    pub const CONVERSATION: &str = "conversation";
    /// Set by the knowledge search so the next gather pass answers from the context
    pub const KNOWLEDGE_READY: &str = "knowledge_ready";
}

/// Stable task identifiers, persisted as the session's current task
pub mod task_ids {
    pub const GATHER_INFO: &str = "gather_info";
    pub const SEARCH_KNOWLEDGE: &str = "search_knowledge";
    pub const CALCULATE_QUOTE: &str = "calculate_quote";
    pub const EXPLAIN_RESULTS: &str = "explain_results";
}

/// Number of recent turns sent along with a prompt
pub const PROMPT_HISTORY: usize = 20;

pub fn load_state_sync(context: &Context) -> ConversationState {
    context
        .get_sync(session_keys::CONVERSATION)
        .unwrap_or_default()
}

pub async fn load_state(context: &Context) -> ConversationState {
    load_state_sync(context)
}

pub async fn store_state(context: &Context, state: &ConversationState) {
    context.set(session_keys::CONVERSATION, state).await;
}
