//! Decides the next orchestration step for a turn.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::ConversationState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[default]
    GatherMore,
    SearchKnowledge,
    Calculate,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Route::GatherMore => "gather_more",
            Route::SearchKnowledge => "search_knowledge",
            Route::Calculate => "calculate",
        };
        f.write_str(label)
    }
}

/// Phrases marking an informational question
pub const KNOWLEDGE_PHRASES: [&str; 5] = [
    "what is",
    "explain",
    "tell me about",
    "how does",
    "difference between",
];

pub fn is_knowledge_question(message: &str) -> bool {
    let message = message.to_lowercase();
    KNOWLEDGE_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

/// Whether the routing trigger fields of the active line are all present
pub fn has_sufficient_profile(state: &ConversationState) -> bool {
    state
        .line_of_business
        .is_some_and(|line| state.profile.contains_all(line.trigger_fields()))
}

/// Knowledge questions win over a sufficient profile for the turn they are asked in
pub fn route(state: &ConversationState, latest_user_message: &str) -> Route {
    if is_knowledge_question(latest_user_message) {
        Route::SearchKnowledge
    } else if has_sufficient_profile(state) {
        Route::Calculate
    } else {
        Route::GatherMore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::LineOfBusiness;
    use serde_json::json;

    fn state(line: Option<LineOfBusiness>, profile: serde_json::Value) -> ConversationState {
        let mut state = ConversationState {
            line_of_business: line,
            ..Default::default()
        };
        state
            .profile
            .apply_update(profile.as_object().unwrap())
            .unwrap();
        state
    }

    #[test]
    fn knowledge_question_wins_over_complete_profile() {
        let complete = state(
            Some(LineOfBusiness::Auto),
            json!({ "age": 30, "vehicle_year": 2020, "years_licensed": 10 }),
        );
        assert_eq!(
            route(&complete, "What is comprehensive coverage?"),
            Route::SearchKnowledge
        );
        assert_eq!(
            route(&ConversationState::default(), "what is a deductible"),
            Route::SearchKnowledge
        );
        assert_eq!(
            route(&complete, "Explain the difference between collision and comprehensive"),
            Route::SearchKnowledge
        );
    }

    #[test]
    fn minimal_auto_profile_calculates() {
        let complete = state(
            Some(LineOfBusiness::Auto),
            json!({ "age": 30, "vehicle_year": 2020, "years_licensed": 10 }),
        );
        assert_eq!(route(&complete, "sounds good"), Route::Calculate);
    }

    #[test]
    fn home_requires_its_own_trigger_fields() {
        let partial = state(
            Some(LineOfBusiness::Home),
            json!({ "year_built": 1990, "square_footage": 1800 }),
        );
        assert_eq!(route(&partial, "ok"), Route::GatherMore);

        let complete = state(
            Some(LineOfBusiness::Home),
            json!({ "year_built": 1990, "square_footage": 1800, "dwelling_coverage": 250000 }),
        );
        assert_eq!(route(&complete, "ok"), Route::Calculate);
    }

    #[test]
    fn fields_without_line_of_business_keep_gathering() {
        let unset = state(
            None,
            json!({ "age": 30, "vehicle_year": 2020, "years_licensed": 10 }),
        );
        assert_eq!(route(&unset, "hello"), Route::GatherMore);

        let wrong_line = state(
            Some(LineOfBusiness::Home),
            json!({ "age": 30, "vehicle_year": 2020, "years_licensed": 10 }),
        );
        assert_eq!(route(&wrong_line, "hello"), Route::GatherMore);
    }
}
