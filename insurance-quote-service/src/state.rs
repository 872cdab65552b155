use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::{
    profile::{LineOfBusiness, Profile},
    rating::Quote,
    routing::Route,
};

/// Per-session conversation record kept in the session context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub line_of_business: Option<LineOfBusiness>,
    #[serde(default)]
    pub quote: Option<Quote>,
    #[serde(default)]
    pub knowledge_context: Option<String>,
    #[serde(default)]
    pub route: Route,
}

impl ConversationState {
    /// Pick up a coarse line-of-business signal from the raw message.
    /// An explicit mention switches the line; silence keeps the current one.
    pub fn observe_message(&mut self, message: &str) -> Option<LineOfBusiness> {
        let detected = detect_line_of_business(message)?;
        self.line_of_business = Some(detected);
        Some(detected)
    }

    /// Store a new quote, replacing any previous one
    pub fn record_quote(&mut self, quote: Quote) {
        self.line_of_business = Some(quote.line_of_business());
        self.quote = Some(quote);
    }

    /// Whether the stored quote was rated for the active line of business
    pub fn has_current_quote(&self) -> bool {
        self.quote
            .as_ref()
            .is_some_and(|quote| Some(quote.line_of_business()) == self.line_of_business)
    }

    pub fn summary(&self, message_count: usize) -> StateSummary {
        StateSummary {
            insurance_type: self.line_of_business,
            has_quote: self.quote.is_some(),
            message_count,
            route: self.route,
            profile: self.profile.clone(),
            quote: self.quote.clone(),
        }
    }
}

/// State returned with every chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    pub insurance_type: Option<LineOfBusiness>,
    pub has_quote: bool,
    pub message_count: usize,
    pub route: Route,
    pub profile: Profile,
    pub quote: Option<Quote>,
}

static AUTO_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(auto|autos|car|cars|vehicle|vehicles)\b").expect("valid auto regex")
});
static HOME_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(home|homes|house|houses|property|properties)\b").expect("valid home regex")
});

/// Auto keywords take precedence when a message mentions both lines
pub fn detect_line_of_business(message: &str) -> Option<LineOfBusiness> {
    if AUTO_WORDS.is_match(message) {
        Some(LineOfBusiness::Auto)
    } else if HOME_WORDS.is_match(message) {
        Some(LineOfBusiness::Home)
    } else {
        None
    }
}
