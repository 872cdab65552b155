//! Conversational insurance quoting: a rule-based rating engine for auto and
//! home policies driven by a task graph that gathers the customer's details,
//! answers questions from a small knowledge base and explains the quote.

pub mod collaborators;
pub mod config;
pub mod profile;
pub mod rating;
pub mod routing;
pub mod service;
pub mod state;
pub mod tasks;
pub mod workflow;

pub use config::ServiceConfig;
pub use profile::{LineOfBusiness, Profile, ProfileError};
pub use rating::{Quote, RatingError, rate_auto, rate_home};
pub use routing::{Route, route};
pub use state::{ConversationState, StateSummary};
