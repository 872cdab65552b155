// Quote conversation tasks
pub mod calculate_quote;
pub mod explain_results;
pub mod gather_info;
pub mod search_knowledge;

// Shared modules
pub mod prompts;
pub mod types;

pub use calculate_quote::CalculateQuoteTask;
pub use explain_results::ExplainResultsTask;
pub use gather_info::GatherInfoTask;
pub use search_knowledge::SearchKnowledgeTask;

pub use types::{session_keys, task_ids};
