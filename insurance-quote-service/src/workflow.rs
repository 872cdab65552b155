//! Assembles the quote conversation graph.
//!
//! ```text
//! gather_info ──(route == calculate)──▶ calculate_quote ──▶ explain_results (end)
//!      ▲   └────────(otherwise)───────▶ search_knowledge
//!      └───────────────────────────────────────┘
//! ```

use quote_flow::{Context, FlowRunner, Graph, GraphBuilder, SessionStorage, Task};
use std::sync::Arc;

use crate::{
    collaborators::Collaborators,
    routing::Route,
    tasks::{
        CalculateQuoteTask, ExplainResultsTask, GatherInfoTask, SearchKnowledgeTask, task_ids,
        types::load_state_sync,
    },
};

pub const GRAPH_ID: &str = "insurance_quote";

pub fn build_graph(collaborators: Collaborators) -> Graph {
    let gather_info: Arc<dyn Task> = Arc::new(GatherInfoTask::new(collaborators.clone()));
    let search_knowledge: Arc<dyn Task> =
        Arc::new(SearchKnowledgeTask::new(collaborators.clone()));
    let calculate_quote: Arc<dyn Task> = Arc::new(CalculateQuoteTask);
    let explain_results: Arc<dyn Task> = Arc::new(ExplainResultsTask::new(collaborators));

    GraphBuilder::new(GRAPH_ID)
        .add_task(gather_info)
        .add_task(search_knowledge)
        .add_task(calculate_quote)
        .add_task(explain_results)
        .add_conditional_edge(
            task_ids::GATHER_INFO,
            |context: &Context| load_state_sync(context).route == Route::Calculate,
            task_ids::CALCULATE_QUOTE,
            task_ids::SEARCH_KNOWLEDGE,
        )
        .add_edge(task_ids::SEARCH_KNOWLEDGE, task_ids::GATHER_INFO)
        .add_edge(task_ids::CALCULATE_QUOTE, task_ids::EXPLAIN_RESULTS)
        .set_start_task(task_ids::GATHER_INFO)
        .build()
}

/// One locked pass per chat turn; completed passes rewind to `gather_info`
pub fn build_runner(
    collaborators: Collaborators,
    storage: Arc<dyn SessionStorage>,
    max_chat_messages: usize,
) -> FlowRunner {
    FlowRunner::new(Arc::new(build_graph(collaborators)), storage)
        .with_max_chat_messages(max_chat_messages)
        .restart_on_completion()
}
