use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::{
    context::Context,
    error::{GraphError, Result},
    storage::Session,
    task::{NextAction, Task, TaskResult},
};

/// Upper bound on tasks chained through `ContinueAndExecute` in one execution
const MAX_CHAINED_TASKS: usize = 32;

/// Type alias for edge condition functions
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Edge between tasks in the graph
#[derive(Clone)]
pub enum Edge {
    Direct {
        from: String,
        to: String,
    },
    /// Goes to `yes` when the condition holds, otherwise to `no`
    Conditional {
        from: String,
        condition: EdgeCondition,
        yes: String,
        no: String,
    },
}

impl Edge {
    fn from(&self) -> &str {
        match self {
            Edge::Direct { from, .. } | Edge::Conditional { from, .. } => from,
        }
    }
}

/// A graph of tasks that can be executed
pub struct Graph {
    pub id: String,
    tasks: DashMap<String, Arc<dyn Task>>,
    edges: Mutex<Vec<Edge>>,
    start_task_id: Mutex<Option<String>>,
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: DashMap::new(),
            edges: Mutex::new(Vec::new()),
            start_task_id: Mutex::new(None),
        }
    }

    /// Add a task to the graph; the first task added becomes the start task
    pub fn add_task(&self, task: Arc<dyn Task>) -> &Self {
        let task_id = task.id().to_string();
        let is_first = self.tasks.is_empty();
        self.tasks.insert(task_id.clone(), task);

        if is_first {
            *self.start_lock() = Some(task_id);
        }

        self
    }

    pub fn set_start_task(&self, task_id: impl Into<String>) -> &Self {
        let task_id = task_id.into();
        if self.tasks.contains_key(&task_id) {
            *self.start_lock() = Some(task_id);
        } else {
            warn!(task_id = %task_id, "Ignoring unknown start task");
        }
        self
    }

    pub fn add_edge(&self, from: impl Into<String>, to: impl Into<String>) -> &Self {
        self.edges_lock().push(Edge::Direct {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn add_conditional_edge<F>(
        &self,
        from: impl Into<String>,
        condition: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> &Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.edges_lock().push(Edge::Conditional {
            from: from.into(),
            condition: Arc::new(condition),
            yes: yes.into(),
            no: no.into(),
        });
        self
    }

    /// Execute the session's current task, following `ContinueAndExecute`
    /// chains, and leave the session pointing at the task that should handle
    /// the next input.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        for _ in 0..MAX_CHAINED_TASKS {
            let result = self
                .execute_single_task(&session.current_task_id, session.context.clone())
                .await?;
            session.status_message = result.status_message.clone();

            match result.next_action {
                NextAction::ContinueAndExecute => {
                    match self.find_next_task(&result.task_id, &session.context) {
                        Some(next_task_id) => {
                            debug!(from = %result.task_id, to = %next_task_id, "Chaining task");
                            session.current_task_id = next_task_id;
                        }
                        None => {
                            session.current_task_id = result.task_id;
                            return Ok(ExecutionResult::waiting(result.response));
                        }
                    }
                }
                NextAction::WaitForInput => {
                    session.current_task_id = result.task_id;
                    return Ok(ExecutionResult::waiting(result.response));
                }
                NextAction::End => {
                    session.current_task_id = result.task_id;
                    return Ok(ExecutionResult {
                        response: result.response,
                        status: ExecutionStatus::Completed,
                    });
                }
                NextAction::GoTo(target_id) => {
                    if !self.tasks.contains_key(&target_id) {
                        return Err(GraphError::TaskNotFound(target_id));
                    }
                    session.current_task_id = target_id;
                    return Ok(ExecutionResult::waiting(result.response));
                }
            }
        }

        Err(GraphError::TaskExecutionFailed(format!(
            "graph {} chained more than {} tasks in one execution",
            self.id, MAX_CHAINED_TASKS
        )))
    }

    async fn execute_single_task(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        let task = self
            .get_task(task_id)
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;

        let mut result = task.run(context).await?;
        result.task_id = task_id.to_string();

        Ok(result)
    }

    /// Find the next task based on edges and conditions; the first edge
    /// leaving `current_task_id` wins
    pub fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        let edges = self.edges_lock();
        edges
            .iter()
            .find(|edge| edge.from() == current_task_id)
            .map(|edge| match edge {
                Edge::Direct { to, .. } => to.clone(),
                Edge::Conditional {
                    condition, yes, no, ..
                } => {
                    if condition(context) {
                        yes.clone()
                    } else {
                        no.clone()
                    }
                }
            })
    }

    pub fn start_task_id(&self) -> Option<String> {
        self.start_lock().clone()
    }

    pub fn get_task(&self, task_id: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }

    fn edges_lock(&self) -> std::sync::MutexGuard<'_, Vec<Edge>> {
        self.edges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.start_task_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(id),
        }
    }

    pub fn add_task(self, task: Arc<dyn Task>) -> Self {
        self.graph.add_task(task);
        self
    }

    pub fn add_edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.add_edge(from, to);
        self
    }

    pub fn add_conditional_edge<F>(
        self,
        from: impl Into<String>,
        condition: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.graph.add_conditional_edge(from, condition, yes, no);
        self
    }

    pub fn set_start_task(self, task_id: impl Into<String>) -> Self {
        self.graph.set_start_task(task_id);
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// Status of graph execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    fn waiting(response: Option<String>) -> Self {
        Self {
            response,
            status: ExecutionStatus::WaitingForInput,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Waiting for user input to continue
    WaitingForInput,
    /// Workflow completed successfully
    Completed,
}
