//! FlowRunner – loads a session, executes exactly **one** pass through the graph and persists the
//! updated session back to storage, all while holding that session's lock.
//!
//! Interactive services run one pass per HTTP request: the caller hands in a `prepare` closure that
//! writes the request's input into the session, the runner executes from the session's current
//! task, and the session is saved before the lock is released. Two requests for the same session
//! id therefore never interleave, while different sessions run fully in parallel.
//!
//! ```rust,ignore
//! let (result, session) = runner
//!     .run_turn(&session_id, |session| session.context.set_sync("user_input", message))
//!     .await?;
//! ```

use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    context::Context,
    error::{GraphError, Result},
    graph::{ExecutionResult, ExecutionStatus, Graph},
    storage::{Session, SessionLocks, SessionStorage},
};

/// High-level helper that orchestrates the _lock → load → execute → save_ pattern.
#[derive(Clone)]
pub struct FlowRunner {
    graph: Arc<Graph>,
    storage: Arc<dyn SessionStorage>,
    locks: SessionLocks,
    max_chat_messages: Option<usize>,
    restart_on_completion: bool,
}

impl FlowRunner {
    pub fn new(graph: Arc<Graph>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            graph,
            storage,
            locks: SessionLocks::new(),
            max_chat_messages: None,
            restart_on_completion: false,
        }
    }

    /// Bound the chat history of sessions created by this runner
    pub fn with_max_chat_messages(mut self, max: usize) -> Self {
        self.max_chat_messages = Some(max);
        self
    }

    /// Point completed sessions back at the graph's start task so the next
    /// input begins a fresh pass
    pub fn restart_on_completion(mut self) -> Self {
        self.restart_on_completion = true;
        self
    }

    pub fn storage(&self) -> Arc<dyn SessionStorage> {
        self.storage.clone()
    }

    fn start_task_id(&self) -> Result<String> {
        self.graph
            .start_task_id()
            .ok_or_else(|| GraphError::TaskNotFound(format!("start task of {}", self.graph.id)))
    }

    fn new_session(&self, session_id: &str, start_task_id: &str) -> Session {
        let context = match self.max_chat_messages {
            Some(max) => Context::with_max_chat_messages(max),
            None => Context::new(),
        };
        let mut session = Session::new_from_task(session_id, start_task_id).with_context(context);
        session.graph_id = self.graph.id.clone();
        session
    }

    /// Execute one pass for `session_id`, creating the session when it does not exist yet.
    ///
    /// Returns the execution result together with the session as it was persisted.
    pub async fn run_turn<F>(&self, session_id: &str, prepare: F) -> Result<(ExecutionResult, Session)>
    where
        F: FnOnce(&mut Session) + Send,
    {
        let _guard = self.locks.acquire(session_id).await;
        let start_task_id = self.start_task_id()?;

        let mut session = match self.storage.get(session_id).await? {
            Some(session) => session,
            None => {
                info!(session_id = %session_id, "Creating new session");
                self.new_session(session_id, &start_task_id)
            }
        };

        prepare(&mut session);

        let result = self.graph.execute_session(&mut session).await?;

        if self.restart_on_completion && result.status == ExecutionStatus::Completed {
            debug!(session_id = %session_id, "Pass completed, rewinding to start task");
            session.current_task_id = start_task_id;
        }

        self.storage.save(session.clone()).await?;
        Ok((result, session))
    }

    /// Delete a session; the next turn with the same id starts from scratch
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        {
            let _guard = self.locks.acquire(session_id).await;
            self.storage.delete(session_id).await?;
        }
        self.locks.forget(session_id);
        info!(session_id = %session_id, "Session reset");
        Ok(())
    }

    /// Read a session under its lock so the snapshot never observes a half-finished pass
    pub async fn snapshot(&self, session_id: &str) -> Result<Option<Session>> {
        let session = {
            let _guard = self.locks.acquire(session_id).await;
            self.storage.get(session_id).await?
        };
        if session.is_none() {
            self.locks.forget(session_id);
        }
        Ok(session)
    }
}
