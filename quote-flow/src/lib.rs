pub mod context;
pub mod error;
pub mod graph;
pub mod runner;
pub mod storage;
pub mod storage_postgres;
pub mod task;

// Re-export commonly used types
pub use context::{ChatHistory, Context, MessageRole, SerializableMessage};
pub use error::{GraphError, Result};
pub use graph::{ExecutionResult, ExecutionStatus, Graph, GraphBuilder};
pub use runner::FlowRunner;
pub use storage::{InMemorySessionStorage, Session, SessionLocks, SessionStorage};
pub use storage_postgres::PostgresSessionStorage;
pub use task::{NextAction, Task, TaskResult};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoTask;

    #[async_trait]
    impl Task for EchoTask {
        async fn run(&self, context: Context) -> Result<TaskResult> {
            let input: String = context.get("input").await.unwrap_or_default();
            context.add_user_message(input.clone()).await;
            context.set("echo", format!("Processed: {}", input)).await;

            let flagged = input.contains("flag");
            context.set("flagged", flagged).await;

            Ok(TaskResult::new(None, NextAction::ContinueAndExecute))
        }
    }

    struct FlaggedTask;

    #[async_trait]
    impl Task for FlaggedTask {
        async fn run(&self, _context: Context) -> Result<TaskResult> {
            Ok(TaskResult::new(Some("flagged".to_string()), NextAction::End))
        }
    }

    struct PlainTask;

    #[async_trait]
    impl Task for PlainTask {
        async fn run(&self, _context: Context) -> Result<TaskResult> {
            Ok(TaskResult::new(
                Some("plain".to_string()),
                NextAction::WaitForInput,
            ))
        }
    }

    fn build_graph() -> Graph {
        let echo: Arc<dyn Task> = Arc::new(EchoTask);
        let flagged: Arc<dyn Task> = Arc::new(FlaggedTask);
        let plain: Arc<dyn Task> = Arc::new(PlainTask);
        let (echo_id, flagged_id, plain_id) = (
            echo.id().to_string(),
            flagged.id().to_string(),
            plain.id().to_string(),
        );

        GraphBuilder::new("test_graph")
            .add_task(echo)
            .add_task(flagged)
            .add_task(plain)
            .add_conditional_edge(
                echo_id,
                |ctx| ctx.get_sync::<bool>("flagged").unwrap_or(false),
                flagged_id,
                plain_id,
            )
            .build()
    }

    #[tokio::test]
    async fn conditional_edge_picks_branch() {
        let graph = build_graph();
        let start = graph.start_task_id().unwrap();

        let mut session = Session::new_from_task("s1", &start);
        session.context.set("input", "please flag this").await;
        let result = graph.execute_session(&mut session).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.response.as_deref(), Some("flagged"));
        assert_eq!(session.current_task_id, std::any::type_name::<FlaggedTask>());

        let mut session = Session::new_from_task("s2", &start);
        session.context.set("input", "hello").await;
        let result = graph.execute_session(&mut session).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::WaitingForInput);
        assert_eq!(result.response.as_deref(), Some("plain"));
        let echo: String = session.context.get("echo").await.unwrap();
        assert_eq!(echo, "Processed: hello");
    }

    #[tokio::test]
    async fn runner_creates_rewinds_and_resets_sessions() {
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(Arc::new(build_graph()), storage.clone())
            .with_max_chat_messages(10)
            .restart_on_completion();

        let (result, session) = runner
            .run_turn("s1", |session| session.context.set_sync("input", "flag me"))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(session.current_task_id, std::any::type_name::<EchoTask>());
        assert_eq!(session.context.chat_history_len(), 1);

        let (_, session) = runner
            .run_turn("s1", |session| session.context.set_sync("input", "again"))
            .await
            .unwrap();
        assert_eq!(session.context.chat_history_len(), 2);

        runner.reset("s1").await.unwrap();
        assert!(storage.get("s1").await.unwrap().is_none());

        let (_, session) = runner
            .run_turn("s1", |session| session.context.set_sync("input", "fresh"))
            .await
            .unwrap();
        assert_eq!(session.context.chat_history_len(), 1);
    }
}
