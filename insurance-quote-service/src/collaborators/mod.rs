//! External collaborators the orchestrator calls into: a language model, a
//! knowledge retriever and a document extractor.
//!
//! `Collaborators` bounds every call with a timeout and turns failures into
//! values so a slow or broken provider never takes a session down with it.

pub mod documents;
pub mod knowledge;
pub mod llm;

pub use documents::{
    DocumentExtractor, ExtractedPolicy, ExtractionOutcome, OpenRouterVisionExtractor,
};
pub use knowledge::{
    CONTEXT_PASSAGES, EmbeddingKnowledgeBase, KnowledgeRetriever, Passage, PassageMetadata,
    format_context, insurance_documents,
};
pub use llm::{ChatMessage, LanguageModel, ModelReply, OfflineModel, OpenRouterModel, ToolSpec};

use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::warn;

use crate::profile::LineOfBusiness;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub model: Duration,
    pub retrieval: Duration,
    pub extraction: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            model: Duration::from_secs(30),
            retrieval: Duration::from_secs(5),
            extraction: Duration::from_secs(60),
        }
    }
}

async fn bounded<T, F>(what: &str, limit: Duration, call: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("{what} timed out after {}s", limit.as_secs_f32())),
    }
}

/// Shared handle on every external collaborator
#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn LanguageModel>,
    pub retriever: Arc<dyn KnowledgeRetriever>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub timeouts: Timeouts,
}

impl Collaborators {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn KnowledgeRetriever>,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Self {
        Self {
            model,
            retriever,
            extractor,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Text completion; errors are logged by the caller's degraded path
    pub async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        bounded("language model", self.timeouts.model, self.model.invoke(messages)).await
    }

    pub async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> anyhow::Result<ModelReply> {
        bounded(
            "language model",
            self.timeouts.model,
            self.model.invoke_with_tools(messages, tools),
        )
        .await
    }

    /// Formatted knowledge context, or `None` when nothing relevant was found or the
    /// retriever failed
    pub async fn knowledge_context(
        &self,
        query: &str,
        filter: Option<LineOfBusiness>,
    ) -> Option<String> {
        let search = self.retriever.search(query, CONTEXT_PASSAGES, filter);
        match bounded("knowledge retrieval", self.timeouts.retrieval, search).await {
            Ok(passages) if passages.is_empty() => None,
            Ok(passages) => Some(format_context(&passages)),
            Err(e) => {
                warn!(error = %e, "Knowledge retrieval failed, continuing without context");
                None
            }
        }
    }

    pub async fn extract_document(&self, bytes: &[u8], media_type: &str) -> ExtractionOutcome {
        match timeout(
            self.timeouts.extraction,
            self.extractor.extract(bytes, media_type),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(media_type, "Document extraction timed out");
                ExtractionOutcome::failed(
                    "Timed out",
                    "Document analysis took too long. Please try again with a smaller file.",
                )
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted collaborators for orchestrator and router tests

    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued replies; an exhausted script fails like an unavailable provider
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<anyhow::Result<ModelReply>>>,
        pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<anyhow::Result<ModelReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::default(),
            }
        }

        pub fn text(replies: &[&str]) -> Self {
            Self::new(
                replies
                    .iter()
                    .map(|r| Ok(ModelReply::Text(r.to_string())))
                    .collect(),
            )
        }

        fn next(&self, messages: &[ChatMessage]) -> anyhow::Result<ModelReply> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
            match self.next(messages)? {
                ModelReply::Text(text) => Ok(text),
                ModelReply::ToolCall { name, .. } => Ok(format!("(tool {name})")),
            }
        }

        async fn invoke_with_tools(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> anyhow::Result<ModelReply> {
            self.next(messages)
        }
    }

    /// The reference documents in their shipped order, filtered but not ranked
    pub struct StaticKnowledgeBase {
        passages: Vec<Passage>,
    }

    impl StaticKnowledgeBase {
        pub fn insurance() -> Self {
            Self {
                passages: insurance_documents(),
            }
        }
    }

    #[async_trait]
    impl KnowledgeRetriever for StaticKnowledgeBase {
        async fn search(
            &self,
            _query: &str,
            k: usize,
            filter: Option<LineOfBusiness>,
        ) -> anyhow::Result<Vec<Passage>> {
            Ok(self
                .passages
                .iter()
                .filter(|p| p.matches(filter))
                .take(k)
                .cloned()
                .collect())
        }

        fn len(&self) -> usize {
            self.passages.len()
        }
    }

    pub struct FailingRetriever;

    #[async_trait]
    impl KnowledgeRetriever for FailingRetriever {
        async fn search(
            &self,
            _query: &str,
            _k: usize,
            _filter: Option<LineOfBusiness>,
        ) -> anyhow::Result<Vec<Passage>> {
            Err(anyhow::anyhow!("vector store offline"))
        }

        fn len(&self) -> usize {
            0
        }
    }

    pub struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _messages: &[ChatMessage]) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".into())
        }

        async fn invoke_with_tools(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> anyhow::Result<ModelReply> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ModelReply::Text("too late".into()))
        }
    }

    pub fn collaborators(model: Arc<dyn LanguageModel>) -> Collaborators {
        Collaborators::new(
            model,
            Arc::new(StaticKnowledgeBase::insurance()),
            Arc::new(OpenRouterVisionExtractor::new(None, "vision")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn slow_model_is_cut_off() {
        let collaborators = collaborators(Arc::new(SlowModel)).with_timeouts(Timeouts {
            model: Duration::from_millis(20),
            ..Timeouts::default()
        });
        let err = collaborators
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn retrieval_failure_means_no_context() {
        let mut collaborators = collaborators(Arc::new(OfflineModel));
        collaborators.retriever = Arc::new(FailingRetriever);
        assert!(
            collaborators
                .knowledge_context("what is collision", None)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn knowledge_context_is_formatted() {
        let collaborators = collaborators(Arc::new(OfflineModel));
        let context = collaborators
            .knowledge_context("what is comprehensive coverage", Some(LineOfBusiness::Auto))
            .await
            .unwrap();
        assert!(context.starts_with("**Reference 1:**\nAuto Insurance Coverage Types"));
    }
}
