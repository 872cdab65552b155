use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single chat turn that survives session persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SerializableMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Ordered chat history, optionally bounded to the most recent `max_messages`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatHistory {
    messages: Vec<SerializableMessage>,
    max_messages: Option<usize>,
    /// Messages ever pushed, including those trimmed by the bound
    #[serde(default)]
    total_messages: usize,
}

impl ChatHistory {
    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: Some(max_messages),
            total_messages: 0,
        }
    }

    pub fn push(&mut self, message: SerializableMessage) {
        self.messages.push(message);
        self.total_messages += 1;
        if let Some(max) = self.max_messages {
            if self.messages.len() > max {
                let overflow = self.messages.len() - max;
                self.messages.drain(..overflow);
            }
        }
    }

    pub fn messages(&self) -> &[SerializableMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_messages(&self) -> usize {
        self.total_messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_messages = 0;
    }
}

/// Context for sharing data between tasks in a graph execution.
///
/// Cloning is cheap and every clone observes the same underlying state, so a
/// task can mutate the session it was handed without returning anything.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    chat_history: Arc<Mutex<ChatHistory>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            chat_history: Arc::new(Mutex::new(ChatHistory::default())),
        }
    }

    /// Create a context whose chat history keeps at most `max` messages
    pub fn with_max_chat_messages(max: usize) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            chat_history: Arc::new(Mutex::new(ChatHistory::with_max_messages(max))),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) {
        self.set_sync(key, value);
    }

    pub fn set_sync(&self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.data.insert(key, value);
            }
            Err(e) => error!(key = %key, error = %e, "Failed to serialize context value"),
        }
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    /// Drop all keys and the chat history
    pub async fn clear(&self) {
        self.data.clear();
        self.history().clear();
    }

    fn history(&self) -> std::sync::MutexGuard<'_, ChatHistory> {
        self.chat_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn add_user_message(&self, content: impl Into<String>) {
        self.history().push(SerializableMessage::user(content));
    }

    pub async fn add_assistant_message(&self, content: impl Into<String>) {
        self.history().push(SerializableMessage::assistant(content));
    }

    pub async fn get_all_messages(&self) -> Vec<SerializableMessage> {
        self.history().messages().to_vec()
    }

    pub async fn get_last_messages(&self, n: usize) -> Vec<SerializableMessage> {
        let history = self.history();
        let messages = history.messages();
        messages[messages.len().saturating_sub(n)..].to_vec()
    }

    pub fn chat_history_len(&self) -> usize {
        self.history().len()
    }

    /// Every message added to this context, unaffected by the history bound
    pub fn chat_message_count(&self) -> usize {
        self.history().total_messages()
    }

    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            data: self
                .data
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            chat_history: self.history().clone(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct ContextSnapshot {
    data: HashMap<String, Value>,
    #[serde(default)]
    chat_history: ChatHistory,
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let snapshot = ContextSnapshot::deserialize(deserializer)?;
        Ok(Self {
            data: Arc::new(snapshot.data.into_iter().collect()),
            chat_history: Arc::new(Mutex::new(snapshot.chat_history)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let context = Context::new();
        let clone = context.clone();
        clone.set("line", "auto").await;

        let line: String = context.get("line").await.unwrap();
        assert_eq!(line, "auto");
    }

    #[tokio::test]
    async fn chat_history_is_bounded() {
        let context = Context::with_max_chat_messages(3);
        for i in 0..5 {
            context.add_user_message(format!("message {i}")).await;
        }

        let messages = context.get_all_messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "message 2");
        assert_eq!(context.get_last_messages(1).await[0].content, "message 4");
        assert_eq!(context.chat_message_count(), 5);

        let json = serde_json::to_string(&context).unwrap();
        let restored: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.chat_history_len(), 3);
        assert_eq!(restored.chat_message_count(), 5);
    }

    #[tokio::test]
    async fn survives_json_round_trip() {
        let context = Context::new();
        context.set("age", 30).await;
        context.add_user_message("hi").await;
        context.add_assistant_message("hello").await;

        let json = serde_json::to_string(&context).unwrap();
        let restored: Context = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.get_sync::<i64>("age"), Some(30));
        let messages = restored.get_all_messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn clear_drops_data_and_history() {
        let context = Context::new();
        context.set("age", 30).await;
        context.add_user_message("hi").await;
        context.clear().await;

        assert!(context.get_sync::<i64>("age").is_none());
        assert_eq!(context.chat_history_len(), 0);
    }
}
