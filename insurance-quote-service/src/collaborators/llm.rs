use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use quote_flow::{MessageRole, SerializableMessage};
use reqwest::Client;
use rig::{
    client::CompletionClient,
    completion::{Chat, Message},
    providers::openrouter,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Role-tagged message handed to the language model
pub type ChatMessage = SerializableMessage;

/// Function the model may call instead of replying with text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    ToolCall { name: String, arguments: Value },
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Identifier reported by the health endpoint
    fn name(&self) -> &str;

    async fn invoke(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;

    async fn invoke_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> anyhow::Result<ModelReply>;
}

pub fn to_rig_message(msg: &ChatMessage) -> Message {
    match msg.role {
        MessageRole::User => Message::user(msg.content.clone()),
        MessageRole::Assistant => Message::assistant(msg.content.clone()),
        // rig has no system turn inside a history
        MessageRole::System => Message::user(format!("[SYSTEM] {}", msg.content)),
    }
}

pub fn to_rig_messages(messages: &[ChatMessage]) -> Vec<Message> {
    messages.iter().map(to_rig_message).collect()
}

/// Language model served through OpenRouter
pub struct OpenRouterModel {
    api_key: String,
    model: String,
    client: openrouter::Client,
    http: Client,
}

impl OpenRouterModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            client: openrouter::Client::new(&api_key),
            api_key,
            model: model.into(),
            http: Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let preamble = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut history: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .cloned()
            .collect();

        let prompt = match history.pop() {
            Some(last) if last.role == MessageRole::User => last.content,
            Some(last) => {
                history.push(last);
                "Please continue.".to_string()
            }
            None => return Err(anyhow!("no user message to respond to")),
        };

        let agent = self.client.agent(&self.model).preamble(&preamble).build();
        let reply = agent
            .chat(prompt, to_rig_messages(&history))
            .await
            .map_err(|e| anyhow!("language model call failed: {e}"))?;

        Ok(reply)
    }

    async fn invoke_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> anyhow::Result<ModelReply> {
        let payload = json!({
            "model": self.model,
            "messages": messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content }))
                .collect::<Vec<_>>(),
            "tools": tools
                .iter()
                .map(|tool| json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                }))
                .collect::<Vec<_>>(),
            "tool_choice": "auto",
        });

        let response = self
            .http
            .post(OPENROUTER_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("LLM API request failed: {}", response.status()));
        }

        let body: Value = response.json().await?;
        parse_completion(&body)
    }
}

/// Interpret an OpenAI-style chat completion body
pub fn parse_completion(body: &Value) -> anyhow::Result<ModelReply> {
    let message = &body["choices"][0]["message"];
    if message.is_null() {
        return Err(anyhow!("Invalid response format from LLM"));
    }

    if let Some(call) = message["tool_calls"].as_array().and_then(|calls| calls.first()) {
        let name = call["function"]["name"]
            .as_str()
            .ok_or_else(|| anyhow!("tool call without a function name"))?
            .to_string();
        let arguments = match &call["function"]["arguments"] {
            Value::String(raw) if raw.trim().is_empty() => json!({}),
            Value::String(raw) => serde_json::from_str(raw)
                .with_context(|| format!("malformed arguments for tool call {name}"))?,
            Value::Object(_) => call["function"]["arguments"].clone(),
            _ => json!({}),
        };
        debug!(tool = %name, "Model requested a tool call");
        return Ok(ModelReply::ToolCall { name, arguments });
    }

    message["content"]
        .as_str()
        .map(|content| ModelReply::Text(content.to_string()))
        .ok_or_else(|| anyhow!("Invalid response format from LLM"))
}

/// Stand-in used when no API key is configured; every call fails so callers degrade
#[derive(Debug, Default)]
pub struct OfflineModel;

#[async_trait]
impl LanguageModel for OfflineModel {
    fn name(&self) -> &str {
        "offline"
    }

    async fn invoke(&self, _messages: &[ChatMessage]) -> anyhow::Result<String> {
        Err(anyhow!("no language model configured"))
    }

    async fn invoke_with_tools(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<ModelReply> {
        Err(anyhow!("no language model configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_completion() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hi there" } }]
        });
        assert_eq!(
            parse_completion(&body).unwrap(),
            ModelReply::Text("Hi there".into())
        );
    }

    #[test]
    fn parses_tool_call_with_string_arguments() {
        let body = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "calculate_auto_premium",
                        "arguments": "{\"age\": 30, \"vehicle_year\": 2020}"
                    }
                }]
            }}]
        });
        match parse_completion(&body).unwrap() {
            ModelReply::ToolCall { name, arguments } => {
                assert_eq!(name, "calculate_auto_premium");
                assert_eq!(arguments["age"], 30);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(parse_completion(&json!({ "error": "quota" })).is_err());
        let bad_args = json!({
            "choices": [{ "message": { "tool_calls": [{
                "function": { "name": "calculate_home_premium", "arguments": "{not json" }
            }]}}]
        });
        assert!(parse_completion(&bad_args).is_err());
    }

    #[test]
    fn system_messages_are_prefixed_for_rig() {
        let messages = to_rig_messages(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
        ]);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            serde_json::to_value(&messages[0]).unwrap(),
            serde_json::to_value(Message::user("[SYSTEM] be brief")).unwrap()
        );
    }

    #[tokio::test]
    async fn offline_model_always_fails() {
        let model = OfflineModel;
        assert!(model.invoke(&[ChatMessage::user("hi")]).await.is_err());
        assert!(model.invoke_with_tools(&[], &[]).await.is_err());
    }
}
