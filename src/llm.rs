//! Chat completion client for turn responses

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::history::{Message, Role};
use crate::{Error, Result};

/// Fixed system instruction prepended to every turn
pub const SYSTEM_PROMPT: &str = "You are a helpful multilingual assistant. The user is speaking \
     to you. Respond in the same language as the user's last message. Be concise and natural, \
     like in a real conversation.";

/// One message on the chat completions wire
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Assemble the prompt sequence for one turn:
/// system instruction, history snapshot, then the new user message
#[must_use]
pub fn build_prompt(history: &[Message], user_text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: SYSTEM_PROMPT.to_string(),
    });
    for message in history {
        messages.push(ChatMessage {
            role: match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: message.content.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: user_text.to_string(),
    });
    messages
}

/// Generates one assistant reply for a turn
///
/// The gateway depends on this trait so tests can inject a fake.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce the assistant text for the given history and user text
    async fn generate(&self, history: &[Message], user_text: &str) -> Result<String>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

/// Chat completion client for the `OpenAI` API
pub struct ChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ChatModel {
    /// Create a new chat model client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat completions".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Generator for ChatModel {
    async fn generate(&self, history: &[Message], user_text: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages: build_prompt(history, user_text),
        };

        tracing::debug!(model = %self.model, history_len = history.len(), "requesting completion");

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!(
                "completion API error {status}: {body}"
            )));
        }

        let result: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("failed to parse response: {e}")))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Generation("completion returned no choices".to_string()))?;

        tracing::info!(reply_chars = content.len(), "completion received");
        Ok(content)
    }
}
