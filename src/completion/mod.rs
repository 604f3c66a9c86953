// Chat completion: a fixed system instruction plus one user prompt in, text out


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::OpenAiClient;
use crate::{RagError, Result, http};

pub const SYSTEM_PROMPT: &str = "あなたは英検対策アプリのアシスタントです。";

const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";

/// Prompt that grounds the answer in the retrieved context.
#[inline]
pub fn build_user_prompt(context: &str, query: &str) -> String {
    format!(
        "以下の文脈に基づいて、ユーザーの質問に日本語で簡潔に答えてください。\n\n文脈:\n{context}\n\n質問: {query}"
    )
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiClient {
    /// Blocking chat completion; [`ChatModel::complete`] runs this off the executor.
    #[inline]
    pub fn complete_blocking(&self, system: &str, user: &str) -> Result<String> {
        debug!(
            "Requesting completion from {} (prompt length: {})",
            self.chat_model(),
            user.len()
        );

        let request = ChatRequest {
            model: self.chat_model(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
        };

        let response: ChatResponse = self
            .post(CHAT_COMPLETIONS_PATH, &request, "chat completion")
            .map_err(|e| RagError::CompletionService(format!("{e:#}")))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::CompletionService("response contained no message".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let client = self.clone();
        let system = system.to_string();
        let user = user.to_string();
        http::blocking(move || client.complete_blocking(&system, &user)).await
    }
}
