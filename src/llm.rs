use crate::config::LlmConfig;
use crate::error::AnswerError;
use crate::session::ApiKey;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant for analyzing web content.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Produces an answer to a question about a page's content.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        content: &str,
        credentials: &ApiKey,
    ) -> std::result::Result<String, AnswerError>;
}

/// Builds the single user turn sent to the model.
pub fn build_prompt(question: &str, content: &str) -> String {
    format!(
        "I am an AI assistant specialized in analyzing web content.\n\n\
         User question: {}\n\n\
         Website content:\n{}\n\n\
         Please analyze the content and answer the question clearly and concisely.\n\
         If the content is not relevant or does not contain enough information to answer, explain that.",
        question, content
    )
}

pub struct LLMClient {
    client: Client,
    api_base: String,
    model: String,
}

impl LLMClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .with_context(|| format!("Failed to build HTTP client for {}", config.api_base))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            model: config.model.clone(),
        })
    }

    pub async fn chat_completion(
        &self,
        api_key: &ApiKey,
        messages: Vec<ChatMessage>,
    ) -> std::result::Result<String, AnswerError> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let request_body = json!({
            "model": self.model,
            "messages": messages,
        });

        tracing::debug!("Calling LLM API: {} with model: {}", url, self.model);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key.expose()))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AnswerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = match serde_json::from_str::<Value>(&body) {
                Ok(v) => detect_provider_error(&v).unwrap_or(body),
                Err(_) => body,
            };
            return Err(AnswerError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let v: Value = response
            .json()
            .await
            .map_err(|e| AnswerError::Malformed(e.to_string()))?;

        if let Some(text) = first_choice_text(&v) {
            return Ok(text);
        }

        if let Some(err_msg) = detect_provider_error(&v) {
            return Err(AnswerError::Provider(err_msg));
        }

        Err(AnswerError::Malformed(v.to_string()))
    }
}

#[async_trait]
impl Answerer for LLMClient {
    async fn answer(
        &self,
        question: &str,
        content: &str,
        credentials: &ApiKey,
    ) -> std::result::Result<String, AnswerError> {
        let messages = vec![
            ChatMessage::new("system", SYSTEM_INSTRUCTION),
            ChatMessage::new("user", build_prompt(question, content)),
        ];
        self.chat_completion(credentials, messages).await
    }
}

/// Pulls the answer text out of an OpenAI-compatible response, tolerating
/// the shape variations some providers use.
fn first_choice_text(v: &Value) -> Option<String> {
    let choice = v.get("choices").and_then(|c| c.get(0));
    let content = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"));

    match content {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Array(parts)) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.as_str().or_else(|| p.get("text").and_then(Value::as_str)))
                .collect();
            if !joined.is_empty() {
                return Some(joined);
            }
        }
        _ => {}
    }

    if let Some(s) = choice.and_then(|c| c.get("text")).and_then(Value::as_str) {
        return Some(s.to_string());
    }

    v.get("output_text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn detect_provider_error(value: &Value) -> Option<String> {
    let error_val = value.get("error")?;
    match error_val {
        Value::Object(obj) => {
            let message = ["message", "msg", "detail"]
                .iter()
                .filter_map(|key| obj.get(*key))
                .filter_map(Value::as_str)
                .map(str::trim)
                .find(|s| !s.is_empty());
            let code = ["code", "type"]
                .iter()
                .filter_map(|key| obj.get(*key))
                .filter_map(|c| match c {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .find(|s| !s.is_empty());
            Some(match (code, message) {
                (Some(code), Some(msg)) => format!("{}: {}", code, msg),
                (None, Some(msg)) => msg.to_string(),
                _ => error_val.to_string(),
            })
        }
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
