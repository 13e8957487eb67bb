use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Text generated by a provider plus what it cost
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    /// Model id reported by (or requested from) the provider
    pub model: String,
    pub tokens: Option<u32>,
}

/// The external AI provider. The cache core never calls this; the gateway
/// does, on a cache miss.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, prompt: &str, history: &[Message]) -> Result<Generation, ProviderError>;
    fn name(&self) -> &str;
}

/// Build the configured provider, resolving its API key from the environment
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .ok_or_else(|| {
            ProviderError::MissingApiKey(config.api_key_env.clone().unwrap_or_default())
        })?;

    match config.kind.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            api_key,
            config.model.clone(),
            config.max_tokens,
            config.system_prompt.clone(),
        ))),
        "openai" | "openai_compatible" => Ok(Arc::new(OpenAIProvider::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.system_prompt.clone(),
        ))),
        other => Err(ProviderError::Malformed(format!("unknown provider kind: {}", other))),
    }
}

fn conversation(system_prompt: &str, history: &[Message], prompt: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system_prompt.is_empty() {
        messages.push(Message::system(system_prompt));
    }
    messages.extend(history.iter().cloned());
    messages.push(Message::user(prompt));
    messages
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

// ============================================================================
// ANTHROPIC PROVIDER
// ============================================================================

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    system_prompt: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32, system_prompt: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            max_tokens,
            system_prompt,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn generate(&self, prompt: &str, history: &[Message]) -> Result<Generation, ProviderError> {
        let messages = conversation("", history, prompt);
        let chat_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": self.system_prompt,
            "messages": chat_messages
        });

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let json = read_json(response).await?;

        let content: String = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect()
            })
            .ok_or_else(|| ProviderError::Malformed("missing content blocks".to_string()))?;

        let usage = &json["usage"];
        let tokens = match (usage["input_tokens"].as_u64(), usage["output_tokens"].as_u64()) {
            (Some(input), Some(output)) => Some((input + output) as u32),
            _ => None,
        };

        Ok(Generation {
            content,
            model: json["model"].as_str().unwrap_or(&self.model).to_string(),
            tokens,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ============================================================================
// OPENAI PROVIDER (also any OpenAI-compatible endpoint)
// ============================================================================

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: String,
}

impl OpenAIProvider {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        system_prompt: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            system_prompt,
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn generate(&self, prompt: &str, history: &[Message]) -> Result<Generation, ProviderError> {
        let chat_messages: Vec<serde_json::Value> =
            conversation(&self.system_prompt, history, prompt)
                .iter()
                .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
                .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let json = read_json(response).await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("missing choices[0].message.content".to_string()))?
            .to_string();

        Ok(Generation {
            content,
            model: json["model"].as_str().unwrap_or(&self.model).to_string(),
            tokens: json["usage"]["total_tokens"].as_u64().map(|t| t as u32),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_order() {
        let history = vec![Message::user("oi"), Message::assistant("olá")];
        let messages = conversation("Você é farmacêutico.", &history, "dose de magnésio?");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(messages.last().unwrap().content, "dose de magnésio?");
    }

    #[test]
    fn test_conversation_without_system() {
        let messages = conversation("", &[], "oi");
        assert_eq!(messages, vec![Message::user("oi")]);
    }

    #[test]
    fn test_build_provider_requires_key() {
        let config = ProviderConfig {
            api_key_env: Some("RXCACHE_TEST_KEY_THAT_IS_NOT_SET".to_string()),
            ..ProviderConfig::default()
        };
        assert!(matches!(
            build_provider(&config),
            Err(ProviderError::MissingApiKey(_))
        ));
    }
}
