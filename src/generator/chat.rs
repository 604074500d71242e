use super::{GenerationError, Generator, Prompt};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Generator backed by `POST {base_url}/chat/completions`.
pub struct ChatCompletionsGenerator {
    http_client: Client,
    settings: ChatSettings,
    endpoint: String,
}

impl ChatCompletionsGenerator {
    pub fn new(settings: ChatSettings) -> Result<Self, GenerationError> {
        let http_client = Client::builder()
            .user_agent("nearyou/0.1")
            .timeout(settings.request_timeout)
            .build()?;
        let endpoint = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
        Ok(Self {
            http_client,
            settings,
            endpoint,
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            messages: [ChatMessage {
                role: "user",
                content: &prompt.text,
            }],
        };

        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(GenerationError::Empty)?;

        debug!(poi = %prompt.poi_name, chars = text.len(), "Generated message");
        Ok(text)
    }

    fn name(&self) -> &str {
        "chat"
    }
}
