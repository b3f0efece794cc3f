use crate::config::LlmConfig;
use crate::error::{Nl2SqlError, Result};
use crate::llm::gateway::{Completion, LlmGateway, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
}

/// the reply side of a choice; refusals and tool calls carry a null content
#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

fn parse_chat_response(body: &str) -> Result<Completion> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Nl2SqlError::Llm(format!("failed to parse completion response: {}", e)))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Nl2SqlError::Llm("model returned no choices".to_string()))?;
    let text = choice
        .message
        .content
        .ok_or_else(|| Nl2SqlError::Llm("model returned no content".to_string()))?;

    Ok(Completion {
        text: text.trim().to_string(),
        usage: response.usage,
    })
}

/// client for any openai-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct OpenAiGateway {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
    system_prompt: Option<String>,
}

impl OpenAiGateway {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Nl2SqlError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        tracing::info!("llm gateway ready: {} at {}", config.model, config.base_url);

        Ok(Self {
            client,
            config,
            api_key,
            system_prompt: None,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn messages(&self, prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.as_str()));
        }
        messages.push(Message::user(prompt));
        messages
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    #[tracing::instrument(skip(self, prompt), fields(llm.model = %self.config.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: self.messages(prompt),
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Nl2SqlError::Llm(format!(
                "completion request failed with {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        let completion = parse_chat_response(&body)?;
        tracing::debug!("generated {} chars", completion.text.len());
        Ok(completion)
    }
}
