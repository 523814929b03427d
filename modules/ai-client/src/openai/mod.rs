mod client;
pub(crate) mod types;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{GenerationRequest, MessageRole, TextGenerator};

use client::OpenAiClient;
use types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

// =============================================================================
// OpenAi
// =============================================================================

/// Chat-completions provider. Also speaks to OpenRouter, which exposes the
/// same wire format.
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: String,
    label: &'static str,
    max_tokens: Option<u32>,
    app_name: Option<String>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            label: "openai",
            max_tokens: None,
            app_name: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: OPENROUTER_API_URL.to_string(),
            label: "openrouter",
            ..Self::new(api_key, model)
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    fn client(&self) -> OpenAiClient {
        OpenAiClient::new(&self.api_key, &self.base_url, self.http.clone())
            .with_app_name(self.app_name.as_deref())
    }

    pub(crate) fn build_request(&self, request: &GenerationRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.merged_system() {
            messages.push(WireMessage::new(Role::System, system));
        }
        for msg in &request.messages {
            let role = match msg.role {
                MessageRole::System => continue,
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            };
            messages.push(WireMessage::new(role, &msg.content));
        }

        ChatRequest {
            model: self.model.clone(),
            messages,
            // Reasoning models reject a temperature parameter.
            temperature: if ["gpt-5", "o1", "o3", "o4"]
                .iter()
                .any(|prefix| self.model.starts_with(prefix))
            {
                None
            } else {
                Some(request.temperature)
            },
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAi {
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError> {
        let chat = self.build_request(&request);
        let response = self.client().chat(&chat).await?;
        response.text().ok_or(AiError::EmptyResponse)
    }

    fn name(&self) -> &str {
        self.label
    }
}
