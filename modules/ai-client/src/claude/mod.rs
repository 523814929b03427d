mod client;
pub(crate) mod types;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{GenerationRequest, MessageRole, TextGenerator};

use client::ClaudeClient;
use types::*;

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 1024,
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key, self.http.clone());
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    /// Claude takes the system prompt as a top-level field, so system-role
    /// messages are folded into it and consecutive same-role messages merged.
    pub(crate) fn build_request(&self, request: &GenerationRequest) -> ChatRequest {
        let mut wire: Vec<WireMessage> = Vec::new();
        for msg in &request.messages {
            let role = match msg.role {
                MessageRole::System => continue,
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            };
            match wire.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&msg.content);
                }
                _ => wire.push(match role {
                    Role::User => WireMessage::user(&msg.content),
                    Role::Assistant => WireMessage::assistant(&msg.content),
                }),
            }
        }

        // The messages API requires the first message to come from the user.
        if wire.first().map(|m| m.role) != Some(Role::User) {
            wire.insert(0, WireMessage::user("(The conversation begins.)"));
        }

        let mut chat = ChatRequest::new(&self.model)
            .max_tokens(self.max_tokens)
            .temperature(request.temperature)
            .messages(wire);
        if let Some(system) = request.merged_system() {
            chat = chat.system(system);
        }
        chat
    }
}

#[async_trait]
impl TextGenerator for Claude {
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError> {
        let chat = self.build_request(&request);
        let response = self.client().chat(&chat).await?;
        response.text().ok_or(AiError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "claude"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Message;

    #[test]
    fn test_claude_new() {
        let ai = Claude::new("sk-ant-test", "claude-sonnet-4-20250514");
        assert_eq!(ai.model, "claude-sonnet-4-20250514");
        assert_eq!(ai.api_key, "sk-ant-test");
    }

    #[test]
    fn builders_set_endpoint_and_token_cap() {
        let ai = Claude::new("k", "m")
            .with_base_url("http://localhost:9000/v1")
            .with_max_tokens(300);
        assert_eq!(ai.base_url.as_deref(), Some("http://localhost:9000/v1"));

        let chat = ai.build_request(&GenerationRequest::new(vec![Message::user("Hi")]));
        assert_eq!(chat.max_tokens, 300);
    }

    #[test]
    fn system_messages_fold_into_system_field() {
        let ai = Claude::new("k", "m");
        let request = GenerationRequest::new(vec![
            Message::system("Rules."),
            Message::user("Hi"),
            Message::assistant("Hello"),
        ])
        .system("Persona.")
        .temperature(0.3);

        let chat = ai.build_request(&request);
        assert_eq!(chat.system.as_deref(), Some("Persona.\n\nRules."));
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.temperature, Some(0.3));
    }

    #[test]
    fn consecutive_roles_are_merged_and_user_leads() {
        let ai = Claude::new("k", "m");
        let request = GenerationRequest::new(vec![
            Message::assistant("I spoke first."),
            Message::user("Bram: hello"),
            Message::user("Cato: hi all"),
        ]);

        let chat = ai.build_request(&request);
        assert_eq!(chat.messages.len(), 3);
        assert_eq!(chat.messages[0].role, Role::User);
        assert_eq!(chat.messages[1].role, Role::Assistant);
        assert_eq!(chat.messages[2].content, "Bram: hello\n\nCato: hi all");
    }

    #[test]
    fn response_text_skips_non_text_blocks() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"Good day."}],"stop_reason":"end_turn"}"#,
        )
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("Good day."));

        let blank: ChatResponse =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"  "}],"stop_reason":null}"#)
                .unwrap();
        assert_eq!(blank.text(), None);
    }
}
