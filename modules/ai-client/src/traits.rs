use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AiError;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// =============================================================================
// Generation Request
// =============================================================================

/// A single text-generation call: optional system prompt, a message history
/// ending with the turn the model should answer, and a sampling temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system: None,
            messages,
            temperature: 0.7,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// System text merged from `system` and any system-role messages.
    pub fn merged_system(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .system
            .as_deref()
            .into_iter()
            .chain(
                self.messages
                    .iter()
                    .filter(|m| m.role == MessageRole::System)
                    .map(|m| m.content.as_str()),
            )
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

// =============================================================================
// TextGenerator Trait
// =============================================================================

/// The narrow capability the simulation consumes: prompt in, text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError>;

    /// Provider label for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<G: TextGenerator + ?Sized> TextGenerator for Arc<G> {
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError> {
        (**self).generate(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_system_joins_all_sources() {
        let request = GenerationRequest::new(vec![
            Message::system("Stay in character."),
            Message::user("Hello"),
        ])
        .system("You are Mira.");

        assert_eq!(
            request.merged_system().as_deref(),
            Some("You are Mira.\n\nStay in character.")
        );
    }

    #[test]
    fn merged_system_is_none_without_system_text() {
        let request = GenerationRequest::new(vec![Message::user("Hello")]);
        assert_eq!(request.merged_system(), None);
    }
}
