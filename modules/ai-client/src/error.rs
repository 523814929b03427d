use reqwest::StatusCode;
use thiserror::Error;

use crate::util::truncate_to_char_boundary;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider overloaded ({status}): {body}")]
    Overloaded { status: u16, body: String },

    #[error("Authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("Invalid request ({status}): {body}")]
    InvalidRequest { status: u16, body: String },

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider returned no text")]
    EmptyResponse,
}

impl AiError {
    /// Map a non-success HTTP status and its body to an error variant.
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        let body = truncate_to_char_boundary(&body, MAX_ERROR_BODY).to_string();
        let code = status.as_u16();
        match code {
            401 | 403 => AiError::Auth { status: code, body },
            400 | 404 | 413 | 422 => AiError::InvalidRequest { status: code, body },
            408 => AiError::Timeout(body),
            429 => AiError::RateLimited(body),
            // Includes Anthropic's 529 "overloaded".
            500..=599 => AiError::Overloaded { status: code, body },
            _ => AiError::Api { status: code, body },
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Network trouble, timeouts, throttling, overload and garbled or empty
    /// responses are transient. Credentials, malformed requests and local
    /// configuration are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_)
            | AiError::Timeout(_)
            | AiError::RateLimited(_)
            | AiError::Overloaded { .. }
            | AiError::Parse(_)
            | AiError::EmptyResponse => true,
            AiError::Api { status, .. } => *status >= 500,
            AiError::Config(_) | AiError::Auth { .. } | AiError::InvalidRequest { .. } => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AiError::Timeout(e.to_string())
        } else if e.is_decode() {
            AiError::Parse(e.to_string())
        } else if e.is_builder() {
            AiError::Config(e.to_string())
        } else {
            AiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for AiError {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        AiError::Config(format!("invalid header value: {e}"))
    }
}
