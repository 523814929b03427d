//! Typed errors for configuration, generation and whole runs.

use ai_client::AiError;
use thiserror::Error;

/// Invalid world config or settings. Always surfaced before any day runs.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid world config: {0}")]
    Invalid(String),

    #[error("invalid setting {key}: {reason}")]
    Setting { key: String, reason: String },

    #[error("missing environment variable {0}")]
    MissingEnv(String),
}

/// Outcome of a single generation call as seen by the scheduler.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Network, timeout or provider overload. Retryable.
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Credentials or malformed request. Aborts the run.
    #[error("fatal provider error: {0}")]
    Fatal(String),

    /// The run-scoped cancel token fired while waiting.
    #[error("generation cancelled")]
    Cancelled,
}

impl From<AiError> for GenerationError {
    fn from(e: AiError) -> Self {
        if e.is_transient() {
            GenerationError::Transient(e.to_string())
        } else {
            GenerationError::Fatal(e.to_string())
        }
    }
}

/// Why a run ended early.
#[derive(Debug, Clone, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("fatal provider error on day {day}: {reason}")]
    FatalProvider { day: u32, reason: String },

    #[error("simulation has already been run")]
    AlreadyRun,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_errors_split_by_retryability() {
        let transient: GenerationError = AiError::Timeout("30s".into()).into();
        assert!(matches!(transient, GenerationError::Transient(_)));

        let fatal: GenerationError = AiError::Auth {
            status: 401,
            body: "invalid x-api-key".into(),
        }
        .into();
        assert!(matches!(fatal, GenerationError::Fatal(msg) if msg.contains("invalid x-api-key")));
    }
}
