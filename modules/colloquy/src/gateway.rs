//! LlmGateway: the only caller of the text-generation capability.
//!
//! Every call waits for a rate-limiter slot, runs under a per-call timeout and
//! races the run's cancel token. Provider failures come back classified as
//! transient or fatal; retrying transient ones is the caller's job, with
//! `RetryPolicy` describing how.

use std::sync::Arc;
use std::time::Duration;

use ai_client::{preview, GenerationRequest, TextGenerator};
use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::GenerationError;
use crate::limiter::RateLimiter;

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub temperature: f32,
    pub rate_limit_rpm: u32,
    pub call_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            rate_limit_rpm: 60,
            call_timeout: Duration::from_secs(60),
        }
    }
}

pub struct LlmGateway {
    generator: Arc<dyn TextGenerator>,
    limiter: Arc<RateLimiter>,
    options: GatewayOptions,
}

impl LlmGateway {
    pub fn new(generator: Arc<dyn TextGenerator>, options: GatewayOptions) -> Self {
        let limiter = Arc::new(RateLimiter::per_minute(options.rate_limit_rpm));
        Self::with_limiter(generator, limiter, options)
    }

    /// Share an existing limiter, e.g. with another gateway on the same API key.
    pub fn with_limiter(
        generator: Arc<dyn TextGenerator>,
        limiter: Arc<RateLimiter>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            generator,
            limiter,
            options,
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// One attempt. Temperature on the request is overridden by the gateway's.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<String, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let permit = tokio::select! {
            permit = self.limiter.acquire() => permit,
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
        };

        let request = request.temperature(self.options.temperature);
        let call = tokio::time::timeout(self.options.call_timeout, self.generator.generate(request));

        let result = tokio::select! {
            result = call => result,
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
        };
        drop(permit);

        match result {
            Ok(Ok(text)) => {
                debug!(provider = self.generator.name(), text = %preview(&text, 80), "Generated");
                Ok(text)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(GenerationError::Transient(format!(
                "{} call timed out after {}s",
                self.generator.name(),
                self.options.call_timeout.as_secs()
            ))),
        }
    }
}

/// Bounded exponential backoff for transient generation failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter {
            backoff + Duration::from_millis(rand::rng().random_range(0..250))
        } else {
            backoff
        }
    }
}

/// Run `gateway.generate`, retrying transient failures per `policy`.
///
/// Returns the text, the last `Transient` error once retries are exhausted,
/// or `Fatal`/`Cancelled` as soon as either occurs.
pub async fn generate_with_retry(
    gateway: &LlmGateway,
    request: &GenerationRequest,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<String, GenerationError> {
    let mut attempt = 0;
    loop {
        match gateway.generate(request.clone(), cancel).await {
            Err(GenerationError::Transient(reason)) if attempt < policy.max_retries => {
                let backoff = policy.delay(attempt);
                attempt += 1;
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %reason,
                    "Transient generation failure, retrying after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                }
            }
            other => return other,
        }
    }
}
