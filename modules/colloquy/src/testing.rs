// Test doubles for the generation capability.
//
// ScriptedGenerator: plays back a fixed list of outcomes, then repeats a
//   fallback. Records every request so tests can inspect prompts.
// EchoGenerator: deterministic reply derived from the request itself, so
//   output does not depend on call order under concurrent dispatch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ai_client::{AiError, GenerationRequest, TextGenerator};
use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::world::{Agent, WorldConfig, WorldRules};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    /// Provider overload (HTTP 503).
    Transient,
    /// Invalid credentials (HTTP 401).
    Fatal,
    /// Reply after a delay on the tokio clock.
    Delayed(Duration, String),
    /// Cancel the run, then never answer.
    CancelRun(CancelToken),
}

pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    /// Play `steps` in order, then reply "ok" forever.
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_fallback(steps, Step::Reply("ok".into()))
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(step: Step) -> Self {
        Self::with_fallback(Vec::new(), step)
    }

    pub fn always(text: &str) -> Self {
        Self::repeating(Step::Reply(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Reply(text) => Ok(text),
            Step::Transient => Err(AiError::Overloaded {
                status: 503,
                body: "scripted overload".into(),
            }),
            Step::Fatal => Err(AiError::Auth {
                status: 401,
                body: "scripted bad key".into(),
            }),
            Step::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Step::CancelRun(token) => {
                token.cancel();
                std::future::pending().await
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Replies `"<first system line> #<message count>"`.
pub struct EchoGenerator {
    calls: AtomicUsize,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let head = request
            .merged_system()
            .and_then(|s| s.lines().next().map(str::to_string))
            .unwrap_or_default();
        // Yield so concurrent conversations genuinely interleave.
        tokio::task::yield_now().await;
        Ok(format!("{head} #{}", request.messages.len()))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// A valid world with agents named after their ids.
pub fn world(ids: &[&str], max_days: u32, exchanges_per_turn: u32) -> WorldConfig {
    WorldConfig {
        name: "Test World".into(),
        agents: ids
            .iter()
            .map(|id| Agent::new(id, &id.to_uppercase(), &format!("You are {id}.")))
            .collect(),
        max_days,
        exchanges_per_turn,
        world_rules: WorldRules::default(),
        scene_settings: Default::default(),
    }
}
