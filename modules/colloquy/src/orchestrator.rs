//! The day/turn scheduler.
//!
//! Days run strictly in sequence. Within a day the strategy's plan is cut
//! into waves of consecutive conversations with disjoint participants; a
//! wave's conversations run concurrently and their results are appended in
//! plan order. The first fatal result drops the rest of its wave mid-flight.
//! The hook sees each day only after all of it is recorded.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::{ConfigError, GenerationError, SimulationError};
use crate::gateway::{generate_with_retry, LlmGateway, RetryPolicy};
use crate::hook::{supervise_hook, NoopHook, OnDayComplete};
use crate::prompt;
use crate::state::{Conversation, Turn, WorldState};
use crate::strategy::{ConversationSpec, InteractionStrategy};
use crate::world::{AgentId, WorldConfig};

const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running { day: u32 },
    Finished,
    Aborted,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(SimulationError),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Failed(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<&SimulationError> {
        match self {
            RunOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// What a run produced: everything recorded, and how it ended.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: WorldState,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }
}

/// How a single conversation ended. A fatal provider error is the `Err`
/// side of [`Orchestrator::run_conversation`] instead.
enum ConversationEnd {
    Complete(Conversation),
    /// Cancelled; holds the turns finished before the signal.
    Interrupted(Conversation),
}

pub struct Orchestrator {
    config: Arc<WorldConfig>,
    gateway: LlmGateway,
    strategy: Box<dyn InteractionStrategy>,
    hook: Box<dyn OnDayComplete>,
    retry: RetryPolicy,
    max_concurrency: usize,
    state: WorldState,
    phase: RunPhase,
}

impl Orchestrator {
    pub fn new(
        config: Arc<WorldConfig>,
        gateway: LlmGateway,
        strategy: impl InteractionStrategy + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = WorldState::new(config.world_rules.clone());
        Ok(Self {
            config,
            gateway,
            strategy: Box::new(strategy),
            hook: Box::new(NoopHook),
            retry: RetryPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            state,
            phase: RunPhase::Idle,
        })
    }

    pub fn with_hook(mut self, hook: impl OnDayComplete + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upper bound on conversations generating at once. Zero is treated as one.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Run every day from 1 to `max_days`.
    ///
    /// Never fails outright: the report carries whatever was recorded along
    /// with how the run ended. A fatal provider error drops the day it hit;
    /// cancellation keeps the interrupted day's finished turns.
    pub async fn run_simulation(&mut self, cancel: CancelToken) -> RunReport {
        if self.phase != RunPhase::Idle {
            warn!(phase = ?self.phase, "run_simulation called twice");
            return RunReport {
                state: self.state.clone(),
                outcome: RunOutcome::Failed(SimulationError::AlreadyRun),
            };
        }

        info!(
            world = %self.config.name,
            agents = self.config.agents.len(),
            max_days = self.config.max_days,
            exchanges_per_turn = self.config.exchanges_per_turn,
            "Starting simulation"
        );

        let outcome = self.run_days(&cancel).await;
        self.phase = match outcome {
            RunOutcome::Completed => RunPhase::Finished,
            _ => RunPhase::Aborted,
        };

        match &outcome {
            RunOutcome::Completed => info!(
                conversations = self.state.conversations().len(),
                failed_turns = self.state.failed_turns(),
                "Simulation complete"
            ),
            RunOutcome::Cancelled => warn!(day = self.state.day(), "Simulation cancelled"),
            RunOutcome::Failed(e) => error!(error = %e, "Simulation aborted"),
        }

        RunReport {
            state: self.state.clone(),
            outcome,
        }
    }

    async fn run_days(&mut self, cancel: &CancelToken) -> RunOutcome {
        for day in 1..=self.config.max_days {
            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            self.phase = RunPhase::Running { day };
            self.state.begin_day(day);

            let plan = self.strategy.plan(&self.state, day, &self.config);
            let specs = self.sanitize(day, plan);
            let batches = waves(&specs);
            info!(day, conversations = specs.len(), waves = batches.len(), "Day started");

            let mut cancelled = false;
            for wave in batches {
                // Unordered so a fatal error surfaces as soon as it happens;
                // try_collect then drops the siblings still generating.
                let finished: Result<Vec<(usize, ConversationEnd)>, String> = {
                    let this = &*self;
                    stream::iter(wave.iter().enumerate().map(move |(slot, spec)| {
                        this.run_conversation(day, spec, cancel)
                            .map(move |end| end.map(|end| (slot, end)))
                    }))
                    .buffer_unordered(this.max_concurrency)
                    .try_collect()
                    .await
                };

                let mut results = match finished {
                    Ok(results) => results,
                    Err(reason) => {
                        self.state.discard_day(day);
                        return RunOutcome::Failed(SimulationError::FatalProvider { day, reason });
                    }
                };
                results.sort_by_key(|(slot, _)| *slot);

                for (_, result) in results {
                    match result {
                        ConversationEnd::Complete(conv) => {
                            self.state.append(conv);
                        }
                        ConversationEnd::Interrupted(conv) => {
                            cancelled = true;
                            if !conv.turns().is_empty() {
                                self.state.append(conv);
                            }
                        }
                    }
                }

                if cancelled || cancel.is_cancelled() {
                    return RunOutcome::Cancelled;
                }
            }

            supervise_hook(self.hook.as_ref(), day, &self.state).await;
        }
        RunOutcome::Completed
    }

    /// Drop unknown or repeated participants and empty specs; clamp
    /// exchange counts to `exchanges_per_turn`.
    fn sanitize(&self, day: u32, plan: Vec<ConversationSpec>) -> Vec<ConversationSpec> {
        let cap = self.config.exchanges_per_turn;
        plan.into_iter()
            .filter_map(|spec| {
                let mut seen = HashSet::new();
                let mut participants = Vec::with_capacity(spec.participants.len());
                for id in spec.participants {
                    if self.config.agent(&id).is_none() {
                        warn!(day, agent = %id, "Plan names unknown agent, dropping it");
                        continue;
                    }
                    if seen.insert(id.clone()) {
                        participants.push(id);
                    }
                }
                if participants.is_empty() {
                    warn!(day, "Skipping conversation with no known participants");
                    return None;
                }
                if spec.exchange_count == 0 {
                    debug!(day, "Skipping conversation with zero exchanges");
                    return None;
                }
                if spec.exchange_count > cap {
                    warn!(
                        day,
                        requested = spec.exchange_count,
                        cap,
                        "Clamping exchange count"
                    );
                }
                Some(ConversationSpec {
                    participants,
                    exchange_count: spec.exchange_count.min(cap),
                })
            })
            .collect()
    }

    async fn run_conversation(
        &self,
        day: u32,
        spec: &ConversationSpec,
        cancel: &CancelToken,
    ) -> Result<ConversationEnd, String> {
        let mut conv = Conversation::new(day, spec.participants.clone());
        let recalled = self.strategy.recall(&self.state, day, &spec.participants);
        debug!(
            day,
            participants = ?ids(&spec.participants),
            exchanges = spec.exchange_count,
            recalled = recalled.len(),
            "Conversation started"
        );

        for n in 0..spec.exchange_count {
            if cancel.is_cancelled() {
                return Ok(ConversationEnd::Interrupted(conv));
            }
            let speaker_id = spec.speaker(n);
            let Some(speaker) = self.config.agent(speaker_id) else {
                // sanitize() only keeps known agents
                return Err(format!("unknown speaker '{speaker_id}'"));
            };

            let request = prompt::agent_turn(speaker, &self.config, &conv, &recalled);
            match generate_with_retry(&self.gateway, &request, &self.retry, cancel).await {
                Ok(text) => conv.push(Turn::spoken(speaker_id.clone(), text.trim().to_string())),
                Err(GenerationError::Transient(reason)) => {
                    warn!(
                        day,
                        speaker = %speaker_id,
                        exchange = n,
                        error = %reason,
                        "Retries exhausted, recording failed turn"
                    );
                    conv.push(Turn::failed(speaker_id.clone()));
                }
                Err(GenerationError::Fatal(reason)) => {
                    error!(day, speaker = %speaker_id, error = %reason, "Fatal provider error");
                    return Err(reason);
                }
                Err(GenerationError::Cancelled) => return Ok(ConversationEnd::Interrupted(conv)),
            }
        }
        Ok(ConversationEnd::Complete(conv))
    }
}

/// Split `specs` into consecutive groups whose members share no participant.
fn waves(specs: &[ConversationSpec]) -> Vec<&[ConversationSpec]> {
    let mut waves = Vec::new();
    let mut start = 0;
    for i in 1..specs.len() {
        let overlaps = specs[start..i]
            .iter()
            .any(|member| !member.is_disjoint_from(&specs[i]));
        if overlaps {
            waves.push(&specs[start..i]);
            start = i;
        }
    }
    if start < specs.len() {
        waves.push(&specs[start..]);
    }
    waves
}

fn ids(agents: &[AgentId]) -> Vec<&str> {
    agents.iter().map(AgentId::as_str).collect()
}
