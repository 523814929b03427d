//! WorldState: the append-only record of everything said during a run.
//!
//! Consumers (hooks, exporters) only ever see `&WorldState`; every mutator is
//! crate-private and called by the orchestrator alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::world::{AgentId, WorldRules};

/// One generated utterance, or the placeholder left by a failed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker_id: AgentId,
    pub message: String,
    pub failed: bool,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub(crate) fn spoken(speaker_id: AgentId, message: String) -> Self {
        Self {
            speaker_id,
            message,
            failed: false,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn failed(speaker_id: AgentId) -> Self {
        Self {
            speaker_id,
            message: String::new(),
            failed: true,
            timestamp: Utc::now(),
        }
    }
}

/// Turns exchanged by a fixed group of agents within one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    day: u32,
    /// Unique ids in speaking order.
    participants: Vec<AgentId>,
    turns: Vec<Turn>,
}

impl Conversation {
    pub(crate) fn new(day: u32, participants: Vec<AgentId>) -> Self {
        Self {
            day,
            participants,
            turns: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn participants(&self) -> &[AgentId] {
        &self.participants
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn includes(&self, agent: &AgentId) -> bool {
        self.participants.contains(agent)
    }

    pub fn shares_participant_with(&self, agents: &[AgentId]) -> bool {
        agents.iter().any(|a| self.includes(a))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    day: u32,
    conversations: Vec<Conversation>,
    world_rules: WorldRules,
}

impl WorldState {
    pub fn new(world_rules: WorldRules) -> Self {
        Self {
            day: 0,
            conversations: Vec::new(),
            world_rules,
        }
    }

    /// The day currently running or last run; 0 before the first day.
    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn world_rules(&self) -> &WorldRules {
        &self.world_rules
    }

    pub fn conversations_on(&self, day: u32) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter().filter(move |c| c.day == day)
    }

    /// Distinct days that have at least one conversation, ascending.
    pub fn days_with_conversations(&self) -> Vec<u32> {
        let mut days: Vec<u32> = self.conversations.iter().map(|c| c.day).collect();
        days.dedup();
        days
    }

    pub fn failed_turns(&self) -> usize {
        self.conversations
            .iter()
            .flat_map(|c| c.turns.iter())
            .filter(|t| t.failed)
            .count()
    }

    /// Advance to `day`. A day at or before the current one is refused.
    pub(crate) fn begin_day(&mut self, day: u32) -> bool {
        if day <= self.day {
            warn!(day, current = self.day, "Refusing to revisit a past day");
            return false;
        }
        self.day = day;
        true
    }

    /// Record a finished conversation. Only the current day's are accepted.
    pub(crate) fn append(&mut self, conversation: Conversation) -> bool {
        if conversation.day != self.day {
            warn!(
                conversation_day = conversation.day,
                current = self.day,
                "Refusing conversation from another day"
            );
            return false;
        }
        self.conversations.push(conversation);
        true
    }

    /// Drop everything recorded for `day`. Only the running day may be discarded.
    pub(crate) fn discard_day(&mut self, day: u32) -> bool {
        if day != self.day {
            warn!(day, current = self.day, "Refusing to discard a settled day");
            return false;
        }
        self.conversations.retain(|c| c.day != day);
        true
    }
}
