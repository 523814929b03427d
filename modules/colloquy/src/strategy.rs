//! Interaction strategies: who talks to whom on a given day, and what each
//! speaker remembers. Pure functions of their inputs; never touch the
//! generation capability or mutate state.

use serde::{Deserialize, Serialize};

use crate::state::{Conversation, WorldState};
use crate::world::{AgentId, WorldConfig};

/// One scheduled conversation: speakers in speaking order, and how many
/// exchanges (turns) to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSpec {
    pub participants: Vec<AgentId>,
    pub exchange_count: u32,
}

impl ConversationSpec {
    /// Speaker of exchange `n` (0-based), rotating round-robin.
    pub fn speaker(&self, n: u32) -> &AgentId {
        &self.participants[n as usize % self.participants.len()]
    }

    pub fn is_disjoint_from(&self, other: &ConversationSpec) -> bool {
        !self
            .participants
            .iter()
            .any(|p| other.participants.contains(p))
    }
}

/// What earlier conversations a speaker may draw on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// Each conversation starts from nothing but the persona.
    #[default]
    StatelessPerDay,
    /// Every earlier-day conversation involving any participant is recalled.
    FullHistory,
}

impl std::str::FromStr for MemoryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stateless" | "stateless_per_day" => Ok(MemoryMode::StatelessPerDay),
            "full" | "full_history" => Ok(MemoryMode::FullHistory),
            other => Err(format!("unknown memory mode '{other}' (expected stateless|full)")),
        }
    }
}

pub trait InteractionStrategy: Send + Sync {
    /// Ordered plan for `day`. Must be deterministic in its inputs.
    fn plan(&self, state: &WorldState, day: u32, config: &WorldConfig) -> Vec<ConversationSpec>;

    fn memory(&self) -> MemoryMode {
        MemoryMode::StatelessPerDay
    }

    /// Conversations from before `day` that `participants` should remember.
    /// Same-day conversations are never recalled.
    fn recall<'s>(
        &self,
        state: &'s WorldState,
        day: u32,
        participants: &[AgentId],
    ) -> Vec<&'s Conversation> {
        match self.memory() {
            MemoryMode::StatelessPerDay => Vec::new(),
            MemoryMode::FullHistory => state
                .conversations()
                .iter()
                .filter(|c| c.day() < day && c.shares_participant_with(participants))
                .collect(),
        }
    }
}

/// Pairs agents off for conversations in which speakers alternate.
///
/// Pairing hints in the world rules win. Without one, agents are sorted by id
/// and paired by a round-robin tournament (circle method): day `d` plays
/// round `(d - 1) % rounds`, so over consecutive days everyone meets everyone
/// once before any pair repeats. With an odd roster one agent sits the day out.
#[derive(Debug, Clone, Default)]
pub struct TurnBasedStrategy {
    memory: MemoryMode,
}

impl TurnBasedStrategy {
    pub fn new(memory: MemoryMode) -> Self {
        Self { memory }
    }

    fn hinted(day: u32, config: &WorldConfig) -> Vec<ConversationSpec> {
        config
            .world_rules
            .hints_for(day)
            .filter_map(|hint| {
                let participants: Vec<AgentId> = hint
                    .participants
                    .iter()
                    .filter(|id| config.agent(id).is_some())
                    .cloned()
                    .collect();
                if participants.is_empty() {
                    return None;
                }
                let exchanges = hint
                    .exchanges
                    .unwrap_or(config.exchanges_per_turn)
                    .min(config.exchanges_per_turn);
                Some(ConversationSpec {
                    participants,
                    exchange_count: exchanges,
                })
            })
            .collect()
    }

    fn round_robin(day: u32, config: &WorldConfig) -> Vec<ConversationSpec> {
        let mut ids: Vec<&AgentId> = config.agents.iter().map(|a| &a.id).collect();
        ids.sort();

        if ids.len() < 2 {
            return ids
                .into_iter()
                .map(|id| ConversationSpec {
                    participants: vec![id.clone()],
                    exchange_count: config.exchanges_per_turn,
                })
                .collect();
        }

        // Circle method over an even-sized ring; `None` is the bye seat.
        let mut ring: Vec<Option<&AgentId>> = ids.into_iter().map(Some).collect();
        if ring.len() % 2 == 1 {
            ring.push(None);
        }
        let n = ring.len();
        let rounds = (n - 1) as u32;
        let round = ((day.max(1) - 1) % rounds) as usize;

        // Seat 0 stays fixed, seats 1..n rotate by `round`.
        let seat = |i: usize| {
            if i == 0 {
                ring[0]
            } else {
                ring[1 + (i - 1 + n - 1 - round) % (n - 1)]
            }
        };

        let mut specs: Vec<ConversationSpec> = (0..n / 2)
            .filter_map(|i| match (seat(i), seat(n - 1 - i)) {
                (Some(a), Some(b)) => {
                    let (first, second) = if a <= b { (a, b) } else { (b, a) };
                    Some(ConversationSpec {
                        participants: vec![first.clone(), second.clone()],
                        exchange_count: config.exchanges_per_turn,
                    })
                }
                _ => None,
            })
            .collect();
        specs.sort_by(|x, y| x.participants.cmp(&y.participants));
        specs
    }
}

impl InteractionStrategy for TurnBasedStrategy {
    fn plan(&self, _state: &WorldState, day: u32, config: &WorldConfig) -> Vec<ConversationSpec> {
        let hinted = Self::hinted(day, config);
        if !hinted.is_empty() {
            return hinted;
        }
        Self::round_robin(day, config)
    }

    fn memory(&self) -> MemoryMode {
        self.memory
    }
}
