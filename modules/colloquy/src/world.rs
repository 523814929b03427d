//! World description: the immutable parameters of one simulation run.
//!
//! Loaded once at the process boundary (JSON or TOML), validated, then
//! shared read-only with the orchestrator and every consumer.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Stable identifier of an agent. Ordering is lexicographic on the string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A scripted persona taking part in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub identity_script: String,
}

impl Agent {
    pub fn new(id: &str, name: &str, identity_script: &str) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.to_string(),
            identity_script: identity_script.to_string(),
        }
    }
}

/// Explicit request that a group of agents converse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingHint {
    /// Day the hint applies to; `None` applies to every day.
    #[serde(default)]
    pub day: Option<u32>,
    /// Speakers in speaking order.
    pub participants: Vec<AgentId>,
    /// Exchange count for this conversation, capped at `exchanges_per_turn`.
    #[serde(default)]
    pub exchanges: Option<u32>,
}

/// Shared rules and setting of the world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldRules {
    #[serde(default)]
    pub setting: Option<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub pairings: Vec<PairingHint>,
    /// Free-form keys from the config file, surfaced to prompts as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl WorldRules {
    /// Hints that apply on `day`, in declared order.
    pub fn hints_for(&self, day: u32) -> impl Iterator<Item = &PairingHint> {
        self.pairings
            .iter()
            .filter(move |h| h.day.map_or(true, |d| d == day))
    }
}

/// Scene illustration options, consumed by external media pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneOptions {
    #[serde(default = "default_scene_style")]
    pub style: String,
    #[serde(default = "default_max_scenes")]
    pub max_scenes_per_day: u32,
}

fn default_scene_style() -> String {
    "painterly".to_string()
}

fn default_max_scenes() -> u32 {
    1
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            style: default_scene_style(),
            max_scenes_per_day: default_max_scenes(),
        }
    }
}

/// Tagged optional: the options are always present, `enabled` says whether
/// anyone should act on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub options: SceneOptions,
}

impl SceneSettings {
    pub fn active(&self) -> Option<&SceneOptions> {
        self.enabled.then_some(&self.options)
    }
}

/// Immutable simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub name: String,
    pub agents: Vec<Agent>,
    pub max_days: u32,
    pub exchanges_per_turn: u32,
    #[serde(default)]
    pub world_rules: WorldRules,
    #[serde(default)]
    pub scene_settings: SceneSettings,
}

impl WorldConfig {
    /// Load a config file. `.toml` files are parsed as TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config: Self = if is_toml {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("world name is empty".into()));
        }
        if self.agents.is_empty() {
            return Err(ConfigError::Invalid("at least one agent is required".into()));
        }
        if self.max_days == 0 {
            return Err(ConfigError::Invalid("max_days must be greater than 0".into()));
        }
        if self.exchanges_per_turn == 0 {
            return Err(ConfigError::Invalid(
                "exchanges_per_turn must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.as_str().trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' has an empty id",
                    agent.name
                )));
            }
            if !seen.insert(&agent.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }

        for (i, hint) in self.world_rules.pairings.iter().enumerate() {
            if hint.participants.is_empty() {
                return Err(ConfigError::Invalid(format!("pairing hint {i} has no participants")));
            }
            if let Some(unknown) = hint.participants.iter().find(|id| !seen.contains(id)) {
                return Err(ConfigError::Invalid(format!(
                    "pairing hint {i} names unknown agent '{unknown}'"
                )));
            }
            let unique: HashSet<_> = hint.participants.iter().collect();
            if unique.len() != hint.participants.len() {
                return Err(ConfigError::Invalid(format!(
                    "pairing hint {i} repeats a participant"
                )));
            }
            if hint.day == Some(0) || hint.day.is_some_and(|d| d > self.max_days) {
                return Err(ConfigError::Invalid(format!(
                    "pairing hint {i} targets day outside 1..={}",
                    self.max_days
                )));
            }
            if hint.exchanges == Some(0) {
                return Err(ConfigError::Invalid(format!("pairing hint {i} has zero exchanges")));
            }
        }

        if self.scene_settings.enabled && self.scene_settings.options.max_scenes_per_day == 0 {
            return Err(ConfigError::Invalid(
                "scene generation is enabled with max_scenes_per_day = 0".into(),
            ));
        }

        Ok(())
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| &a.id == id)
    }

    /// Display name for an agent id, falling back to the id itself.
    pub fn display_name<'a>(&'a self, id: &'a AgentId) -> &'a str {
        self.agent(id).map_or(id.as_str(), |a| a.name.as_str())
    }
}
