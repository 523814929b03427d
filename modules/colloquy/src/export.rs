//! Report writers. Read-only consumers of a finished run.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use serde::Serialize;

use crate::orchestrator::RunReport;
use crate::state::Conversation;
use crate::world::{Agent, SceneSettings, WorldConfig, WorldRules};

/// `{slug}_{YYYYmmdd_HHMMSS}`, the shared file stem for one run's outputs.
pub fn output_stem<Tz: TimeZone>(world_name: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}", slug(world_name), at.format("%Y%m%d_%H%M%S"))
}

fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();
    if slug.is_empty() {
        "world".to_string()
    } else {
        slug
    }
}

#[derive(Serialize)]
struct OutcomeDoc {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct RunDoc<'a> {
    world: &'a str,
    agents: &'a [Agent],
    world_rules: &'a WorldRules,
    scene_settings: &'a SceneSettings,
    outcome: OutcomeDoc,
    days_completed: Vec<u32>,
    conversations: &'a [Conversation],
}

/// Structured log of the whole run as pretty JSON.
pub struct JsonExporter<'a> {
    config: &'a WorldConfig,
    report: &'a RunReport,
}

impl<'a> JsonExporter<'a> {
    pub fn new(config: &'a WorldConfig, report: &'a RunReport) -> Self {
        Self { config, report }
    }

    pub fn render(&self) -> Result<String> {
        let state = &self.report.state;
        let doc = RunDoc {
            world: &self.config.name,
            agents: &self.config.agents,
            world_rules: state.world_rules(),
            scene_settings: &self.config.scene_settings,
            outcome: OutcomeDoc {
                status: self.report.outcome.label(),
                error: self.report.outcome.error().map(|e| e.to_string()),
            },
            days_completed: state.days_with_conversations(),
            conversations: state.conversations(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<PathBuf> {
        write_file(path, &self.render()?)
    }
}

/// Human-readable transcript, one section per day.
pub struct MarkdownReport<'a> {
    config: &'a WorldConfig,
    report: &'a RunReport,
}

impl<'a> MarkdownReport<'a> {
    pub fn new(config: &'a WorldConfig, report: &'a RunReport) -> Self {
        Self { config, report }
    }

    pub fn render(&self) -> String {
        let config = self.config;
        let state = &self.report.state;
        let mut md = String::new();

        let _ = writeln!(md, "# {}\n", config.name);
        let _ = writeln!(
            md,
            "_{} agents, {} of {} days, {} exchanges per conversation. Outcome: {}._\n",
            config.agents.len(),
            state.days_with_conversations().len(),
            config.max_days,
            config.exchanges_per_turn,
            self.report.outcome.label()
        );
        if let Some(e) = self.report.outcome.error() {
            let _ = writeln!(md, "> **Run stopped early:** {e}\n");
        }

        if let Some(setting) = &state.world_rules().setting {
            let _ = writeln!(md, "## Setting\n\n{setting}\n");
        }
        if !state.world_rules().rules.is_empty() {
            let _ = writeln!(md, "## Rules\n");
            for rule in &state.world_rules().rules {
                let _ = writeln!(md, "- {rule}");
            }
            md.push('\n');
        }

        let _ = writeln!(md, "## Cast\n");
        for agent in &config.agents {
            let _ = writeln!(md, "- **{}** (`{}`): {}", agent.name, agent.id, agent.identity_script.trim());
        }
        md.push('\n');

        for day in state.days_with_conversations() {
            let _ = writeln!(md, "## Day {day}\n");
            for conv in state.conversations_on(day) {
                let names: Vec<&str> = conv
                    .participants()
                    .iter()
                    .map(|id| config.display_name(id))
                    .collect();
                let _ = writeln!(md, "### {}\n", names.join(" & "));
                for turn in conv.turns() {
                    let name = config.display_name(&turn.speaker_id);
                    if turn.failed {
                        let _ = writeln!(md, "**{name}**: _(no response)_\n");
                    } else {
                        let _ = writeln!(md, "**{name}**: {}\n", turn.message);
                    }
                }
            }
        }

        let failed = state.failed_turns();
        if failed > 0 {
            let _ = writeln!(md, "---\n\n{failed} turn(s) got no response from the model.");
        }
        md
    }

    pub fn save_to_file(&self, path: &Path) -> Result<PathBuf> {
        write_file(path, &self.render())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}
