//! Day-completion hooks.
//!
//! A hook observes the world after each finished day. It gets `&WorldState`
//! only, so it cannot alter what the simulation produced, and the orchestrator
//! calls it through [`supervise_hook`], so a failing or panicking hook cannot
//! stop the run either.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info};

use crate::state::{Conversation, WorldState};

#[async_trait]
pub trait OnDayComplete: Send + Sync {
    async fn on_day_complete(&self, day: u32, state: &WorldState) -> Result<()>;
}

#[async_trait]
impl<H: OnDayComplete + ?Sized> OnDayComplete for Arc<H> {
    async fn on_day_complete(&self, day: u32, state: &WorldState) -> Result<()> {
        (**self).on_day_complete(day, state).await
    }
}

/// Does nothing. The orchestrator's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl OnDayComplete for NoopHook {
    async fn on_day_complete(&self, _day: u32, _state: &WorldState) -> Result<()> {
        Ok(())
    }
}

/// Logs a one-line summary per day.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

#[async_trait]
impl OnDayComplete for LoggingHook {
    async fn on_day_complete(&self, day: u32, state: &WorldState) -> Result<()> {
        let (conversations, turns, failed) =
            state
                .conversations_on(day)
                .fold((0usize, 0usize, 0usize), |(c, t, f), conv| {
                    let failed = conv.turns().iter().filter(|turn| turn.failed).count();
                    (c + 1, t + conv.turns().len(), f + failed)
                });
        info!(day, conversations, turns, failed, "Day complete");
        Ok(())
    }
}

/// Writes `day_NNN.json` with that day's conversations into `dir`.
#[derive(Debug, Clone)]
pub struct SnapshotHook {
    dir: PathBuf,
}

#[derive(Serialize)]
struct DaySnapshot<'a> {
    day: u32,
    conversations: Vec<&'a Conversation>,
}

impl SnapshotHook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, day: u32) -> PathBuf {
        self.dir.join(format!("day_{day:03}.json"))
    }
}

#[async_trait]
impl OnDayComplete for SnapshotHook {
    async fn on_day_complete(&self, day: u32, state: &WorldState) -> Result<()> {
        let snapshot = DaySnapshot {
            day,
            conversations: state.conversations_on(day).collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create snapshot dir {}", self.dir.display()))?;
        let path = self.path_for(day);
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Runs several hooks in order. Every member runs even if an earlier one
/// fails; the first error is returned afterwards.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn OnDayComplete>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl OnDayComplete + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl OnDayComplete for HookChain {
    async fn on_day_complete(&self, day: u32, state: &WorldState) -> Result<()> {
        let mut first_err = None;
        for hook in &self.hooks {
            if !supervise_hook(hook.as_ref(), day, state).await && first_err.is_none() {
                first_err = Some(anyhow::anyhow!("hook chain member failed on day {day}"));
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Invoke `hook`, catching both errors and panics. Returns whether the hook
/// succeeded; failures are logged and go no further.
pub async fn supervise_hook(hook: &dyn OnDayComplete, day: u32, state: &WorldState) -> bool {
    match AssertUnwindSafe(hook.on_day_complete(day, state))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(day, error = %format!("{e:#}"), "Day-complete hook failed");
            false
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(day, panic = %msg, "Day-complete hook panicked");
            false
        }
    }
}
