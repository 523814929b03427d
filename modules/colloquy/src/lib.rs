pub mod cancel;
pub mod config;
pub mod error;
pub mod export;
pub mod gateway;
pub mod hook;
pub mod limiter;
pub mod orchestrator;
pub mod prompt;
pub mod state;
pub mod strategy;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod world;

pub use cancel::CancelToken;
pub use config::{Provider, Settings};
pub use error::{ConfigError, GenerationError, SimulationError};
pub use export::{output_stem, JsonExporter, MarkdownReport};
pub use gateway::{generate_with_retry, GatewayOptions, LlmGateway, RetryPolicy};
pub use hook::{supervise_hook, HookChain, LoggingHook, NoopHook, OnDayComplete, SnapshotHook};
pub use limiter::RateLimiter;
pub use orchestrator::{Orchestrator, RunOutcome, RunPhase, RunReport};
pub use state::{Conversation, Turn, WorldState};
pub use strategy::{ConversationSpec, InteractionStrategy, MemoryMode, TurnBasedStrategy};
pub use world::{Agent, AgentId, PairingHint, SceneOptions, SceneSettings, WorldConfig, WorldRules};
