use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use colloquy::{
    output_stem, CancelToken, HookChain, JsonExporter, LlmGateway, LoggingHook, MarkdownReport,
    Orchestrator, RunOutcome, Settings, SnapshotHook, TurnBasedStrategy, WorldConfig,
};

#[derive(Parser)]
#[command(name = "colloquy", about = "Run a day-by-day multi-agent conversation simulation")]
struct Cli {
    /// World config file (.json or .toml)
    config: PathBuf,

    /// Directory for reports
    #[arg(short, long, default_value = "outputs")]
    output_dir: PathBuf,

    /// Skip the markdown report
    #[arg(long)]
    no_markdown: bool,

    /// Skip the JSON log
    #[arg(long)]
    no_json: bool,

    /// Write a JSON snapshot after every completed day
    #[arg(long)]
    snapshots: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "colloquy=debug" } else { "colloquy=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let config = WorldConfig::load(&cli.config)
        .with_context(|| format!("Invalid world config {}", cli.config.display()))?;
    info!(
        world = %config.name,
        agents = config.agents.len(),
        days = config.max_days,
        "World loaded"
    );
    let config = Arc::new(config);

    let settings = Settings::from_env()?;
    let gateway = LlmGateway::new(settings.build_generator(), settings.gateway_options());
    let strategy = TurnBasedStrategy::new(settings.memory);

    let stem = output_stem(&config.name, &chrono::Local::now());
    let mut hooks = HookChain::new().with(LoggingHook);
    if cli.snapshots {
        let dir = cli.output_dir.join(format!("{stem}_days"));
        info!(dir = %dir.display(), "Writing daily snapshots");
        hooks = hooks.with(SnapshotHook::new(dir));
    }

    let mut orchestrator = Orchestrator::new(Arc::clone(&config), gateway, strategy)?
        .with_hook(hooks)
        .with_retry(settings.retry_policy())
        .with_max_concurrency(settings.max_concurrency);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after in-flight turns");
                cancel.cancel();
            }
        });
    }

    let started = Instant::now();
    let report = orchestrator.run_simulation(cancel).await;
    info!(
        outcome = report.outcome.label(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        conversations = report.state.conversations().len(),
        "Simulation finished"
    );

    // Partial runs are still written out.
    if !cli.no_markdown {
        let path = cli.output_dir.join(format!("{stem}.md"));
        MarkdownReport::new(&config, &report).save_to_file(&path)?;
        info!(path = %path.display(), "Markdown report written");
    }
    if !cli.no_json {
        let path = cli.output_dir.join(format!("{stem}.json"));
        JsonExporter::new(&config, &report).save_to_file(&path)?;
        info!(path = %path.display(), "JSON log written");
    }

    match report.outcome {
        RunOutcome::Failed(e) => Err(e).context("Simulation failed"),
        RunOutcome::Completed | RunOutcome::Cancelled => Ok(()),
    }
}
