//! End-to-end runs of the scheduler against stub generators.
//! Every test drives tokio's paused clock, so retries and rate-limit waits
//! finish instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_client::{AiError, GenerationRequest, TextGenerator};
use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use colloquy::testing::{world, EchoGenerator, ScriptedGenerator, Step};
use colloquy::{
    CancelToken, ConversationSpec, GatewayOptions, InteractionStrategy, LlmGateway, MemoryMode,
    OnDayComplete, Orchestrator, PairingHint, RetryPolicy, RunOutcome, RunPhase, RunReport,
    SimulationError, TurnBasedStrategy, WorldConfig, WorldState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn gateway(generator: Arc<dyn TextGenerator>, rpm: u32) -> LlmGateway {
    LlmGateway::new(
        generator,
        GatewayOptions {
            rate_limit_rpm: rpm,
            call_timeout: Duration::from_secs(10),
            ..GatewayOptions::default()
        },
    )
}

fn orchestrator(
    config: WorldConfig,
    generator: Arc<dyn TextGenerator>,
    strategy: impl InteractionStrategy + 'static,
) -> Orchestrator {
    Orchestrator::new(Arc::new(config), gateway(generator, 10_000), strategy)
        .unwrap()
        .with_retry(RetryPolicy::default().without_jitter())
}

/// Conversations with timestamps stripped: (day, participants, [(speaker, message, failed)]).
type Transcript = Vec<(u32, Vec<String>, Vec<(String, String, bool)>)>;

fn transcript(state: &WorldState) -> Transcript {
    state
        .conversations()
        .iter()
        .map(|c| {
            (
                c.day(),
                c.participants().iter().map(|p| p.to_string()).collect(),
                c.turns()
                    .iter()
                    .map(|t| (t.speaker_id.to_string(), t.message.clone(), t.failed))
                    .collect(),
            )
        })
        .collect()
}

async fn run_once(mut orch: Orchestrator) -> RunReport {
    orch.run_simulation(CancelToken::new()).await
}

fn speakers(report: &RunReport, index: usize) -> Vec<String> {
    report.state.conversations()[index]
        .turns()
        .iter()
        .map(|t| t.speaker_id.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Records (day, conversations recorded for that day) on every call.
#[derive(Default)]
struct Recorder(Mutex<Vec<(u32, usize)>>);

impl Recorder {
    fn calls(&self) -> Vec<(u32, usize)> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl OnDayComplete for Recorder {
    async fn on_day_complete(&self, day: u32, state: &WorldState) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .push((day, state.conversations_on(day).count()));
        Ok(())
    }
}

struct AlwaysErr;

#[async_trait]
impl OnDayComplete for AlwaysErr {
    async fn on_day_complete(&self, day: u32, _state: &WorldState) -> Result<()> {
        anyhow::bail!("media pipeline down on day {day}")
    }
}

struct AlwaysPanic;

#[async_trait]
impl OnDayComplete for AlwaysPanic {
    async fn on_day_complete(&self, _day: u32, _state: &WorldState) -> Result<()> {
        panic!("scene renderer crashed")
    }
}

/// Stamps each completed call with the tokio clock.
#[derive(Default)]
struct Stopwatch(Mutex<Vec<Instant>>);

#[async_trait]
impl TextGenerator for Stopwatch {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, AiError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.0.lock().unwrap().push(Instant::now());
        Ok("tick".into())
    }

    fn name(&self) -> &str {
        "stopwatch"
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn two_agents_two_days_alternate_speakers() {
    let generator = Arc::new(ScriptedGenerator::always("hi"));
    let mut orch = orchestrator(world(&["a", "b"], 2, 2), generator.clone(), TurnBasedStrategy::default());

    let report = orch.run_simulation(CancelToken::new()).await;

    assert!(report.is_completed());
    assert_eq!(orch.phase(), RunPhase::Finished);
    let convs = report.state.conversations();
    assert_eq!(convs.len(), 2);
    for (i, conv) in convs.iter().enumerate() {
        assert_eq!(conv.day(), i as u32 + 1);
        assert_eq!(conv.turns().len(), 2);
        assert!(conv.turns().iter().all(|t| t.message == "hi" && !t.failed));
        assert_eq!(speakers(&report, i), vec!["a", "b"]);
    }
    assert_eq!(generator.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn completed_run_covers_every_day_in_order() {
    let generator = Arc::new(EchoGenerator::new());
    let mut orch = orchestrator(
        world(&["a", "b", "c", "d", "e"], 5, 3),
        generator,
        TurnBasedStrategy::default(),
    );

    let report = orch.run_simulation(CancelToken::new()).await;

    assert!(report.is_completed());
    assert_eq!(report.state.days_with_conversations(), vec![1, 2, 3, 4, 5]);
    let days: Vec<u32> = report.state.conversations().iter().map(|c| c.day()).collect();
    assert!(days.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(report.state.day(), 5);
}

#[tokio::test(start_paused = true)]
async fn turns_never_exceed_exchanges_per_turn() {
    struct Greedy;

    impl InteractionStrategy for Greedy {
        fn plan(&self, _: &WorldState, _: u32, config: &WorldConfig) -> Vec<ConversationSpec> {
            vec![ConversationSpec {
                participants: config.agents.iter().map(|a| a.id.clone()).collect(),
                exchange_count: 50,
            }]
        }
    }

    let mut config = world(&["a", "b", "c"], 2, 4);
    config.world_rules.pairings = vec![PairingHint {
        day: Some(1),
        participants: vec!["c".into(), "a".into()],
        exchanges: Some(9),
    }];

    let hinted = run_once(
        orchestrator(config.clone(), Arc::new(EchoGenerator::new()), TurnBasedStrategy::default()),
    )
    .await;
    let greedy = run_once(orchestrator(config, Arc::new(EchoGenerator::new()), Greedy)).await;

    for report in [&hinted, &greedy] {
        assert!(report.is_completed());
        assert!(report.state.conversations().iter().all(|c| c.turns().len() <= 4));
    }
    assert_eq!(speakers(&hinted, 0), vec!["c", "a", "c", "a"]);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_without_duplicate_turns() {
    const K: usize = 2;
    let mut steps = vec![Step::Transient; K];
    steps.push(Step::Reply("finally".into()));
    let generator = Arc::new(ScriptedGenerator::new(steps));
    let mut orch = orchestrator(world(&["a", "b"], 1, 1), generator.clone(), TurnBasedStrategy::default());

    let report = orch.run_simulation(CancelToken::new()).await;

    assert!(report.is_completed());
    assert_eq!(generator.calls(), K + 1);
    let turns = report.state.conversations()[0].turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].message, "finally");
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_record_a_failed_turn_and_continue() {
    // Retry budget of 3 means 4 attempts for the first exchange.
    let generator = Arc::new(ScriptedGenerator::new(vec![Step::Transient; 4]));
    let mut orch = orchestrator(world(&["a", "b"], 1, 2), generator.clone(), TurnBasedStrategy::default());

    let report = orch.run_simulation(CancelToken::new()).await;

    assert!(report.is_completed());
    let turns = report.state.conversations()[0].turns();
    assert_eq!(turns.len(), 2);
    assert!(turns[0].failed);
    assert!(turns[0].message.is_empty());
    assert_eq!(turns[1].message, "ok");
    assert_eq!(report.state.failed_turns(), 1);
    assert_eq!(generator.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn fatal_error_on_day_two_keeps_only_day_one() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Reply("morning".into()),
        Step::Reply("morning to you".into()),
        Step::Fatal,
    ]));
    let hook = Arc::new(Recorder::default());
    let mut orch = orchestrator(world(&["a", "b"], 3, 2), generator.clone(), TurnBasedStrategy::default())
        .with_hook(Arc::clone(&hook));

    let report = orch.run_simulation(CancelToken::new()).await;

    match &report.outcome {
        RunOutcome::Failed(SimulationError::FatalProvider { day, .. }) => assert_eq!(*day, 2),
        other => panic!("expected fatal provider failure, got {other:?}"),
    }
    assert_eq!(orch.phase(), RunPhase::Aborted);
    assert_eq!(report.state.days_with_conversations(), vec![1]);
    assert_eq!(report.state.conversations().len(), 1);
    assert_eq!(report.state.conversations()[0].turns().len(), 2);
    assert_eq!(generator.calls(), 3);
    assert_eq!(hook.calls(), vec![(1, 1)]);
}

#[tokio::test(start_paused = true)]
async fn fatal_error_discards_finished_conversations_of_that_day() {
    // Day 1 pairs a-d and b-c in one wave; the second conversation hits the fatal error.
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Reply("one".into()),
        Step::Fatal,
    ]));
    let mut orch = orchestrator(world(&["a", "b", "c", "d"], 2, 1), generator, TurnBasedStrategy::default())
        .with_max_concurrency(1);

    let report = orch.run_simulation(CancelToken::new()).await;

    assert!(matches!(report.outcome, RunOutcome::Failed(_)));
    assert!(report.state.conversations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fatal_error_stops_sibling_conversations_immediately() {
    // a-d and b-c share a wave. Whichever calls first gets the fatal error;
    // the other is mid-call and must not make any further calls.
    let generator = Arc::new(ScriptedGenerator::with_fallback(
        vec![Step::Fatal],
        Step::Delayed(Duration::from_secs(1), "slow".into()),
    ));
    let hook = Arc::new(Recorder::default());
    let mut orch = orchestrator(
        world(&["a", "b", "c", "d"], 2, 10),
        generator.clone(),
        TurnBasedStrategy::default(),
    )
    .with_hook(Arc::clone(&hook));

    let started = Instant::now();
    let report = orch.run_simulation(CancelToken::new()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(SimulationError::FatalProvider { day: 1, .. })
    ));
    assert!(generator.calls() <= 2, "made {} calls", generator.calls());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.state.conversations().is_empty());
    assert!(hook.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_conversation_truncates_it() {
    let cancel = CancelToken::new();
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Reply("first words".into()),
        Step::CancelRun(cancel.clone()),
    ]));
    let hook = Arc::new(Recorder::default());
    let mut orch = orchestrator(world(&["a", "b"], 2, 3), generator, TurnBasedStrategy::default())
        .with_hook(Arc::clone(&hook));

    let report = orch.run_simulation(cancel).await;

    assert!(matches!(report.outcome, RunOutcome::Cancelled));
    assert_eq!(orch.phase(), RunPhase::Aborted);
    let convs = report.state.conversations();
    assert_eq!(convs.len(), 1);
    assert_eq!(convs[0].day(), 1);
    assert_eq!(convs[0].turns().len(), 1);
    assert!(convs[0].turns().len() < 3);
    assert!(report.state.conversations_on(2).next().is_none());
    assert!(hook.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_wave_truncates_every_conversation() {
    // Every call takes a second; the signal lands halfway through the second exchange.
    let cancel = CancelToken::new();
    let generator = Arc::new(ScriptedGenerator::repeating(Step::Delayed(
        Duration::from_secs(1),
        "slow".into(),
    )));
    let hook = Arc::new(Recorder::default());
    let mut orch = orchestrator(
        world(&["a", "b", "c", "d"], 2, 3),
        generator,
        TurnBasedStrategy::default(),
    )
    .with_hook(Arc::clone(&hook));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            cancel.cancel();
        });
    }
    let report = orch.run_simulation(cancel).await;

    assert!(matches!(report.outcome, RunOutcome::Cancelled));
    let convs = report.state.conversations();
    assert_eq!(convs.len(), 2);
    assert!(!convs[0].shares_participant_with(convs[1].participants()));
    for conv in convs {
        assert_eq!(conv.day(), 1);
        assert_eq!(conv.turns().len(), 1);
        assert!(!conv.turns()[0].failed);
    }
    assert!(report.state.conversations_on(2).next().is_none());
    assert!(hook.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn hook_runs_once_per_day_in_order_after_the_day() {
    let hook = Arc::new(Recorder::default());
    let mut orch = orchestrator(
        world(&["a", "b", "c", "d"], 3, 1),
        Arc::new(EchoGenerator::new()),
        TurnBasedStrategy::default(),
    )
    .with_hook(Arc::clone(&hook));

    orch.run_simulation(CancelToken::new()).await;

    assert_eq!(hook.calls(), vec![(1, 2), (2, 2), (3, 2)]);
}

#[tokio::test(start_paused = true)]
async fn failing_hooks_do_not_change_the_transcript() {
    let config = world(&["a", "b", "c"], 3, 2);

    let quiet = run_once(
        orchestrator(config.clone(), Arc::new(EchoGenerator::new()), TurnBasedStrategy::default()),
    )
    .await;
    let erroring = run_once(
        orchestrator(config.clone(), Arc::new(EchoGenerator::new()), TurnBasedStrategy::default())
            .with_hook(AlwaysErr),
    )
    .await;
    let panicking = run_once(
        orchestrator(config, Arc::new(EchoGenerator::new()), TurnBasedStrategy::default())
            .with_hook(AlwaysPanic),
    )
    .await;

    assert!(erroring.is_completed());
    assert!(panicking.is_completed());
    assert_eq!(transcript(&quiet.state), transcript(&erroring.state));
    assert_eq!(transcript(&quiet.state), transcript(&panicking.state));
}

// ---------------------------------------------------------------------------
// Concurrency, memory and rate limiting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_dispatch_matches_sequential() {
    let config = world(&["a", "b", "c", "d", "e", "f"], 4, 3);

    let sequential = run_once(
        orchestrator(config.clone(), Arc::new(EchoGenerator::new()), TurnBasedStrategy::default())
            .with_max_concurrency(1),
    )
    .await;
    let concurrent = run_once(
        orchestrator(config, Arc::new(EchoGenerator::new()), TurnBasedStrategy::default())
            .with_max_concurrency(8),
    )
    .await;

    assert_eq!(transcript(&sequential.state), transcript(&concurrent.state));
    assert_eq!(sequential.state.conversations().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn memory_modes_differ_only_in_recall() {
    async fn day_two_systems(memory: MemoryMode) -> Vec<String> {
        let generator = Arc::new(ScriptedGenerator::always("The bells rang at dawn."));
        run_once(orchestrator(
            world(&["a", "b"], 2, 2),
            generator.clone(),
            TurnBasedStrategy::new(memory),
        ))
        .await;
        generator
            .requests()
            .into_iter()
            .skip(2)
            .map(|r| r.system.unwrap_or_default())
            .collect()
    }

    let stateless = day_two_systems(MemoryMode::StatelessPerDay).await;
    let full = day_two_systems(MemoryMode::FullHistory).await;

    assert_eq!(stateless.len(), 2);
    assert!(stateless.iter().all(|s| !s.contains("REMEMBER")));
    assert_eq!(full.len(), 2);
    assert!(full.iter().all(|s| s.contains("Day 1, with")));
    assert!(full.iter().all(|s| s.contains("The bells rang at dawn.")));
}

#[tokio::test(start_paused = true)]
async fn run_respects_rate_limit() {
    const RPM: u32 = 2;
    let clock = Arc::new(Stopwatch::default());
    let mut orch = Orchestrator::new(
        Arc::new(world(&["a", "b", "c", "d"], 2, 2)),
        gateway(clock.clone(), RPM),
        TurnBasedStrategy::default(),
    )
    .unwrap();

    let report = orch.run_simulation(CancelToken::new()).await;
    assert!(report.is_completed());

    let done = clock.0.lock().unwrap().clone();
    assert_eq!(done.len(), 8);
    for (i, start) in done.iter().enumerate() {
        let in_window = done[i..]
            .iter()
            .take_while(|t| **t - *start < Duration::from_secs(60))
            .count();
        assert!(in_window <= RPM as usize);
    }
}

