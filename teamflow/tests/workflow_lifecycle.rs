//! Run-level tests driving `WorkflowEngine::run` against scripted fakes.
//!
//! Each test scripts the oracle per task (route, analyze, strategize) and the
//! sandbox per call, collects the full event stream, and checks the event
//! ordering contract alongside scenario-specific expectations.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use teamflow::core::completion::STRATEGY_EXISTS_REASONING;
use teamflow::core::events::{RunEvent, check_event_sequence};
use teamflow::core::types::{Destination, STRATEGY_TAG, Strategy, WorkerId};
use teamflow::engine::{RunRequest, WorkflowEngine};
use teamflow::error::{EngineError, OracleError, SandboxError};
use teamflow::io::config::EngineConfig;
use teamflow::io::oracle::OracleTask;
use teamflow::io::sandbox::ProcessSandbox;
use teamflow::test_support::{ScriptedOracle, ScriptedSandbox, analysis, route, strategy};

struct Harness {
    oracle: Arc<ScriptedOracle>,
    sandbox: Arc<ScriptedSandbox>,
    engine: WorkflowEngine,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let oracle = Arc::new(ScriptedOracle::new());
        let sandbox = Arc::new(ScriptedSandbox::new());
        let engine =
            WorkflowEngine::new(config, oracle.clone(), sandbox.clone()).expect("engine");
        Self {
            oracle,
            sandbox,
            engine,
        }
    }

    async fn run(&self, request: RunRequest) -> Vec<RunEvent> {
        let events: Vec<RunEvent> = self
            .engine
            .run(request, CancellationToken::new())
            .expect("valid request")
            .collect()
            .await;
        let violations = check_event_sequence(&events);
        assert!(violations.is_empty(), "event order violated: {violations:?}");
        events
    }
}

fn decisions(events: &[RunEvent]) -> Vec<Destination> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Decision { decision, .. } => Some(*decision),
            _ => None,
        })
        .collect()
}

fn action_output(events: &[RunEvent], worker: WorkerId) -> &str {
    events
        .iter()
        .find_map(|event| match event {
            RunEvent::Action { agent, output } if *agent == worker => Some(output.as_str()),
            _ => None,
        })
        .expect("worker action")
}

fn terminal(events: &[RunEvent]) -> &RunEvent {
    events.last().expect("terminal event")
}

/// Analyst then strategist, then the completion guard finishes the run.
///
/// Verifies the full happy path: decision/action pairing, the tool result in
/// the analyst output, rating-ordered strategy actions, and `finish` carrying
/// the strategist's output.
#[tokio::test]
async fn revenue_question_runs_analyst_then_strategist() {
    let h = Harness::new();
    h.oracle
        .push_ok(OracleTask::Route, route("Data_Analyst", "Need Q1 and Q2 figures first."))
        .push_ok(
            OracleTask::Analyze,
            analysis(
                "Q2 revenue grew 25% over Q1.",
                Some("import pandas as pd\nq = pd.Series([1.2, 1.5])\nprint(q.pct_change().iloc[-1])"),
            ),
        )
        .push_ok(
            OracleTask::Route,
            route("Business_Strategist", "Analysis is done; recommendations next."),
        )
        .push_ok(
            OracleTask::Strategize,
            strategy(
                &[
                    ("Hire two account executives", 6, "Pipeline is growing."),
                    ("Double down on Q2 channels", 9, "They drove the growth."),
                ],
                "Invest where Q2 growth came from.",
            ),
        );
    h.sandbox.push_ok("0.25\n");

    let events = h
        .run(RunRequest::new("Analyze Q1 and Q2 revenue").with_max_iterations(10).with_message_window(8))
        .await;

    assert_eq!(
        decisions(&events),
        vec![
            Destination::DataAnalyst,
            Destination::BusinessStrategist,
            Destination::Finish
        ]
    );
    assert!(matches!(events[0], RunEvent::Start { .. }));

    let analysis_output = action_output(&events, WorkerId::DataAnalyst);
    assert!(analysis_output.starts_with("ANALYSIS: Q2 revenue grew 25% over Q1."));
    assert!(analysis_output.ends_with("Result:\n0.25"));
    assert_eq!(h.sandbox.executed().len(), 1);

    let strategy_output = action_output(&events, WorkerId::BusinessStrategist);
    let json = strategy_output
        .strip_prefix(STRATEGY_TAG)
        .expect("strategy tag")
        .trim();
    let parsed: Strategy = serde_json::from_str(json).expect("strategy json");
    let ratings: Vec<u8> = parsed.actions.iter().map(|a| a.rating).collect();
    assert_eq!(ratings, vec![9, 6]);

    assert_eq!(
        terminal(&events),
        &RunEvent::Finish {
            data: strategy_output.to_string()
        }
    );
    // The final Finish came from the completion guard, not the oracle.
    assert_eq!(h.oracle.request_count(OracleTask::Route), 2);
}

/// An oracle that always picks the analyst is stopped by the iteration bound.
#[tokio::test]
async fn adversarial_router_is_stopped_by_iteration_bound() {
    let h = Harness::new();
    h.oracle
        .always(OracleTask::Route, route("Data_Analyst", "Look again."))
        .always(OracleTask::Analyze, analysis("Still looking.", None));

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue").with_max_iterations(3)).await;

    assert_eq!(decisions(&events), vec![Destination::DataAnalyst; 3]);
    let RunEvent::Finish { data } = terminal(&events) else {
        panic!("expected finish, got {:?}", terminal(&events));
    };
    assert_eq!(data, "[bound reached] ANALYSIS: Still looking.");
}

/// With a bound of one, the first decision is the only one.
#[tokio::test]
async fn single_iteration_forces_finish_after_first_decision() {
    let h = Harness::new();
    h.oracle
        .push_ok(OracleTask::Route, route("Data_Analyst", "Numbers first."))
        .push_ok(OracleTask::Analyze, analysis("Revenue is flat.", None));

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue").with_max_iterations(1)).await;

    assert_eq!(events.len(), 4);
    assert_eq!(decisions(&events), vec![Destination::DataAnalyst]);
    assert_eq!(
        terminal(&events),
        &RunEvent::finish("[bound reached] ANALYSIS: Revenue is flat.")
    );
}

/// Out-of-set labels are malformed output: retried, then fatal. Never coerced.
#[tokio::test]
async fn unknown_destination_is_malformed_and_fatal() {
    let h = Harness::new();
    h.oracle.always(
        OracleTask::Route,
        json!({"next": "Visualizer", "reasoning": "Charts would help."}),
    );

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue")).await;

    assert_eq!(events.len(), 2);
    let RunEvent::Error { error } = terminal(&events) else {
        panic!("expected error");
    };
    assert!(error.starts_with("oracle returned malformed output after 3 attempt(s)"), "{error}");
    // One attempt plus the default two malformed retries.
    assert_eq!(h.oracle.request_count(OracleTask::Route), 3);
}

/// A malformed answer followed by a valid one recovers without surfacing an error.
#[tokio::test]
async fn malformed_output_recovers_on_retry() {
    let h = Harness::new();
    h.oracle
        .push(OracleTask::Route, Err(OracleError::Malformed("not json".to_string())))
        .push_ok(OracleTask::Route, route("FINISH", "Nothing to analyze."));

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue")).await;

    assert_eq!(decisions(&events), vec![Destination::Finish]);
    assert_eq!(
        terminal(&events),
        &RunEvent::finish("Not enough information to produce a result.")
    );
}

/// Transport failures back off and become fatal once retries are exhausted.
#[tokio::test(start_paused = true)]
async fn oracle_transport_failure_is_fatal_after_retries() {
    let h = Harness::new();
    for _ in 0..4 {
        h.oracle.push(
            OracleTask::Route,
            Err(OracleError::Transport("connection reset".to_string())),
        );
    }

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue")).await;

    assert_eq!(
        terminal(&events),
        &RunEvent::error("oracle unavailable after 4 attempt(s): connection reset")
    );
}

/// Denied code is reported in the analyst output and the run continues.
#[tokio::test]
async fn validator_denial_is_folded_into_output() {
    let h = Harness::new();
    h.oracle
        .push_ok(OracleTask::Route, route("Data_Analyst", "Need data."))
        .push_ok(
            OracleTask::Analyze,
            analysis("Listing data files.", Some("import os\nprint(os.listdir('.'))")),
        )
        .push_ok(OracleTask::Route, route("Finish", "Cannot proceed further."));

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue")).await;

    let output = action_output(&events, WorkerId::DataAnalyst);
    assert!(output.contains("Code rejected by safety check: import of denied module 'os'"));
    assert!(h.sandbox.executed().is_empty());
    assert!(matches!(terminal(&events), RunEvent::Finish { .. }));
}

/// Code that fails at runtime is reported and the run continues.
#[tokio::test]
async fn execution_failure_is_folded_into_output() {
    let h = Harness::new();
    h.oracle
        .push_ok(OracleTask::Route, route("Data_Analyst", "Need data."))
        .push_ok(OracleTask::Analyze, analysis("Computing ratio.", Some("print(1 / 0)")))
        .push_ok(OracleTask::Route, route("Finish", "Done."));
    h.sandbox.push(Err(SandboxError::Execution(
        "ZeroDivisionError: division by zero".to_string(),
    )));

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue")).await;

    let output = action_output(&events, WorkerId::DataAnalyst);
    assert!(output.ends_with("Execution failed: ZeroDivisionError: division by zero"));
    assert_eq!(
        terminal(&events),
        &RunEvent::finish(output.to_string())
    );
}

/// Every consultation sees at most `message_window` messages, oldest first.
#[tokio::test]
async fn oracle_context_respects_message_window() {
    let h = Harness::new();
    h.oracle
        .always(OracleTask::Route, route("Data_Analyst", "Again."))
        .always(OracleTask::Analyze, analysis("Partial result.", None));

    h.run(RunRequest::new("Analyze Q1 and Q2 revenue").with_max_iterations(5).with_message_window(2))
        .await;

    let requests = h.oracle.requests();
    assert_eq!(requests.len(), 10);
    for request in &requests {
        assert!(request.context.len() <= 2);
        let indices: Vec<u64> = request.context.iter().map(|m| m.sequence_index).collect();
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
    }
    // The last request sees the two newest messages only.
    let last = requests.last().expect("request");
    assert_eq!(last.context.first().map(|m| m.sequence_index), Some(8));
}

/// A repeat strategist dispatch is turned into Finish once a strategy exists.
#[tokio::test]
async fn repeat_strategist_is_replaced_by_finish() {
    let h = Harness::new();
    h.oracle
        .push_ok(OracleTask::Route, route("Business_Strategist", "Recommend directly."))
        .push_ok(
            OracleTask::Strategize,
            strategy(&[("Cut discounting", 7, "Margins are thin.")], "Protect margin."),
        )
        .push_ok(OracleTask::Route, route("Business_Strategist", "Refine it."));

    let events = h.run(RunRequest::new("How do we improve profit margins?")).await;

    assert_eq!(
        decisions(&events),
        vec![Destination::BusinessStrategist, Destination::Finish]
    );
    assert!(events.contains(&RunEvent::decision(
        Destination::Finish,
        STRATEGY_EXISTS_REASONING
    )));
    assert_eq!(h.oracle.request_count(OracleTask::Strategize), 1);
}

/// With guards off, the oracle decides when to finish.
#[tokio::test]
async fn disabled_guards_defer_to_oracle() {
    let mut config = EngineConfig::default();
    config.supervisor.completion_guards = false;
    let h = Harness::with_config(config);
    h.oracle
        .push_ok(OracleTask::Route, route("Data_Analyst", "Numbers."))
        .push_ok(OracleTask::Analyze, analysis("Revenue up.", None))
        .push_ok(OracleTask::Route, route("Business_Strategist", "Plan."))
        .push_ok(
            OracleTask::Strategize,
            strategy(&[("Expand", 8, "Growth.")], "Grow."),
        )
        .push_ok(OracleTask::Route, route("Finish", "Oracle says done."));

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue")).await;

    assert!(events.contains(&RunEvent::decision(Destination::Finish, "Oracle says done.")));
    assert_eq!(h.oracle.request_count(OracleTask::Route), 3);
}

/// A destination outside the configured set is fatal, with no fallback.
#[tokio::test]
async fn disabled_destination_is_rejected() {
    let mut config = EngineConfig::default();
    config.run.destinations = vec![Destination::DataAnalyst, Destination::Finish];
    let h = Harness::with_config(config);
    h.oracle
        .push_ok(OracleTask::Route, route("Business_Strategist", "Skip analysis."));

    let events = h.run(RunRequest::new("Analyze Q1 and Q2 revenue")).await;

    assert_eq!(events.len(), 2);
    assert_eq!(
        terminal(&events),
        &RunEvent::error(
            EngineError::InvalidDecision {
                destination: Destination::BusinessStrategist
            }
            .to_string()
        )
    );
}

/// Cancelling before the first poll yields start then the cancellation error.
#[tokio::test]
async fn cancelled_run_reports_cancellation() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let events: Vec<RunEvent> = h
        .engine
        .run(RunRequest::new("Analyze Q1 and Q2 revenue"), cancel)
        .expect("valid")
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            RunEvent::start("Analyze Q1 and Q2 revenue"),
            RunEvent::error("run cancelled")
        ]
    );
    assert!(h.oracle.requests().is_empty());
}

/// Cancellation interrupts an in-flight oracle call.
#[tokio::test]
async fn cancellation_interrupts_hanging_oracle() {
    let h = Harness::new();
    h.oracle.hang(OracleTask::Route);
    let cancel = CancellationToken::new();
    let stream = h
        .engine
        .run(RunRequest::new("Analyze Q1 and Q2 revenue"), cancel.clone())
        .expect("valid");
    let collector = tokio::spawn(stream.collect::<Vec<RunEvent>>());

    cancel.cancel();
    let events = collector.await.expect("join");

    assert_eq!(events.len(), 2);
    assert_eq!(terminal(&events), &RunEvent::error("run cancelled"));
}

/// Cancelling while analysis code runs stops the interpreter process too.
#[tokio::test]
async fn cancellation_kills_running_analysis_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("still-running");
    let mut config = EngineConfig::default();
    config.sandbox.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("cat > /dev/null; sleep 2; touch '{}'", marker.display()),
    ];
    let sandbox = Arc::new(ProcessSandbox::new(&config.sandbox));
    let oracle = Arc::new(ScriptedOracle::new());
    oracle
        .push_ok(OracleTask::Route, route("Data_Analyst", "Need numbers."))
        .push_ok(OracleTask::Analyze, analysis("Summing revenue.", Some("print(1.2 + 1.5)")));
    let engine = WorkflowEngine::new(config, oracle, sandbox).expect("engine");

    let cancel = CancellationToken::new();
    let stream = engine
        .run(RunRequest::new("Analyze Q1 and Q2 revenue"), cancel.clone())
        .expect("valid");
    let collector = tokio::spawn(stream.collect::<Vec<RunEvent>>());
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    let events = collector.await.expect("join");

    assert_eq!(
        events,
        vec![
            RunEvent::start("Analyze Q1 and Q2 revenue"),
            RunEvent::decision(Destination::DataAnalyst, "Need numbers."),
            RunEvent::error("run cancelled"),
        ]
    );
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(!marker.exists(), "analysis code kept running after cancellation");
}

/// Request validation fails before any event is produced.
#[tokio::test]
async fn invalid_request_is_rejected_before_streaming() {
    let h = Harness::new();
    let result = h
        .engine
        .run(RunRequest::new("").with_max_iterations(3), CancellationToken::new());
    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));

    let result = h.engine.run(
        RunRequest::new("Analyze Q1 and Q2 revenue").with_message_window(0),
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
}

/// Clones of one engine run independently and concurrently.
#[tokio::test]
async fn concurrent_runs_are_independent() {
    let h = Harness::new();
    h.oracle
        .always(OracleTask::Route, route("Data_Analyst", "Again."))
        .always(OracleTask::Analyze, analysis("Partial.", None));

    let first = h.engine.clone();
    let second = h.engine.clone();
    let (a, b) = tokio::join!(
        async move {
            first
                .run(RunRequest::new("Analyze Q1 revenue").with_max_iterations(2), CancellationToken::new())
                .expect("valid")
                .collect::<Vec<_>>()
                .await
        },
        async move {
            second
                .run(RunRequest::new("Analyze Q2 revenue").with_max_iterations(4), CancellationToken::new())
                .expect("valid")
                .collect::<Vec<_>>()
                .await
        },
    );

    assert_eq!(decisions(&a).len(), 2);
    assert_eq!(decisions(&b).len(), 4);
    assert!(check_event_sequence(&a).is_empty());
    assert!(check_event_sequence(&b).is_empty());
}
