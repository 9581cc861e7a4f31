use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sleuth_core::{
    event_channel, AgentError, AgentEvent, EventReceiver, Role, SessionStore, SessionStoreConfig,
    StepStatus, Tool, ToolError, ToolInput, ToolKind, ToolRegistry,
};
use sleuth_llm::ScriptedLlm;
use sleuth_loop::{AnalysisRequest, Orchestrator, OrchestratorConfig, RunOutcome};

const PLAN_CONFIG: &str = r#"{"steps": [{"action": "search code", "target": "config.json"}]}"#;
const RESULT_JSON: &str =
    r#"{"root_cause": "config.json is not shipped", "suggestions": ["add it"], "confidence": 0.8}"#;

struct FixedTool {
    kind: ToolKind,
    outcome: Result<String, ToolError>,
}

#[async_trait]
impl Tool for FixedTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn description(&self) -> &str {
        "fixed"
    }

    async fn invoke(&self, _input: &ToolInput, _cancel: &CancellationToken) -> Result<String, ToolError> {
        self.outcome.clone()
    }
}

/// Never finishes on its own.
struct StuckTool;

#[async_trait]
impl Tool for StuckTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CodeSearch
    }

    fn description(&self) -> &str {
        "stuck"
    }

    async fn invoke(&self, _input: &ToolInput, _cancel: &CancellationToken) -> Result<String, ToolError> {
        std::future::pending().await
    }
}

fn code_hit() -> FixedTool {
    FixedTool {
        kind: ToolKind::CodeSearch,
        outcome: Ok("Found 1 match(es) for 'config.json':\n\n1. src/load.py:3: open('config.json')".to_string()),
    }
}

fn orchestrator(llm: ScriptedLlm, tools: Vec<FixedTool>, config: OrchestratorConfig) -> Orchestrator {
    let registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Orchestrator::new(
        Arc::new(llm),
        Arc::new(registry),
        Arc::new(SessionStore::new(SessionStoreConfig::default())),
        config,
    )
}

async fn drain(mut rx: EventReceiver) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn names(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(AgentEvent::event_name).collect()
}

async fn start(orchestrator: &Orchestrator, input: &str) -> (Result<RunOutcome, AgentError>, Vec<AgentEvent>) {
    let (sink, rx) = event_channel(128, CancellationToken::new());
    let outcome = orchestrator
        .run("test-run", AnalysisRequest::new(input), sink)
        .await;
    (outcome, drain(rx).await)
}

#[tokio::test]
async fn successful_search_ends_with_result_and_done() {
    let llm = ScriptedLlm::new([
        PLAN_CONFIG,
        r#"{"action": "synthesize", "reasoning": "The loader opens a file that is not deployed."}"#,
        RESULT_JSON,
    ]);
    let orchestrator = orchestrator(llm, vec![code_hit()], OrchestratorConfig::default());

    let (outcome, events) = start(&orchestrator, "FileNotFoundError: config.json").await;

    assert_eq!(
        names(&events),
        vec![
            "progress",
            "plan",
            "progress",
            "step_execution",
            "result",
            "done"
        ]
    );
    match &events[3] {
        AgentEvent::StepExecution { status, result, .. } => {
            assert_eq!(*status, StepStatus::Completed);
            assert!(result.as_deref().unwrap_or_default().contains("src/load.py:3"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    let Ok(RunOutcome::Completed(result)) = outcome else {
        panic!("run did not complete");
    };
    assert!((0.0..=1.0).contains(&result.confidence));
    assert_eq!(result.root_cause, "config.json is not shipped");
}

#[tokio::test]
async fn failed_step_goes_straight_to_result() {
    let llm = ScriptedLlm::new([
        PLAN_CONFIG,
        r#"{"action": "synthesize", "reasoning": "The repository could not be searched, concluding."}"#,
        r#"{"root_cause": "unknown", "confidence": 0.9}"#,
    ]);
    let tool = FixedTool {
        kind: ToolKind::CodeSearch,
        outcome: Err(ToolError::Execution("repository not reachable".to_string())),
    };
    let orchestrator = orchestrator(llm, vec![tool], OrchestratorConfig::default());

    let (outcome, events) = start(&orchestrator, "FileNotFoundError: config.json").await;

    let failed_at = events
        .iter()
        .position(|event| {
            matches!(
                event,
                AgentEvent::StepExecution {
                    status: StepStatus::Failed,
                    ..
                }
            )
        })
        .expect("failed step_execution");
    assert_eq!(names(&events[failed_at + 1..]), vec!["result", "done"]);
    if let AgentEvent::StepExecution { error, .. } = &events[failed_at] {
        assert!(error.as_deref().unwrap_or_default().contains("repository not reachable"));
    }

    let Ok(RunOutcome::Completed(result)) = outcome else {
        panic!("run did not complete");
    };
    assert!(result.confidence <= 0.3);
}

#[tokio::test]
async fn request_input_suspends_and_resumes_once() {
    let llm = ScriptedLlm::new([
        PLAN_CONFIG,
        r#"{"action": "request_input", "reasoning": "Several services ship a config.json.", "question": "Which project?", "context": "two candidates"}"#,
        r#"{"action": "continue", "reasoning": "Check the service logs.", "next_steps": [{"action": "search logs", "target": "my-service"}]}"#,
        r#"{"action": "synthesize"}"#,
        RESULT_JSON,
    ]);
    let log_hit = FixedTool {
        kind: ToolKind::LogSearch,
        outcome: Ok("Found 1 matching line(s) in 1 file(s):\nERROR config.json missing".to_string()),
    };
    let orchestrator = orchestrator(llm, vec![code_hit(), log_hit], OrchestratorConfig::default());

    let (outcome, events) = start(&orchestrator, "FileNotFoundError: config.json").await;
    let Ok(RunOutcome::Suspended { request_id, question }) = outcome else {
        panic!("run did not suspend");
    };
    assert_eq!(question, "Which project?");
    match events.last() {
        Some(AgentEvent::UserInputRequest {
            request_id: id,
            question,
            context,
        }) => {
            assert_eq!(id, &request_id);
            assert_eq!(question, "Which project?");
            assert_eq!(context, "two candidates");
        }
        other => panic!("stream should end with user_input_request, got {other:?}"),
    }

    let pending = orchestrator
        .sessions()
        .get(&request_id)
        .expect("session stored");
    assert_eq!(pending.state.suspension_id.as_deref(), Some(request_id.as_str()));

    let state = orchestrator.take_suspended(&request_id).expect("first resume");
    let (sink, rx) = event_channel(128, CancellationToken::new());
    let outcome = orchestrator
        .resume("test-run", state, "my-service", sink)
        .await;
    let events = drain(rx).await;

    assert!(matches!(outcome, Ok(RunOutcome::Completed(_))));
    assert_eq!(
        names(&events),
        vec![
            "progress",
            "decision_reasoning",
            "plan",
            "progress",
            "step_execution",
            "result",
            "done"
        ]
    );
    match &events[1] {
        AgentEvent::DecisionReasoning {
            after_step,
            before_steps,
            ..
        } => {
            assert_eq!(*after_step, 1);
            assert_eq!(before_steps, &vec![2]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    if let AgentEvent::StepExecution { step, target, .. } = &events[4] {
        assert_eq!(*step, 2);
        assert_eq!(target, "my-service");
    }

    assert!(matches!(
        orchestrator.take_suspended(&request_id),
        Err(AgentError::SessionNotFound(id)) if id == request_id
    ));
}

#[tokio::test]
async fn resumed_decision_sees_the_reply() {
    let llm = Arc::new(ScriptedLlm::new([
        PLAN_CONFIG,
        r#"{"action": "request_input", "question": "Which project?"}"#,
        r#"{"action": "synthesize"}"#,
        RESULT_JSON,
    ]));
    let registry = ToolRegistry::new();
    registry.register(code_hit());
    let orchestrator = Orchestrator::new(
        llm.clone(),
        Arc::new(registry),
        Arc::new(SessionStore::new(SessionStoreConfig::default())),
        OrchestratorConfig::default(),
    );

    let (outcome, _) = start(&orchestrator, "FileNotFoundError: config.json").await;
    let Ok(RunOutcome::Suspended { request_id, .. }) = outcome else {
        panic!("run did not suspend");
    };
    let state = orchestrator.take_suspended(&request_id).expect("resume");
    let (sink, rx) = event_channel(64, CancellationToken::new());
    orchestrator
        .resume("test-run", state, "my-service", sink)
        .await
        .expect("resumed run");
    drain(rx).await;

    let calls = llm.calls();
    let decide_after_reply = &calls[2];
    assert!(decide_after_reply.iter().any(|message| {
        message.role == Role::User && message.content == "User reply to \"Which project?\": my-service"
    }));
}

#[tokio::test]
async fn skip_concludes_without_more_steps() {
    let llm = ScriptedLlm::new([
        PLAN_CONFIG,
        r#"{"action": "request_input", "question": "Which project?"}"#,
        RESULT_JSON,
    ]);
    let orchestrator = orchestrator(llm, vec![code_hit()], OrchestratorConfig::default());

    let (outcome, _) = start(&orchestrator, "FileNotFoundError: config.json").await;
    let Ok(RunOutcome::Suspended { request_id, .. }) = outcome else {
        panic!("run did not suspend");
    };
    let state = orchestrator.take_suspended(&request_id).expect("skip");
    let (sink, rx) = event_channel(64, CancellationToken::new());
    let outcome = orchestrator.skip("test-run", state, sink).await;

    assert!(matches!(outcome, Ok(RunOutcome::Completed(_))));
    assert_eq!(names(&drain(rx).await), vec!["progress", "result", "done"]);
}

#[tokio::test]
async fn iteration_ceiling_forces_synthesis() {
    let llm = ScriptedLlm::from_fn(|messages| {
        let prompt = messages.last().map(|message| message.content.as_str()).unwrap_or_default();
        Ok(if prompt.contains("Decide only the FIRST") {
            PLAN_CONFIG.to_string()
        } else if prompt.contains("Choose what happens next") {
            r#"{"action": "continue", "reasoning": "Look again.", "next_steps": [{"action": "search code", "target": "loader"}]}"#.to_string()
        } else {
            RESULT_JSON.to_string()
        })
    });
    let config = OrchestratorConfig {
        max_iterations: 3,
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(llm, vec![code_hit()], config);

    let (outcome, events) = start(&orchestrator, "FileNotFoundError: config.json").await;
    assert!(matches!(outcome, Ok(RunOutcome::Completed(_))));

    let executed: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::StepExecution { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(executed, vec![1, 2, 3]);
    assert_eq!(names(&events[events.len() - 2..]), vec!["result", "done"]);
    assert!(matches!(events[events.len() - 3], AgentEvent::StepExecution { .. }));

    // Every plan event keeps earlier indices and only adds larger ones.
    let mut seen_max = 0;
    for event in &events {
        if let AgentEvent::Plan { steps } = event {
            let indices: Vec<usize> = steps.iter().map(|step| step.index).collect();
            assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
            let max = indices.last().copied().unwrap_or_default();
            assert!(max > seen_max);
            seen_max = max;
        }
    }
}

#[tokio::test]
async fn llm_failure_ends_the_run() {
    let llm = ScriptedLlm::new(Vec::<String>::new());
    let orchestrator = orchestrator(llm, vec![code_hit()], OrchestratorConfig::default());

    let (outcome, events) = start(&orchestrator, "boom").await;
    assert!(matches!(outcome, Err(AgentError::Llm(_))));
    assert_eq!(names(&events), vec!["progress"]);
}

#[tokio::test]
async fn over_budget_synthesis_is_capped() {
    let llm = ScriptedLlm::new([
        PLAN_CONFIG,
        r#"{"root_cause": "probably config", "confidence": 0.95}"#,
    ]);
    let config = OrchestratorConfig {
        context_char_budget: 50,
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(llm, vec![code_hit()], config);

    let (outcome, events) = start(&orchestrator, "FileNotFoundError: config.json").await;
    let Ok(RunOutcome::Completed(result)) = outcome else {
        panic!("run did not complete");
    };
    assert_eq!(result.root_cause, "probably config");
    assert!(result.confidence <= 0.5);
    assert_eq!(names(&events[events.len() - 2..]), vec!["result", "done"]);
}

#[tokio::test]
async fn over_budget_falls_back_to_local_summary() {
    let llm = ScriptedLlm::new([PLAN_CONFIG]);
    let config = OrchestratorConfig {
        context_char_budget: 50,
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(llm, vec![code_hit()], config);

    let (outcome, _) = start(&orchestrator, "FileNotFoundError: config.json").await;
    let Ok(RunOutcome::Completed(result)) = outcome else {
        panic!("run did not complete");
    };
    assert_eq!(result.confidence, 0.2);
    assert!(result.root_cause.contains("src/load.py:3"));
}

#[tokio::test]
async fn cancellation_stops_a_running_step() {
    let registry = ToolRegistry::new();
    registry.register(StuckTool);
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedLlm::new([PLAN_CONFIG])),
        Arc::new(registry),
        Arc::new(SessionStore::new(SessionStoreConfig::default())),
        OrchestratorConfig::default(),
    );
    let cancel = CancellationToken::new();
    let (sink, mut rx) = event_channel(64, cancel.clone());

    let worker = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run("test-run", AnalysisRequest::new("boom"), sink)
                .await
        })
    };

    // Wait until the step is running, then pull the plug.
    loop {
        match rx.recv().await {
            Some(AgentEvent::Progress { step: Some(1), .. }) => break,
            Some(_) => continue,
            None => panic!("run ended before the step started"),
        }
    }
    cancel.cancel();

    let outcome = worker.await.expect("worker panicked");
    assert_eq!(outcome, Err(AgentError::Cancelled));
    assert!(drain(rx).await.is_empty());
}

#[tokio::test]
async fn cancelled_before_start_emits_nothing() {
    let orchestrator = orchestrator(
        ScriptedLlm::new([PLAN_CONFIG]),
        vec![code_hit()],
        OrchestratorConfig::default(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (sink, rx) = event_channel(8, cancel);

    let outcome = orchestrator
        .run("test-run", AnalysisRequest::new("boom"), sink)
        .await;
    assert_eq!(outcome, Err(AgentError::Cancelled));
    assert!(drain(rx).await.is_empty());
}
