//! End-to-end integration tests for the Forgepilot orchestration runtime.
//!
//! These tests exercise the full pipeline from task to repository mutation:
//! context assembly, prompt optimization, decision parsing, and idempotent
//! action execution against an in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use forgepilot_agent::{Orchestrator, PromptOptimizer};
use forgepilot_config::AppConfig;
use forgepilot_core::error::{ProviderError, RepoError};
use forgepilot_core::message::Message;
use forgepilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use forgepilot_core::repository::{ChangedFile, IssueState};
use forgepilot_core::retry::RetryPolicy;
use forgepilot_core::run::{FailureKind, RunStatus};
use forgepilot_core::task::{RepoRef, Task, TaskTarget};
use forgepilot_core::token::estimate_messages_tokens;
use forgepilot_github::InMemoryHost;
use forgepilot_providers::router::ProviderRouter;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<Result<String, ProviderError>>>,
    requests: std::sync::Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn texts(texts: &[String]) -> Self {
        Self::new(texts.iter().cloned().map(Ok).collect())
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let call = requests.len();
        if call >= responses.len() {
            panic!(
                "ScriptedProvider exhausted: call #{}, have {}",
                call,
                responses.len()
            );
        }
        let model = request.model.clone();
        requests.push(request);
        responses[call].clone().map(|text| ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }
}

// ── Decision builders ────────────────────────────────────────────────────

fn decision(json: &str) -> String {
    format!("Reasoning about the repository.\n\n```decision\n{json}\n```")
}

fn complete(summary: &str) -> String {
    decision(&format!(
        r#"{{"version": 1, "type": "complete", "summary": "{summary}"}}"#
    ))
}

fn actions(actions_json: &str) -> String {
    decision(&format!(
        r#"{{"version": 1, "type": "actions", "actions": {actions_json}}}"#
    ))
}

fn need_context(fields: &str) -> String {
    decision(&format!(
        r#"{{"version": 1, "type": "need_context", {fields}, "reason": "need more"}}"#
    ))
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn repo() -> RepoRef {
    RepoRef::new("octo", "demo")
}

fn demo_repository() -> InMemoryHost {
    InMemoryHost::new(repo(), "main")
        .with_file(
            "src/parser.rs",
            "pub fn parse(input: &str) -> Vec<&str> {\n    input.split(',').collect()\n}\n",
        )
        .with_file("src/lib.rs", "pub mod parser;\n")
        .with_file("README.md", "# demo\n")
        .with_file("assets/logo.png", "not really a png")
        .with_issue(
            3,
            "Parser returns one empty field for empty input",
            "parse(\"\") returns [\"\"] instead of [].",
        )
}

fn orchestrator(provider: Arc<ScriptedProvider>, host: Arc<InMemoryHost>) -> Orchestrator {
    Orchestrator::new(provider, host, &AppConfig::default())
}

fn fix_script() -> Vec<String> {
    vec![
        need_context(r#""paths": ["src/parser.rs"]"#),
        actions(
            r#"[
                {"kind": "open_pull_request", "title": "Return no fields for empty input",
                 "body": "Fixes #3", "head": "fix-empty-input",
                 "changes": [{"path": "src/parser.rs", "content": "pub fn parse(input: &str) -> Vec<&str> {\n    if input.is_empty() {\n        return Vec::new();\n    }\n    input.split(',').collect()\n}\n"}]},
                {"kind": "comment_on_issue", "number": 3, "body": "Opened a fix."}
            ]"#,
        ),
        complete("Opened a pull request fixing #3."),
    ]
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_issue_to_pull_request() {
    let host = Arc::new(demo_repository());
    let provider = Arc::new(ScriptedProvider::texts(&fix_script()));
    let task = Task::new(
        "Please fix the parser bug described in the issue, thanks!",
        TaskTarget::new(repo()).with_issue(3),
    )
    .unwrap();

    let outcome = orchestrator(provider.clone(), host.clone())
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.turns, 3);
    assert_eq!(outcome.actions.len(), 2);

    let pulls = host.pull_requests();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].head, "fix-empty-input");
    assert_eq!(pulls[0].base, "main");
    assert!(
        host.file_on("fix-empty-input", "src/parser.rs")
            .unwrap()
            .contains("is_empty()")
    );
    // The default branch is untouched.
    assert!(!host.file_on("main", "src/parser.rs").unwrap().contains("is_empty()"));
    assert_eq!(host.comments_on(3).len(), 1);

    // Filler is stripped and the task kind is inferred.
    let first = &provider.requests()[0];
    assert!(first.messages[1].content.starts_with("TASK:\nfix the parser bug"));
    assert!(first.messages[1].content.contains("GUIDELINES (debugging)"));
    // Binary files never reach the prompt.
    assert!(!first.messages[1].content.contains("logo.png"));
}

#[tokio::test]
async fn e2e_rerun_is_idempotent() {
    let host = Arc::new(demo_repository());
    let task = || {
        Task::new("Fix the parser bug", TaskTarget::new(repo()).with_issue(3)).unwrap()
    };

    let first = orchestrator(Arc::new(ScriptedProvider::texts(&fix_script())), host.clone())
        .run(task(), CancellationToken::new())
        .await;
    assert_eq!(first.status, RunStatus::Succeeded);
    let writes_after_first = host.write_count();

    let second = orchestrator(Arc::new(ScriptedProvider::texts(&fix_script())), host.clone())
        .run(task(), CancellationToken::new())
        .await;
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(host.write_count(), writes_after_first);
    assert!(second.actions.iter().all(|a| a.result.is_noop()));
    assert_eq!(host.pull_requests().len(), 1);
    assert_eq!(host.comments_on(3).len(), 1);
}

#[tokio::test]
async fn e2e_review_with_existing_lgtm_writes_nothing() {
    let host = Arc::new(
        InMemoryHost::new(repo(), "main")
            .with_file("src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 { a + b }\n")
            .with_pull_request(
                7,
                "Add add()",
                "feature/add",
                vec![ChangedFile {
                    path: "src/lib.rs".into(),
                    status: "added".into(),
                    patch: Some("+pub fn add(a: i32, b: i32) -> i32 { a + b }".into()),
                }],
            )
            .with_comment(7, "forgepilot", "LGTM"),
    );
    let provider = Arc::new(ScriptedProvider::texts(&[
        actions(r#"[{"kind": "comment_on_pull_request", "number": 7, "body": "LGTM"}]"#),
        complete("Reviewed."),
    ]));
    let task = Task::new("Review PR #7", TaskTarget::new(repo()).with_pull_request(7)).unwrap();

    let outcome = orchestrator(provider.clone(), host.clone())
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(host.write_count(), 0);
    assert!(outcome.actions[0].result.is_noop());

    // The diff is part of the first prompt.
    let user = &provider.requests()[0].messages[1].content;
    assert!(user.contains("### [diff] #7 src/lib.rs"));
    assert!(user.contains("GUIDELINES (code review)"));
}

#[tokio::test]
async fn e2e_triage_creates_and_labels_once() {
    let host = Arc::new(demo_repository());
    let script = vec![
        actions(
            r#"[
                {"kind": "create_issue", "title": "Document parser edge cases", "body": "Empty input, trailing commas."},
                {"kind": "add_labels", "number": 3, "labels": ["bug", "parser"]},
                {"kind": "add_labels", "number": 3, "labels": ["bug"]}
            ]"#,
        ),
        complete("Triaged."),
    ];
    let provider = Arc::new(ScriptedProvider::texts(&script));
    let task = Task::new("Triage issue 3", TaskTarget::new(repo()).with_issue(3)).unwrap();

    let outcome = orchestrator(provider, host.clone())
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    let issue = host.issue_snapshot(3).unwrap();
    assert_eq!(issue.state, IssueState::Open);
    assert_eq!(issue.labels, vec!["bug".to_string(), "parser".to_string()]);
    assert_eq!(
        outcome.action_summaries(),
        vec![
            "create issue \"Document parser edge cases\"".to_string(),
            "label #3 with bug, parser".to_string(),
            "label #3 with bug (already applied)".to_string(),
        ]
    );
}

#[tokio::test]
async fn e2e_context_request_for_other_issue() {
    let host = Arc::new(
        demo_repository().with_issue(9, "Parser is slow on long lines", "Takes seconds on 1MB input."),
    );
    let provider = Arc::new(ScriptedProvider::texts(&[
        need_context(r#""issues": [9]"#),
        complete("Both issues share a root cause."),
    ]));
    let task = Task::new("Compare related issues", TaskTarget::new(repo()).with_issue(3)).unwrap();

    let outcome = orchestrator(provider.clone(), host)
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    let requests = provider.requests();
    assert!(!requests[0].messages[1].content.contains("#9 Parser is slow"));
    assert!(requests[1].messages[1].content.contains("### [issue] #9 Parser is slow"));
}

#[tokio::test(start_paused = true)]
async fn e2e_transient_failures_recover() {
    let host = Arc::new(demo_repository());
    host.fail_next_writes(vec![
        RepoError::RateLimited { retry_after_secs: 5 },
        RepoError::Server { status: 502 },
    ]);
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::Network("connection reset".into())),
        Ok(actions(r#"[{"kind": "comment_on_issue", "number": 3, "body": "Looking into it."}]"#)),
        Ok(complete("Acknowledged.")),
    ]));
    let task = Task::new("Acknowledge issue 3", TaskTarget::new(repo()).with_issue(3)).unwrap();

    let outcome = orchestrator(provider.clone(), host.clone())
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        })
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(provider.calls(), 3);
    assert_eq!(host.comments_on(3).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_persistent_write_failure_fails_run() {
    let host = Arc::new(demo_repository());
    host.fail_next_writes(vec![
        RepoError::Server { status: 503 },
        RepoError::Server { status: 503 },
        RepoError::Server { status: 503 },
    ]);
    let provider = Arc::new(ScriptedProvider::texts(&[actions(
        r#"[{"kind": "comment_on_issue", "number": 3, "body": "Looking into it."}]"#,
    )]));
    let task = Task::new("Acknowledge issue 3", TaskTarget::new(repo()).with_issue(3)).unwrap();

    let outcome = orchestrator(provider, host.clone())
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::ActionTransient));
    assert!(host.comments_on(3).is_empty());
}

#[tokio::test]
async fn e2e_tight_budget_still_bounds_every_prompt() {
    let mut config: AppConfig = toml::from_str(
        r#"
        [agent]
        context_budget_tokens = 1200
        task_floor_tokens = 64
        max_turns = 4
        "#,
    )
    .unwrap();
    config.api_key = Some("unused".into());

    let mut host = demo_repository();
    for i in 0..20 {
        host = host.with_file(format!("src/gen/mod{i}.rs"), "// generated parser table\n".repeat(30));
    }
    let provider = Arc::new(ScriptedProvider::texts(&[
        need_context(r#""paths": ["src/gen/mod3.rs", "src/gen/mod4.rs"]"#),
        need_context(r#""paths": ["src/parser.rs"]"#),
        complete("done"),
    ]));
    let long_task = "Investigate how the parser tables are generated and used. ".repeat(40);
    let task = Task::new(long_task, TaskTarget::new(repo()).with_issue(3)).unwrap();

    let outcome = Orchestrator::new(provider.clone(), Arc::new(host), &config)
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    for request in provider.requests() {
        assert!(estimate_messages_tokens(&request.messages) <= 1200);
    }
}

#[tokio::test]
async fn e2e_budget_too_small_for_task_floor() {
    let mut config = AppConfig::default();
    config.agent.context_budget_tokens = 300;
    config.agent.task_floor_tokens = 256;
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let task = Task::new(
        "Refactor the parser module. ".repeat(100),
        TaskTarget::new(repo()),
    )
    .unwrap();

    let outcome = Orchestrator::new(provider.clone(), Arc::new(demo_repository()), &config)
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::BudgetExceeded));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn e2e_router_dispatches_to_registered_provider() {
    let scripted = Arc::new(ScriptedProvider::texts(&[complete("ok")]));
    let mut router = ProviderRouter::new("scripted");
    router.register("scripted", scripted.clone());
    let provider = router.default().unwrap();

    let task = Task::new("Check issue 3", TaskTarget::new(repo()).with_issue(3)).unwrap();
    let outcome = Orchestrator::new(provider, Arc::new(demo_repository()), &AppConfig::default())
        .run(task, CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(scripted.calls(), 1);
}

#[tokio::test]
async fn e2e_concurrent_runs_share_one_host() {
    let host = Arc::new(demo_repository());
    let provider = Arc::new(ScriptedProvider::texts(&[
        actions(r#"[{"kind": "comment_on_issue", "number": 3, "body": "Tracking."}]"#),
        actions(r#"[{"kind": "comment_on_issue", "number": 3, "body": "Tracking."}]"#),
        complete("done"),
        complete("done"),
    ]));
    let orchestrator = orchestrator(provider.clone(), host.clone());

    let runs = (0..2).map(|i| {
        let task = Task::new(format!("Acknowledge issue 3 ({i})"), TaskTarget::new(repo()).with_issue(3))
            .unwrap();
        orchestrator.run(task, CancellationToken::new())
    });
    let outcomes = futures::future::join_all(runs).await;

    assert!(outcomes.iter().all(|o| o.status == RunStatus::Succeeded));
    assert_ne!(outcomes[0].task_id, outcomes[1].task_id);
    assert_eq!(provider.calls(), 4);
}

#[test]
fn e2e_config_file_drives_run_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        default_provider = "openai"
        default_temperature = 0.2

        [providers.openai]
        default_model = "gpt-4o-mini"

        [agent]
        max_turns = 6
        context_budget_tokens = 4000
        "#,
    )
    .unwrap();

    let config = AppConfig::load_from(&path).unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orchestrator = Orchestrator::new(provider, Arc::new(demo_repository()), &config);
    let settings = orchestrator.settings();
    assert_eq!(settings.model, "gpt-4o-mini");
    assert_eq!(settings.max_turns, 6);
    assert!((settings.temperature - 0.2).abs() < f32::EPSILON);

    let optimizer = PromptOptimizer::new((&config.agent).into());
    assert_eq!(optimizer.settings().budget, 4000);
}
