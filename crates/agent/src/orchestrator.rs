//! The orchestration loop: one run of one task, start to terminal state.
//!
//! Each turn assembles context, builds a budget-bounded prompt, calls the
//! model, and acts on the decision it returns:
//!
//! ```text
//! Started -> AssemblingContext -> AwaitingModel -> InterpretingResponse
//!         -> ExecutingActions -> Continuing -> (next turn)
//!                                           \-> Succeeded | Failed | Aborted
//! ```
//!
//! Cancellation is checked at every transition and inside every retry loop;
//! a call already in flight completes, but no retry, backoff or later turn
//! runs after it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use forgepilot_config::AppConfig;
use forgepilot_core::action::{Action, ExecutionOutcome, ExecutionResult};
use forgepilot_core::decision::{ContextRequest, Decision, ModelResponse};
use forgepilot_core::error::{Error, Result};
use forgepilot_core::event::{DomainEvent, EventBus};
use forgepilot_core::prompt::Prompt;
use forgepilot_core::provider::{Provider, ProviderRequest};
use forgepilot_core::repository::RepositoryHost;
use forgepilot_core::retry::{RetryPolicy, sleep_unless_cancelled};
use forgepilot_core::run::{
    ActionRecord, FailureReason, RunOutcome, RunPhase, RunState, RunStatus, TurnRecord,
};
use forgepilot_core::task::Task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{AssemblerSettings, CompositeScorer, ContextAssembler, RelevanceScorer};
use crate::decision::interpret;
use crate::executor::ActionExecutor;
use crate::prompt::{OptimizerSettings, PromptOptimizer};

/// Per-run limits and model parameters.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_turns: u32,
    pub max_parse_failures: u32,
    pub max_context_blocks: usize,
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let model = config
            .providers
            .get(&config.default_provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| config.default_model.clone());
        Self {
            model,
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_turns: config.agent.max_turns,
            max_parse_failures: config.agent.max_parse_failures,
            max_context_blocks: config.agent.max_context_blocks,
        }
    }
}

/// Why a run stopped before completing.
enum Halt {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Halt {
    fn from(err: Error) -> Self {
        match err {
            Error::Cancelled => Self::Cancelled,
            err => Self::Failed(err),
        }
    }
}

/// Drives runs against one model provider and one repository host.
///
/// Holds no per-run state, so one orchestrator can serve many concurrent runs.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    host: Arc<dyn RepositoryHost>,
    scorer: Arc<dyn RelevanceScorer>,
    assembler_settings: AssemblerSettings,
    optimizer: PromptOptimizer,
    retry: RetryPolicy,
    settings: RunSettings,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        host: Arc<dyn RepositoryHost>,
        config: &AppConfig,
    ) -> Self {
        Self {
            provider,
            host,
            scorer: Arc::new(CompositeScorer::default()),
            assembler_settings: AssemblerSettings::from(&config.agent),
            optimizer: PromptOptimizer::new(OptimizerSettings::from(&config.agent)),
            retry: config.retry.policy(),
            settings: RunSettings::from_config(config),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Publish run events on a shared bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.settings.max_turns = max_turns;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run `task` to a terminal state. Never fails: errors end the run as
    /// `Failed` with a recorded reason.
    pub async fn run(&self, task: Task, cancel: CancellationToken) -> RunOutcome {
        let mut state = RunState::new(task.id().clone());
        let task_id = task.id().to_string();

        info!(
            task_id = %task_id,
            repository = %task.target().repository,
            model = %self.settings.model,
            max_turns = self.settings.max_turns,
            "Run started"
        );
        self.event_bus.publish(DomainEvent::RunStarted {
            task_id: task_id.clone(),
            repository: task.target().repository.to_string(),
            timestamp: Utc::now(),
        });

        let (status, reason, summary) = match self.drive(&task, &mut state, &cancel).await {
            Ok(summary) => (RunStatus::Succeeded, None, Some(summary)),
            Err(Halt::Cancelled) => (RunStatus::Aborted, Some(FailureReason::cancelled()), None),
            Err(Halt::Failed(err)) => (RunStatus::Failed, Some(FailureReason::from(&err)), None),
        };

        let terminal = match status {
            RunStatus::Succeeded => RunPhase::Succeeded,
            RunStatus::Failed => RunPhase::Failed,
            RunStatus::Aborted => RunPhase::Aborted,
        };
        self.transition(&task_id, &mut state, terminal);

        let outcome = state.finish(status, reason, summary);
        match &outcome.reason {
            Some(reason) => warn!(
                task_id = %task_id,
                status = %outcome.status,
                turns = outcome.turns,
                reason = %reason.message,
                "Run finished"
            ),
            None => info!(
                task_id = %task_id,
                status = %outcome.status,
                turns = outcome.turns,
                actions = outcome.actions.len(),
                "Run finished"
            ),
        }
        self.event_bus.publish(DomainEvent::RunFinished {
            task_id,
            status: outcome.status,
            turns: outcome.turns,
            reason: outcome.reason.as_ref().map(|r| r.message.clone()),
            timestamp: Utc::now(),
        });
        outcome
    }

    async fn drive(
        &self,
        task: &Task,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, Halt> {
        let task_id = task.id().to_string();
        let assembler = ContextAssembler::new(
            Arc::clone(&self.host),
            self.assembler_settings.clone(),
            self.retry.clone(),
        )
        .with_scorer(Arc::clone(&self.scorer))
        .with_cancellation(cancel.clone());
        let executor = ActionExecutor::new(Arc::clone(&self.host), task.target().repository.clone());

        loop {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            let turn = state.begin_turn();

            // ── Context ──
            self.advance(&task_id, state, RunPhase::AssemblingContext, cancel)?;
            let stream = assembler.assemble_with_focus(task, state.focus()).await?;
            let blocks = stream
                .take_prefix(self.settings.max_context_blocks, self.optimizer.settings().budget)
                .await;
            let (prompt, report) =
                self.optimizer
                    .optimize_with_report(task.description(), blocks, state.history())?;
            debug!(
                task_id = %task_id,
                turn,
                tokens_used = report.tokens_used,
                budget = report.budget,
                dropped = report.drops.iter().map(|d| d.items_dropped).sum::<usize>(),
                "Prompt ready"
            );

            // ── Model ──
            self.advance(&task_id, state, RunPhase::AwaitingModel, cancel)?;
            let response = self.call_model(&task_id, turn, &prompt, cancel).await?;

            // ── Decision ──
            self.advance(&task_id, state, RunPhase::InterpretingResponse, cancel)?;
            let ModelResponse { text, decision, .. } = response;
            let kind = decision.kind().to_string();
            debug!(task_id = %task_id, turn, decision = %kind, "Decision parsed");

            let feedback = match decision {
                Decision::Complete { summary } => {
                    state.reset_parse_failures();
                    state.record_turn(TurnRecord {
                        number: turn,
                        response: text,
                        decision: kind,
                        feedback: "Task marked complete.".into(),
                    });
                    return Ok(summary);
                }
                Decision::Unparseable { reason } => {
                    let failures = state.record_parse_failure();
                    warn!(
                        task_id = %task_id,
                        turn,
                        failures,
                        max = self.settings.max_parse_failures,
                        reason = %reason,
                        "Model response could not be parsed"
                    );
                    if failures >= self.settings.max_parse_failures {
                        return Err(Error::ResponseParse(reason).into());
                    }
                    corrective_feedback(&reason)
                }
                Decision::RequestContext { request } => {
                    state.reset_parse_failures();
                    state.extend_focus(&request);
                    context_feedback(&request)
                }
                Decision::Act { actions } => {
                    state.reset_parse_failures();
                    self.advance(&task_id, state, RunPhase::ExecutingActions, cancel)?;
                    self.execute_all(&task_id, turn, &executor, &actions, state, cancel)
                        .await?
                }
            };
            state.record_turn(TurnRecord {
                number: turn,
                response: text,
                decision: kind,
                feedback,
            });

            // ── Continue or stop ──
            self.advance(&task_id, state, RunPhase::Continuing, cancel)?;
            if turn >= self.settings.max_turns {
                return Err(Error::TurnLimitExceeded { turns: turn }.into());
            }
        }
    }

    /// One model call through the retry policy.
    async fn call_model(
        &self,
        task_id: &str,
        turn: u32,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse> {
        let mut request = ProviderRequest::new(&self.settings.model, prompt.to_messages())
            .with_temperature(self.settings.temperature);
        if let Some(max_tokens) = self.settings.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let provider = &self.provider;
        let request = &request;
        let started = Instant::now();
        let response = self
            .retry
            .retry_until_cancelled("model.complete", cancel, move || {
                provider.complete(request.clone())
            })
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            task_id = %task_id,
            turn,
            model = %response.model,
            prompt_tokens = prompt.estimated_tokens(),
            context_blocks = prompt.blocks().len(),
            duration_ms,
            "Model responded"
        );
        self.event_bus.publish(DomainEvent::ModelCalled {
            task_id: task_id.to_string(),
            turn,
            model: response.model.clone(),
            prompt_tokens: prompt.estimated_tokens(),
            context_blocks: prompt.blocks().len(),
            duration_ms,
            timestamp: Utc::now(),
        });
        Ok(interpret(response))
    }

    /// Execute actions in order; the first failure ends the run.
    async fn execute_all(
        &self,
        task_id: &str,
        turn: u32,
        executor: &ActionExecutor,
        actions: &[Action],
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut lines = Vec::with_capacity(actions.len());
        for action in actions {
            let result = self
                .execute_with_retry(executor, action, state, cancel)
                .await?;
            lines.push(action_feedback(action, &result));
            self.event_bus.publish(DomainEvent::ActionExecuted {
                task_id: task_id.to_string(),
                turn,
                action: action.describe(),
                noop: result.is_noop(),
                timestamp: Utc::now(),
            });
            state.record_action(ActionRecord {
                turn,
                action: action.clone(),
                result,
            });
        }
        Ok(format!("Action results:\n{}", lines.join("\n")))
    }

    async fn execute_with_retry(
        &self,
        executor: &ActionExecutor,
        action: &Action,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;
            match executor.execute(action, state).await {
                Ok(result) => return Ok(result),
                Err(err) => match self.retry.next_delay(attempt, &err) {
                    Some(delay) => {
                        warn!(
                            action = action.kind(),
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Action failed transiently, retrying"
                        );
                        if !sleep_unless_cancelled(delay, cancel).await {
                            return Err(Error::Cancelled);
                        }
                    }
                    None => return Err(err),
                },
            }
        }
    }

    // ── Transitions ──

    /// Move to `to` unless the run was cancelled.
    fn advance(
        &self,
        task_id: &str,
        state: &mut RunState,
        to: RunPhase,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Halt> {
        if cancel.is_cancelled() {
            info!(task_id = %task_id, phase = %state.phase(), "Cancellation observed");
            return Err(Halt::Cancelled);
        }
        self.transition(task_id, state, to);
        Ok(())
    }

    fn transition(&self, task_id: &str, state: &mut RunState, to: RunPhase) {
        let from = state.transition(to);
        debug!(task_id = %task_id, turn = state.turn(), from = %from, to = %to, "Phase changed");
        self.event_bus.publish(DomainEvent::PhaseChanged {
            task_id: task_id.to_string(),
            turn: state.turn(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }
}

// ── Feedback for the next turn ──

fn corrective_feedback(reason: &str) -> String {
    format!(
        "Your last response could not be parsed: {reason}. \
         End your response with exactly one ```decision block as described in the response protocol."
    )
}

fn context_feedback(request: &ContextRequest) -> String {
    let mut parts = Vec::new();
    if !request.paths.is_empty() {
        parts.push(format!("paths {}", request.paths.join(", ")));
    }
    if !request.issues.is_empty() {
        let issues: Vec<String> = request.issues.iter().map(|n| format!("#{n}")).collect();
        parts.push(format!("issues {}", issues.join(", ")));
    }
    if !request.pull_requests.is_empty() {
        let pulls: Vec<String> = request.pull_requests.iter().map(|n| format!("#{n}")).collect();
        parts.push(format!("pull requests {}", pulls.join(", ")));
    }
    format!(
        "Requested context added where available: {}. Continue with the task.",
        parts.join("; ")
    )
}

fn action_feedback(action: &Action, result: &ExecutionResult) -> String {
    match &result.outcome {
        ExecutionOutcome::Applied { summary, url } => match url {
            Some(url) => format!("- {}: applied ({summary}, {url})", action.describe()),
            None => format!("- {}: applied ({summary})", action.describe()),
        },
        ExecutionOutcome::AlreadyApplied { evidence } => {
            format!("- {}: already applied ({evidence})", action.describe())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use forgepilot_core::error::{ProviderError, RepoError};
    use forgepilot_core::run::FailureKind;
    use forgepilot_core::task::{RepoRef, TaskTarget};
    use forgepilot_core::token::estimate_messages_tokens;
    use forgepilot_github::InMemoryHost;
    use std::time::Duration;

    fn repo() -> RepoRef {
        RepoRef::new("octo", "demo")
    }

    fn host() -> InMemoryHost {
        InMemoryHost::new(repo(), "main")
            .with_file("src/parser.rs", "pub fn parse(input: &str) -> Vec<String> { todo!() }")
            .with_file("README.md", "# demo")
            .with_issue(3, "Parser panics on empty input", "Calling parse(\"\") panics.")
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, host: Arc<InMemoryHost>) -> Orchestrator {
        Orchestrator::new(provider, host, &AppConfig::default())
    }

    fn task(description: &str) -> Task {
        Task::new(description, TaskTarget::new(repo()).with_issue(3)).unwrap()
    }

    #[tokio::test]
    async fn completes_on_first_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(complete("Nothing to do."))]));
        let host = Arc::new(host());
        let outcome = orchestrator(provider.clone(), host.clone())
            .run(task("Check the issue"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.summary.as_deref(), Some("Nothing to do."));
        assert_eq!(outcome.turns, 1);
        assert_eq!(host.write_count(), 0);

        let request = &provider.requests()[0];
        assert_eq!(request.model, "claude-3-5-sonnet-20241022");
        assert!(request.messages[1].content.contains("### [issue] #3 Parser panics"));
    }

    #[tokio::test]
    async fn existing_lgtm_on_pull_request_is_not_rewritten() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(actions(r#"[{"kind": "comment_on_pull_request", "number": 7, "body": "LGTM"}]"#)),
            Ok(complete("Approved.")),
        ]));
        let host = Arc::new(
            InMemoryHost::new(repo(), "main")
                .with_pull_request(7, "Tidy imports", "tidy", vec![])
                .with_comment(7, "forgepilot", "LGTM"),
        );
        let target = TaskTarget::new(repo()).with_pull_request(7);
        let outcome = orchestrator(provider, host.clone())
            .run(Task::new("Review PR #7", target).unwrap(), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(host.write_count(), 0);
        assert_eq!(
            outcome.action_summaries(),
            vec!["comment on pull request #7 (already applied)".to_string()]
        );
    }

    #[tokio::test]
    async fn never_parseable_model_fails_with_response_parse() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(
            "Looks fine to me.".to_string()
        )));
        let outcome = orchestrator(provider.clone(), Arc::new(host()))
            .with_max_turns(3)
            .run(task("Fix the parser"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ResponseParse));
        assert_eq!(outcome.turns, 2);

        // The second prompt carries corrective feedback.
        let second = &provider.requests()[1];
        let last = second.messages.last().unwrap();
        assert!(last.content.contains("could not be parsed"));
    }

    #[tokio::test(start_paused = true)]
    async fn three_timeouts_exhaust_model_retries() {
        let provider = Arc::new(ScriptedProvider::repeating(Err(ProviderError::Timeout(
            "slow".into(),
        ))));
        let outcome = orchestrator(provider.clone(), Arc::new(host()))
            .run(task("Fix the parser"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ModelCall));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_model_error_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::repeating(Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )));
        let outcome = orchestrator(provider.clone(), Arc::new(host()))
            .run(task("Fix the parser"), CancellationToken::new())
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ModelCall));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn turn_limit_is_enforced() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(need_paths(&["src/parser.rs"]))));
        let outcome = orchestrator(provider.clone(), Arc::new(host()))
            .with_max_turns(3)
            .run(task("Fix the parser"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::TurnLimitExceeded));
        assert_eq!(outcome.turns, 3);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn context_request_then_action_then_complete() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(need_paths(&["src/parser.rs"])),
            Ok(actions(
                r#"[{"kind": "comment_on_issue", "number": 3, "body": "Root cause is todo!() in parse."}]"#,
            )),
            Ok(complete("Diagnosed.")),
        ]));
        let host = Arc::new(host());
        let outcome = orchestrator(provider.clone(), host.clone())
            .run(task("Debug the parser crash"), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.turns, 3);
        assert_eq!(host.comments_on(3).len(), 1);

        let requests = provider.requests();
        // Requested path ranks ahead of the unrelated README on turn two.
        let user = &requests[1].messages[1].content;
        let parser_at = user.find("### [file] src/parser.rs").unwrap();
        let readme_at = user.find("### [file] README.md").unwrap();
        assert!(parser_at < readme_at);
        // Turn three replays both earlier turns.
        let replayed = &requests[2].messages;
        assert_eq!(replayed.len(), 2 + 4);
        assert!(replayed.last().unwrap().content.contains("applied"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_action_failure_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(actions(r#"[{"kind": "comment_on_issue", "number": 3, "body": "On it."}]"#)),
            Ok(complete("Commented.")),
        ]));
        let host = Arc::new(host());
        host.fail_next_writes(vec![RepoError::Server { status: 503 }]);
        let outcome = orchestrator(provider, host.clone())
            .run(task("Acknowledge the issue"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(host.comments_on(3).len(), 1);
    }

    #[tokio::test]
    async fn rejected_action_fails_the_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(actions(
            r#"[{"kind": "close_issue", "number": 99}]"#,
        ))]));
        let outcome = orchestrator(provider, Arc::new(host()))
            .run(task("Close stale issues"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ActionRejected));
    }

    #[tokio::test]
    async fn missing_target_is_context_unavailable() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let target = TaskTarget::new(repo()).with_issue(404);
        let outcome = orchestrator(provider.clone(), Arc::new(host()))
            .run(Task::new("Triage", target).unwrap(), CancellationToken::new())
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ContextUnavailable));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn prompts_never_exceed_budget() {
        let mut config = AppConfig::default();
        config.agent.context_budget_tokens = 1_500;
        let mut big = host();
        for i in 0..30 {
            big = big.with_file(format!("src/mod{i}.rs"), "fn f() {}\n".repeat(40 + i));
        }
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(need_paths(&["src/mod7.rs"])),
            Ok(need_paths(&["src/mod9.rs"])),
            Ok(complete("done")),
        ]));
        let outcome = Orchestrator::new(provider.clone(), Arc::new(big), &config)
            .run(task("Fix the parser"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        for request in provider.requests() {
            assert!(estimate_messages_tokens(&request.messages) <= 1_500);
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_is_aborted() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = orchestrator(provider.clone(), Arc::new(host()))
            .run(task("Fix the parser"), cancel)
            .await;
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(outcome.turns, 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_lets_in_flight_call_finish_then_stops() {
        let cancel = CancellationToken::new();
        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(actions(
                r#"[{"kind": "comment_on_issue", "number": 3, "body": "hi"}]"#,
            ))])
            .cancelling(cancel.clone()),
        );
        let host = Arc::new(host());
        let outcome = orchestrator(provider.clone(), host.clone())
            .run(task("Fix the parser"), cancel)
            .await;
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(provider.calls(), 1);
        assert_eq!(host.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_rate_limit_skips_retries_and_backoff() {
        let cancel = CancellationToken::new();
        let provider = Arc::new(
            ScriptedProvider::repeating(Err(ProviderError::RateLimited {
                retry_after_secs: 3_600,
            }))
            .cancelling(cancel.clone()),
        );
        let started = tokio::time::Instant::now();
        let outcome = orchestrator(provider.clone(), Arc::new(host()))
            .run(task("Fix the parser"), cancel)
            .await;
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(provider.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_action_backoff_aborts() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(actions(
            r#"[{"kind": "comment_on_issue", "number": 3, "body": "On it."}]"#,
        ))]));
        let host = Arc::new(host());
        host.fail_next_writes(vec![RepoError::RateLimited {
            retry_after_secs: 3_600,
        }]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        let outcome = orchestrator(provider, host.clone())
            .run(task("Acknowledge the issue"), cancel)
            .await;
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert!(host.comments_on(3).is_empty());
        assert!(started.elapsed() < Duration::from_secs(3_600));
    }

    #[tokio::test]
    async fn events_cover_the_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(complete("ok"))]));
        let orchestrator = orchestrator(provider, Arc::new(host()));
        let mut rx = orchestrator.event_bus().subscribe();
        orchestrator
            .run(task("Check"), CancellationToken::new())
            .await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(matches!(*seen[0], DomainEvent::RunStarted { .. }));
        assert!(seen
            .iter()
            .any(|e| matches!(**e, DomainEvent::ModelCalled { turn: 1, .. })));
        assert!(matches!(
            *seen[seen.len() - 1],
            DomainEvent::RunFinished {
                status: RunStatus::Succeeded,
                turns: 1,
                ..
            }
        ));
        let phases: Vec<RunPhase> = seen
            .iter()
            .filter_map(|e| match **e {
                DomainEvent::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                RunPhase::AssemblingContext,
                RunPhase::AwaitingModel,
                RunPhase::InterpretingResponse,
                RunPhase::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_runs_are_independent() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(complete("done"))));
        let orchestrator = Arc::new(orchestrator(provider.clone(), Arc::new(host())));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    orchestrator
                        .run(task(&format!("Check {i}")), CancellationToken::new())
                        .await
                })
            })
            .collect();

        let mut ids = std::collections::BTreeSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.status, RunStatus::Succeeded);
            ids.insert(outcome.task_id.to_string());
        }
        assert_eq!(ids.len(), 4);
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_model_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited {
                retry_after_secs: 10,
            }),
            Ok(complete("ok")),
        ]));
        let started = tokio::time::Instant::now();
        let outcome = orchestrator(provider, Arc::new(host()))
            .run(task("Check"), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
