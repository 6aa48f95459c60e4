//! Run state: the mutable record of one orchestration run.
//!
//! A [`RunState`] is owned by exactly one run and consumed into a
//! [`RunOutcome`] when the run reaches a terminal state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::{Action, ExecutionResult};
use crate::decision::ContextRequest;
use crate::error::Error;
use crate::task::TaskId;

/// States of the orchestration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Started,
    AssemblingContext,
    AwaitingModel,
    InterpretingResponse,
    ExecutingActions,
    Continuing,
    Succeeded,
    Failed,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::AssemblingContext => "assembling_context",
            Self::AwaitingModel => "awaiting_model",
            Self::InterpretingResponse => "interpreting_response",
            Self::ExecutingActions => "executing_actions",
            Self::Continuing => "continuing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Category of the error that ended a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidTask,
    BudgetExceeded,
    ContextUnavailable,
    ModelCall,
    ResponseParse,
    ActionRejected,
    ActionTransient,
    TurnLimitExceeded,
    Cancelled,
}

/// Structured reason recorded on a non-successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "run cancelled".into(),
        }
    }
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::InvalidTask(_) => FailureKind::InvalidTask,
            Error::BudgetExceeded { .. } => FailureKind::BudgetExceeded,
            Error::ContextUnavailable(_) => FailureKind::ContextUnavailable,
            Error::ModelCall(_) => FailureKind::ModelCall,
            Error::ResponseParse(_) => FailureKind::ResponseParse,
            Error::ActionRejected { .. } => FailureKind::ActionRejected,
            Error::ActionTransient { .. } => FailureKind::ActionTransient,
            Error::TurnLimitExceeded { .. } => FailureKind::TurnLimitExceeded,
            Error::Cancelled => FailureKind::Cancelled,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// One completed turn, as fed back to the model on later turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub number: u32,
    /// Raw model output.
    pub response: String,
    /// Decision kind the response parsed to.
    pub decision: String,
    /// What happened as a result, phrased for the model.
    pub feedback: String,
}

/// One executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub turn: u32,
    pub action: Action,
    pub result: ExecutionResult,
}

impl ActionRecord {
    pub fn summary(&self) -> String {
        if self.result.is_noop() {
            format!("{} (already applied)", self.action.describe())
        } else {
            self.action.describe()
        }
    }
}

/// Material the model asked for on earlier turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFocus {
    pub paths: BTreeSet<String>,
    pub issues: BTreeSet<u64>,
    pub pull_requests: BTreeSet<u64>,
}

impl ContextFocus {
    pub fn extend(&mut self, request: &ContextRequest) {
        self.paths.extend(request.paths.iter().cloned());
        self.issues.extend(request.issues.iter().copied());
        self.pull_requests
            .extend(request.pull_requests.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.issues.is_empty() && self.pull_requests.is_empty()
    }
}

/// The mutable record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    task_id: TaskId,
    turn: u32,
    phase: RunPhase,
    history: Vec<TurnRecord>,
    actions: Vec<ActionRecord>,
    /// Completed sub-steps keyed by action fingerprint.
    step_journal: BTreeMap<String, Vec<String>>,
    focus: ContextFocus,
    consecutive_parse_failures: u32,
}

impl RunState {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            turn: 0,
            phase: RunPhase::Started,
            history: Vec::new(),
            actions: Vec::new(),
            step_journal: BTreeMap::new(),
            focus: ContextFocus::default(),
            consecutive_parse_failures: 0,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[TurnRecord] {
        &self.history
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    pub fn focus(&self) -> &ContextFocus {
        &self.focus
    }

    pub fn consecutive_parse_failures(&self) -> u32 {
        self.consecutive_parse_failures
    }

    /// Move to `phase`, returning the phase left.
    pub fn transition(&mut self, phase: RunPhase) -> RunPhase {
        std::mem::replace(&mut self.phase, phase)
    }

    /// Start the next turn; returns its 1-based number.
    pub fn begin_turn(&mut self) -> u32 {
        self.turn += 1;
        self.turn
    }

    pub fn record_turn(&mut self, record: TurnRecord) {
        self.history.push(record);
    }

    pub fn record_action(&mut self, record: ActionRecord) {
        self.actions.push(record);
    }

    pub fn record_parse_failure(&mut self) -> u32 {
        self.consecutive_parse_failures += 1;
        self.consecutive_parse_failures
    }

    pub fn reset_parse_failures(&mut self) {
        self.consecutive_parse_failures = 0;
    }

    pub fn extend_focus(&mut self, request: &ContextRequest) {
        self.focus.extend(request);
    }

    pub fn is_step_done(&self, action_key: &str, step: &str) -> bool {
        self.step_journal
            .get(action_key)
            .is_some_and(|steps| steps.iter().any(|s| s == step))
    }

    pub fn mark_step_done(&mut self, action_key: &str, step: impl Into<String>) {
        let step = step.into();
        let steps = self.step_journal.entry(action_key.to_string()).or_default();
        if !steps.contains(&step) {
            steps.push(step);
        }
    }

    pub fn steps_done(&self, action_key: &str) -> &[String] {
        self.step_journal
            .get(action_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Consume the state into the run's final report.
    pub fn finish(
        mut self,
        status: RunStatus,
        reason: Option<FailureReason>,
        summary: Option<String>,
    ) -> RunOutcome {
        self.phase = match status {
            RunStatus::Succeeded => RunPhase::Succeeded,
            RunStatus::Failed => RunPhase::Failed,
            RunStatus::Aborted => RunPhase::Aborted,
        };
        RunOutcome {
            task_id: self.task_id,
            status,
            reason,
            summary,
            turns: self.turn,
            actions: self.actions,
        }
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub task_id: TaskId,
    pub status: RunStatus,
    pub reason: Option<FailureReason>,
    /// Completion summary from the model, on success.
    pub summary: Option<String>,
    pub turns: u32,
    pub actions: Vec<ActionRecord>,
}

impl RunOutcome {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.reason.as_ref().map(|r| r.kind)
    }

    /// Human-readable list of actions taken.
    pub fn action_summaries(&self) -> Vec<String> {
        self.actions.iter().map(ActionRecord::summary).collect()
    }
}
