//! Structured decisions extracted from model output.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::provider::Usage;

/// Version of the decision block format the model is instructed to emit.
pub const DECISION_SCHEMA_VERSION: u32 = 1;

/// Additional material the model asked for before deciding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub issues: Vec<u64>,
    #[serde(default)]
    pub pull_requests: Vec<u64>,
    #[serde(default)]
    pub reason: String,
}

impl ContextRequest {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.issues.is_empty() && self.pull_requests.is_empty()
    }
}

/// The outcome of interpreting one model response.
///
/// `Unparseable` is an error to report, never a silent no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Complete { summary: String },
    /// Always non-empty.
    Act { actions: Vec<Action> },
    RequestContext { request: ContextRequest },
    Unparseable { reason: String },
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "complete",
            Self::Act { .. } => "actions",
            Self::RequestContext { .. } => "need_context",
            Self::Unparseable { .. } => "unparseable",
        }
    }
}

/// Raw model output plus its parsed decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub decision: Decision,
    pub usage: Option<Usage>,
}
