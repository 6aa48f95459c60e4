//! Actions: structured instructions to mutate repository state.
//!
//! Every action carries enough data for a read-based idempotency check and
//! has a stable fingerprint used as its key in the run's journals.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One file written by an [`Action::OpenPullRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

/// A side-effecting instruction proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    CommentOnIssue {
        number: u64,
        body: String,
    },
    CommentOnPullRequest {
        number: u64,
        body: String,
    },
    CreateIssue {
        title: String,
        #[serde(default)]
        body: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
    },
    CloseIssue {
        number: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    AddLabels {
        number: u64,
        labels: Vec<String>,
    },
    /// Create `head`, commit each change to it, then open a pull request.
    OpenPullRequest {
        title: String,
        #[serde(default)]
        body: String,
        head: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base: Option<String>,
        changes: Vec<FileChange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_message: Option<String>,
    },
}

impl Action {
    /// Short machine name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommentOnIssue { .. } => "comment_on_issue",
            Self::CommentOnPullRequest { .. } => "comment_on_pull_request",
            Self::CreateIssue { .. } => "create_issue",
            Self::CloseIssue { .. } => "close_issue",
            Self::AddLabels { .. } => "add_labels",
            Self::OpenPullRequest { .. } => "open_pull_request",
        }
    }

    /// Stable SHA-256 of the action's canonical JSON, hex encoded.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            Self::CommentOnIssue { number, .. } => format!("comment on issue #{number}"),
            Self::CommentOnPullRequest { number, .. } => {
                format!("comment on pull request #{number}")
            }
            Self::CreateIssue { title, .. } => format!("create issue \"{title}\""),
            Self::CloseIssue { number, .. } => format!("close issue #{number}"),
            Self::AddLabels { number, labels } => {
                format!("label #{number} with {}", labels.join(", "))
            }
            Self::OpenPullRequest {
                title,
                head,
                changes,
                ..
            } => format!(
                "open pull request \"{title}\" from {head} ({} file(s))",
                changes.len()
            ),
        }
    }
}

/// What executing an action amounted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The repository was mutated.
    Applied {
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Prior evidence of the same effect was found; nothing was written.
    AlreadyApplied { evidence: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The action's fingerprint.
    pub action_key: String,
    pub outcome: ExecutionOutcome,
    /// Sub-steps completed for multi-step actions, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps_completed: Vec<String>,
}

impl ExecutionResult {
    pub fn is_noop(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::AlreadyApplied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = Action::CommentOnPullRequest {
            number: 7,
            body: "LGTM".into(),
        };
        let b = a.clone();
        let c = Action::CommentOnPullRequest {
            number: 7,
            body: "LGTM!".into(),
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let action: Action = serde_json::from_str(
            r#"{"kind": "create_issue", "title": "Flaky test", "labels": ["ci"]}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            Action::CreateIssue {
                title: "Flaky test".into(),
                body: String::new(),
                labels: vec!["ci".into()],
            }
        );
        assert_eq!(action.kind(), "create_issue");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let parsed = serde_json::from_str::<Action>(r#"{"kind": "delete_repo"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn describe_names_target() {
        let action = Action::CloseIssue {
            number: 5,
            comment: None,
        };
        assert_eq!(action.describe(), "close issue #5");
    }
}
