//! Action executor: idempotent repository mutations.
//!
//! Every action starts with a read that looks for evidence it was already
//! applied. Multi-step actions journal each completed step in the
//! [`RunState`] so a retry resumes where the last attempt stopped.

use std::sync::Arc;

use forgepilot_core::action::{Action, ExecutionOutcome, ExecutionResult, FileChange};
use forgepilot_core::error::{Error, RepoError, Result};
use forgepilot_core::repository::{IssueState, NewIssue, NewPullRequest, RepositoryHost};
use forgepilot_core::retry::Retryable;
use forgepilot_core::run::RunState;
use forgepilot_core::task::RepoRef;
use tracing::{debug, info};

const STEP_BRANCH: &str = "branch";
const STEP_COMMENT: &str = "comment";
const STEP_CLOSE: &str = "close";
const STEP_PULL_REQUEST: &str = "pull_request";

fn file_step(path: &str) -> String {
    format!("file:{path}")
}

/// Executes actions against one repository.
pub struct ActionExecutor {
    host: Arc<dyn RepositoryHost>,
    repo: RepoRef,
}

impl ActionExecutor {
    pub fn new(host: Arc<dyn RepositoryHost>, repo: RepoRef) -> Self {
        Self { host, repo }
    }

    /// Apply `action` unless evidence shows it already was.
    ///
    /// Repository failures are classified: transient ones become
    /// [`Error::ActionTransient`] (safe to call again with the same state),
    /// everything else [`Error::ActionRejected`].
    pub async fn execute(&self, action: &Action, state: &mut RunState) -> Result<ExecutionResult> {
        let key = action.fingerprint();
        debug!(action = action.kind(), key = %key, "Executing action");

        let outcome = match action {
            Action::CommentOnIssue { number, body } | Action::CommentOnPullRequest { number, body } => {
                self.comment(*number, body).await
            }
            Action::CreateIssue { title, body, labels } => {
                self.create_issue(title, body, labels).await
            }
            Action::CloseIssue { number, comment } => {
                self.close_issue(&key, *number, comment.as_deref(), state)
                    .await
            }
            Action::AddLabels { number, labels } => self.add_labels(*number, labels).await,
            Action::OpenPullRequest {
                title,
                body,
                head,
                base,
                changes,
                commit_message,
            } => {
                let request = PullRequestPlan {
                    title,
                    body,
                    head,
                    base: base.as_deref(),
                    changes,
                    commit_message: commit_message.as_deref().unwrap_or(title),
                };
                self.open_pull_request(&key, request, state).await
            }
        }
        .map_err(|e| classify(action, e))?;

        match &outcome {
            ExecutionOutcome::Applied { summary, .. } => {
                info!(action = action.kind(), summary = %summary, "Action applied");
            }
            ExecutionOutcome::AlreadyApplied { evidence } => {
                info!(action = action.kind(), evidence = %evidence, "Action already applied, skipping");
            }
        }

        Ok(ExecutionResult {
            steps_completed: state.steps_done(&key).to_vec(),
            action_key: key,
            outcome,
        })
    }

    // ── Single-step actions ──

    async fn comment(&self, number: u64, body: &str) -> std::result::Result<ExecutionOutcome, StepError> {
        if let Some(evidence) = self.existing_comment(number, body).await? {
            return Ok(ExecutionOutcome::AlreadyApplied { evidence });
        }
        let created = self.host.create_comment(&self.repo, number, body).await?;
        Ok(ExecutionOutcome::Applied {
            summary: format!("commented on #{number} (comment {})", created.id),
            url: None,
        })
    }

    async fn existing_comment(&self, number: u64, body: &str) -> std::result::Result<Option<String>, RepoError> {
        let comments = self.host.comments(&self.repo, number).await?;
        Ok(comments
            .iter()
            .find(|c| c.body.trim() == body.trim())
            .map(|c| format!("comment {} by @{} on #{number} has the same body", c.id, c.author)))
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> std::result::Result<ExecutionOutcome, StepError> {
        let open = self.host.list_open_issues(&self.repo).await?;
        if let Some(existing) = open.iter().find(|i| i.title.trim() == title.trim()) {
            return Ok(ExecutionOutcome::AlreadyApplied {
                evidence: format!("open issue #{} has the same title", existing.number),
            });
        }
        let created = self
            .host
            .create_issue(
                &self.repo,
                &NewIssue {
                    title: title.to_string(),
                    body: body.to_string(),
                    labels: labels.to_vec(),
                },
            )
            .await?;
        Ok(ExecutionOutcome::Applied {
            summary: format!("opened issue #{}", created.number),
            url: None,
        })
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> std::result::Result<ExecutionOutcome, StepError> {
        let issue = self.host.issue(&self.repo, number).await?;
        let missing: Vec<String> = labels
            .iter()
            .filter(|l| !issue.labels.contains(l))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(ExecutionOutcome::AlreadyApplied {
                evidence: format!("#{number} already has {}", labels.join(", ")),
            });
        }
        self.host.add_labels(&self.repo, number, &missing).await?;
        Ok(ExecutionOutcome::Applied {
            summary: format!("labelled #{number} with {}", missing.join(", ")),
            url: None,
        })
    }

    // ── Multi-step actions ──

    async fn close_issue(
        &self,
        key: &str,
        number: u64,
        comment: Option<&str>,
        state: &mut RunState,
    ) -> std::result::Result<ExecutionOutcome, StepError> {
        let issue = self.host.issue(&self.repo, number).await?;
        if issue.state == IssueState::Closed {
            return Ok(ExecutionOutcome::AlreadyApplied {
                evidence: format!("issue #{number} is already closed"),
            });
        }

        if let Some(body) = comment {
            if !state.is_step_done(key, STEP_COMMENT) {
                if self.existing_comment(number, body).await?.is_none() {
                    self.host.create_comment(&self.repo, number, body).await?;
                }
                state.mark_step_done(key, STEP_COMMENT);
            }
        }

        self.host.close_issue(&self.repo, number).await?;
        state.mark_step_done(key, STEP_CLOSE);
        Ok(ExecutionOutcome::Applied {
            summary: format!("closed issue #{number}"),
            url: None,
        })
    }

    async fn open_pull_request(
        &self,
        key: &str,
        plan: PullRequestPlan<'_>,
        state: &mut RunState,
    ) -> std::result::Result<ExecutionOutcome, StepError> {
        if let Some(existing) = self.host.find_open_pull_request(&self.repo, plan.head).await? {
            return Ok(ExecutionOutcome::AlreadyApplied {
                evidence: format!(
                    "pull request #{} is already open from {}",
                    existing.number, plan.head
                ),
            });
        }
        if plan.changes.is_empty() {
            return Err(StepError::Invalid("pull request has no file changes".into()));
        }

        let base = match plan.base {
            Some(base) => base.to_string(),
            None => self.host.repository(&self.repo).await?.default_branch,
        };
        if base == plan.head {
            return Err(StepError::Invalid(format!(
                "head and base are both {base}"
            )));
        }

        // ── Step 1: branch ──
        if !state.is_step_done(key, STEP_BRANCH) {
            match self.host.branch(&self.repo, plan.head).await {
                Ok(_) => debug!(branch = plan.head, "Head branch already exists"),
                Err(RepoError::NotFound(_)) => {
                    let from = self.host.branch(&self.repo, &base).await?;
                    self.host
                        .create_branch(&self.repo, plan.head, &from.head_sha)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
            state.mark_step_done(key, STEP_BRANCH);
        }

        // ── Step 2: one commit per file ──
        for change in plan.changes {
            let step = file_step(&change.path);
            if state.is_step_done(key, &step) {
                continue;
            }
            self.write_file(plan.head, change, plan.commit_message).await?;
            state.mark_step_done(key, step);
        }

        // ── Step 3: pull request ──
        let created = self
            .host
            .create_pull_request(
                &self.repo,
                &NewPullRequest {
                    title: plan.title.to_string(),
                    body: plan.body.to_string(),
                    head: plan.head.to_string(),
                    base,
                },
            )
            .await?;
        state.mark_step_done(key, STEP_PULL_REQUEST);

        Ok(ExecutionOutcome::Applied {
            summary: format!("opened pull request #{}", created.number),
            url: created.html_url,
        })
    }

    /// Commit one file unless the branch already holds the same content.
    async fn write_file(&self, branch: &str, change: &FileChange, message: &str) -> std::result::Result<(), RepoError> {
        let existing = match self.host.file(&self.repo, branch, &change.path).await {
            Ok(file) => Some(file),
            Err(RepoError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(file) = &existing {
            if file.content == change.content {
                debug!(path = %change.path, "File content already matches, skipping");
                return Ok(());
            }
        }
        self.host
            .put_file(
                &self.repo,
                branch,
                &change.path,
                &change.content,
                message,
                existing.as_ref().map(|f| f.sha.as_str()),
            )
            .await
    }
}

struct PullRequestPlan<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: Option<&'a str>,
    changes: &'a [FileChange],
    commit_message: &'a str,
}

/// A failed step: either the host refused, or the action itself is malformed.
#[derive(Debug)]
enum StepError {
    Repo(RepoError),
    Invalid(String),
}

impl From<RepoError> for StepError {
    fn from(err: RepoError) -> Self {
        Self::Repo(err)
    }
}

fn classify(action: &Action, err: StepError) -> Error {
    let described = action.describe();
    match err {
        StepError::Repo(e) if e.is_transient() => Error::ActionTransient {
            action: described,
            reason: e.to_string(),
            retry_after_secs: e.retry_after().map(|d| d.as_secs()),
        },
        StepError::Repo(e) => Error::ActionRejected {
            action: described,
            reason: e.to_string(),
        },
        StepError::Invalid(reason) => Error::ActionRejected {
            action: described,
            reason,
        },
    }
}
