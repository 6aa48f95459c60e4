//! Context assembler: turns a task into a ranked, lazy stream of blocks.
//!
//! Assembly happens in two phases:
//!
//! 1. **Resolve**: repository, branch, and the target issue / pull request.
//!    Any of these failing is fatal ([`Error::ContextUnavailable`]).
//! 2. **Collect**: gather candidates (issue and PR material, requested
//!    issues and PRs, repository files), score them, sort them by
//!    [`RankKey`] and cap the list.
//!
//! File contents are not fetched until the caller pulls them from the
//! returned [`ContextStream`].

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forgepilot_config::AgentSettings;
use forgepilot_core::context::{BlockSource, ContextBlock, RankKey};
use forgepilot_core::error::{Error, RepoError, Result};
use forgepilot_core::repository::{
    ChangedFile, Comment, Issue, IssueState, PullRequest, RepositoryHost,
};
use forgepilot_core::retry::{RetryError, RetryPolicy};
use forgepilot_core::run::ContextFocus;
use forgepilot_core::task::{RepoRef, Task};
use forgepilot_core::token::truncate_chars;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scoring::{Candidate, CompositeScorer, RelevanceScorer, ScoringContext};

/// Extensions never offered as context.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svgz", "pdf", "zip", "gz", "tgz", "tar",
    "bz2", "xz", "7z", "jar", "war", "class", "exe", "dll", "so", "dylib", "a", "o", "obj", "bin",
    "wasm", "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "mov", "avi", "wav", "sqlite", "db",
];

const TRUNCATION_MARKER: &str = "\n[truncated]";

fn is_binary_path(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Limits applied while collecting candidates.
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub max_file_bytes: u64,
    pub max_candidates: usize,
    pub max_block_chars: usize,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for AssemblerSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_file_bytes: settings.max_file_bytes,
            max_candidates: settings.max_candidates,
            max_block_chars: settings.max_block_chars,
        }
    }
}

/// Material for a candidate, either already in hand or still remote.
#[derive(Debug, Clone)]
enum PendingBody {
    Ready(String),
    File { path: String },
}

#[derive(Debug, Clone)]
struct PendingBlock {
    source: BlockSource,
    label: String,
    score: f32,
    modified_at: Option<DateTime<Utc>>,
    body: PendingBody,
}

impl PendingBlock {
    fn rank_key(&self) -> RankKey<'_> {
        RankKey {
            score: self.score,
            modified_at: self.modified_at,
            label: &self.label,
        }
    }
}

/// A finite, ordered, lazily-fetched sequence of context blocks.
///
/// Consumed by value: there is no way to rewind. Files that fail to load
/// are skipped with a warning; cancellation ends the stream.
pub struct ContextStream {
    host: Arc<dyn RepositoryHost>,
    repo: RepoRef,
    branch: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
    max_block_chars: usize,
    pending: VecDeque<PendingBlock>,
    skipped: usize,
}

impl ContextStream {
    /// Branch the stream reads files from.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Candidates not yet pulled.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Files skipped so far because they failed to load.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Labels of the remaining candidates, in stream order.
    pub fn labels(&self) -> Vec<&str> {
        self.pending.iter().map(|p| p.label.as_str()).collect()
    }

    /// The next block, or `None` when the stream is exhausted.
    pub async fn next(&mut self) -> Option<ContextBlock> {
        while let Some(pending) = self.pending.pop_front() {
            let content = match pending.body {
                PendingBody::Ready(content) => content,
                PendingBody::File { ref path } => match self.fetch(path).await {
                    Ok(content) => content,
                    Err(RetryError::Cancelled) => {
                        debug!(remaining = self.pending.len(), "Context stream cancelled");
                        self.pending.clear();
                        return None;
                    }
                    Err(RetryError::Failed(e)) => {
                        warn!(path = %path, error = %e, "Skipping file that failed to load");
                        self.skipped += 1;
                        continue;
                    }
                },
            };
            let content = self.bound(content);
            return Some(
                ContextBlock::new(pending.source, pending.label, content)
                    .with_score(pending.score)
                    .with_modified_at(pending.modified_at),
            );
        }
        None
    }

    /// Pull blocks until `max_blocks` are taken or their tokens reach `max_tokens`.
    pub async fn take_prefix(mut self, max_blocks: usize, max_tokens: usize) -> Vec<ContextBlock> {
        let mut blocks = Vec::new();
        let mut tokens = 0;
        while blocks.len() < max_blocks && tokens < max_tokens {
            let Some(block) = self.next().await else {
                break;
            };
            tokens += block.tokens();
            blocks.push(block);
        }
        blocks
    }

    async fn fetch(&self, path: &str) -> std::result::Result<String, RetryError<RepoError>> {
        let host = &self.host;
        let repo = &self.repo;
        let branch = self.branch.as_str();
        let file = self
            .retry
            .retry_until_cancelled("repo.file", &self.cancel, move || {
                host.file(repo, branch, path)
            })
            .await?;
        if file.content.contains('\0') {
            return Err(RetryError::Failed(RepoError::Decode(format!(
                "{path} is binary"
            ))));
        }
        Ok(file.content)
    }

    fn bound(&self, content: String) -> String {
        if content.len() <= self.max_block_chars {
            return content;
        }
        let mut cut = truncate_chars(&content, self.max_block_chars).to_string();
        cut.push_str(TRUNCATION_MARKER);
        cut
    }
}

/// Builds [`ContextStream`]s from a repository host.
pub struct ContextAssembler {
    host: Arc<dyn RepositoryHost>,
    scorer: Arc<dyn RelevanceScorer>,
    settings: AssemblerSettings,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ContextAssembler {
    pub fn new(host: Arc<dyn RepositoryHost>, settings: AssemblerSettings, retry: RetryPolicy) -> Self {
        Self {
            host,
            scorer: Arc::new(CompositeScorer::default()),
            settings,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop repository reads (and streams built later) once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the default composite scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub async fn assemble(&self, task: &Task) -> Result<ContextStream> {
        self.assemble_with_focus(task, &ContextFocus::default()).await
    }

    /// Assemble, also drawing in material the model asked for.
    pub async fn assemble_with_focus(&self, task: &Task, focus: &ContextFocus) -> Result<ContextStream> {
        let target = task.target();
        let repo = &target.repository;
        let host = &self.host;

        // ── Phase 1: resolve ──

        let info = self
            .retry
            .retry_until_cancelled("repo.repository", &self.cancel, move || host.repository(repo))
            .await
            .map_err(|e| unavailable(format!("repository {repo}"), e))?;

        let branch = target
            .branch
            .clone()
            .unwrap_or_else(|| info.default_branch.clone());
        {
            let branch = branch.as_str();
            self.retry
                .retry_until_cancelled("repo.branch", &self.cancel, move || host.branch(repo, branch))
                .await
                .map_err(|e| unavailable(format!("branch {branch}"), e))?;
        }

        let mut candidates = Vec::new();

        if let Some(number) = target.issue {
            let (issue, comments) = self
                .issue_with_comments(repo, number)
                .await
                .map_err(|e| unavailable(format!("issue #{number}"), e))?;
            candidates.extend(issue_candidates(&issue, &comments));
        }

        if let Some(number) = target.pull_request {
            let (pull, files) = self
                .pull_with_files(repo, number)
                .await
                .map_err(|e| unavailable(format!("pull request #{number}"), e))?;
            candidates.extend(pull_candidates(&pull, &files));
        }

        // ── Phase 2: collect ──

        for &number in &focus.issues {
            if target.issue == Some(number) {
                continue;
            }
            match self.issue_with_comments(repo, number).await {
                Ok((issue, comments)) => candidates.extend(issue_candidates(&issue, &comments)),
                Err(RetryError::Cancelled) => return Err(Error::Cancelled),
                Err(RetryError::Failed(e)) => warn!(issue = number, error = %e, "Requested issue unavailable"),
            }
        }

        for &number in &focus.pull_requests {
            if target.pull_request == Some(number) {
                continue;
            }
            match self.pull_with_files(repo, number).await {
                Ok((pull, files)) => candidates.extend(pull_candidates(&pull, &files)),
                Err(RetryError::Cancelled) => return Err(Error::Cancelled),
                Err(RetryError::Failed(e)) => warn!(pull_request = number, error = %e, "Requested pull request unavailable"),
            }
        }

        let entries = {
            let branch = branch.as_str();
            self.retry
                .retry_until_cancelled("repo.list_files", &self.cancel, move || {
                    host.list_files(repo, branch)
                })
                .await
                .map_err(|e| unavailable(format!("file tree of {branch}"), e))?
        };
        let total_files = entries.len();
        for entry in entries {
            if entry.size > self.settings.max_file_bytes || is_binary_path(&entry.path) {
                continue;
            }
            candidates.push((
                Candidate {
                    source: BlockSource::File,
                    label: entry.path.clone(),
                    path: Some(entry.path.clone()),
                    number: None,
                    preview: String::new(),
                    modified_at: entry.last_modified,
                },
                PendingBody::File { path: entry.path },
            ));
        }

        let ctx = ScoringContext::new(task, focus);
        let mut pending: Vec<PendingBlock> = candidates
            .into_iter()
            .map(|(candidate, body)| PendingBlock {
                score: self.scorer.score(&ctx, &candidate),
                source: candidate.source,
                label: candidate.label,
                modified_at: candidate.modified_at,
                body,
            })
            .collect();
        pending.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));
        let offered = pending.len();
        pending.truncate(self.settings.max_candidates);

        info!(
            task_id = %task.id(),
            repository = %repo,
            branch = %branch,
            files = total_files,
            candidates = offered,
            kept = pending.len(),
            scorer = self.scorer.name(),
            "Context assembled"
        );
        if let Some(top) = pending.first() {
            debug!(label = %top.label, score = top.score, "Top-ranked candidate");
        }

        Ok(ContextStream {
            host: Arc::clone(&self.host),
            repo: repo.clone(),
            branch,
            retry: self.retry.clone(),
            cancel: self.cancel.clone(),
            max_block_chars: self.settings.max_block_chars,
            pending: pending.into(),
            skipped: 0,
        })
    }

    async fn issue_with_comments(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> std::result::Result<(Issue, Vec<Comment>), RetryError<RepoError>> {
        let host = &self.host;
        let issue = self
            .retry
            .retry_until_cancelled("repo.issue", &self.cancel, move || host.issue(repo, number))
            .await?;
        let comments = self
            .retry
            .retry_until_cancelled("repo.comments", &self.cancel, move || {
                host.comments(repo, number)
            })
            .await?;
        Ok((issue, comments))
    }

    async fn pull_with_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> std::result::Result<(PullRequest, Vec<ChangedFile>), RetryError<RepoError>> {
        let host = &self.host;
        let pull = self
            .retry
            .retry_until_cancelled("repo.pull_request", &self.cancel, move || {
                host.pull_request(repo, number)
            })
            .await?;
        let files = self
            .retry
            .retry_until_cancelled("repo.pull_request_files", &self.cancel, move || {
                host.pull_request_files(repo, number)
            })
            .await?;
        Ok((pull, files))
    }
}

fn unavailable(what: String, err: RetryError<RepoError>) -> Error {
    match err {
        RetryError::Cancelled => Error::Cancelled,
        RetryError::Failed(err) => Error::ContextUnavailable(format!("{what}: {err}")),
    }
}

// ── Candidate rendering ──────────────────────────────────────────────────

fn issue_candidates(issue: &Issue, comments: &[Comment]) -> Vec<(Candidate, PendingBody)> {
    let state = match issue.state {
        IssueState::Open => "open",
        IssueState::Closed => "closed",
    };
    let mut content = format!(
        "Title: {}\nState: {state}\nAuthor: {}",
        issue.title, issue.author
    );
    if !issue.labels.is_empty() {
        content.push_str(&format!("\nLabels: {}", issue.labels.join(", ")));
    }
    if !issue.body.is_empty() {
        content.push_str("\n\n");
        content.push_str(&issue.body);
    }

    let mut out = vec![ready(
        BlockSource::Issue,
        format!("#{} {}", issue.number, issue.title),
        None,
        Some(issue.number),
        Some(issue.updated_at),
        content,
    )];

    if !comments.is_empty() {
        let thread = comments
            .iter()
            .map(|c| format!("@{} ({}):\n{}", c.author, c.created_at.to_rfc3339(), c.body))
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push(ready(
            BlockSource::Comments,
            format!("#{} comments", issue.number),
            None,
            Some(issue.number),
            comments.iter().map(|c| c.created_at).max(),
            thread,
        ));
    }
    out
}

fn pull_candidates(pull: &PullRequest, files: &[ChangedFile]) -> Vec<(Candidate, PendingBody)> {
    let mut content = format!(
        "Title: {}\nAuthor: {}\nBranch: {} -> {}\nFiles changed: {}",
        pull.title,
        pull.author,
        pull.head,
        pull.base,
        files.len()
    );
    if !pull.body.is_empty() {
        content.push_str("\n\n");
        content.push_str(&pull.body);
    }

    let mut out = vec![ready(
        BlockSource::PullRequest,
        format!("#{} {}", pull.number, pull.title),
        None,
        Some(pull.number),
        Some(pull.updated_at),
        content,
    )];

    for file in files {
        let diff = match &file.patch {
            Some(patch) => format!("{} ({})\n{patch}", file.path, file.status),
            None => format!("{} ({}, no textual diff)", file.path, file.status),
        };
        out.push(ready(
            BlockSource::Diff,
            format!("#{} {}", pull.number, file.path),
            Some(file.path.clone()),
            Some(pull.number),
            Some(pull.updated_at),
            diff,
        ));
    }
    out
}

fn ready(
    source: BlockSource,
    label: String,
    path: Option<String>,
    number: Option<u64>,
    modified_at: Option<DateTime<Utc>>,
    content: String,
) -> (Candidate, PendingBody) {
    (
        Candidate {
            source,
            label,
            path,
            number,
            preview: content.clone(),
            modified_at,
        },
        PendingBody::Ready(content),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────
