//! RepositoryHost trait: the abstraction over the code-hosting API.
//!
//! Reads feed the context assembler and the executor's idempotency checks;
//! writes are only issued by the action executor, each after a matching read.
//!
//! Implementations: GitHub REST, in-memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RepoError;
use crate::task::RepoRef;

pub type RepoResult<T> = std::result::Result<T, RepoError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub repo: RepoRef,
    pub default_branch: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub head_sha: String,
}

/// A file in the branch tree, without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Blob sha, needed to update an existing file.
    pub sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub author: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub author: String,
    /// Source branch name.
    pub head: String,
    /// Target branch name.
    pub base: String,
    #[serde(default)]
    pub body: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One file touched by a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: String,
    /// Unified diff hunk; absent for binary or very large files.
    #[serde(default)]
    pub patch: Option<String>,
}

/// Parameters for opening an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// The code-hosting API.
///
/// Issue and pull request numbers share one space, so comment operations
/// take either.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// A human-readable name for this host (e.g., "github", "memory").
    fn name(&self) -> &str;

    // ── Reads ──

    async fn repository(&self, repo: &RepoRef) -> RepoResult<RepositoryInfo>;

    async fn branch(&self, repo: &RepoRef, branch: &str) -> RepoResult<BranchInfo>;

    async fn list_files(&self, repo: &RepoRef, branch: &str) -> RepoResult<Vec<FileEntry>>;

    async fn file(&self, repo: &RepoRef, branch: &str, path: &str) -> RepoResult<FileContent>;

    async fn issue(&self, repo: &RepoRef, number: u64) -> RepoResult<Issue>;

    /// Open issues only; pull requests are excluded.
    async fn list_open_issues(&self, repo: &RepoRef) -> RepoResult<Vec<Issue>>;

    async fn comments(&self, repo: &RepoRef, number: u64) -> RepoResult<Vec<Comment>>;

    async fn pull_request(&self, repo: &RepoRef, number: u64) -> RepoResult<PullRequest>;

    async fn pull_request_files(&self, repo: &RepoRef, number: u64)
    -> RepoResult<Vec<ChangedFile>>;

    /// The open pull request whose source branch is `head`, if any.
    async fn find_open_pull_request(
        &self,
        repo: &RepoRef,
        head: &str,
    ) -> RepoResult<Option<PullRequest>>;

    // ── Writes ──

    async fn create_comment(&self, repo: &RepoRef, number: u64, body: &str)
    -> RepoResult<Comment>;

    async fn create_issue(&self, repo: &RepoRef, issue: &NewIssue) -> RepoResult<Issue>;

    async fn close_issue(&self, repo: &RepoRef, number: u64) -> RepoResult<Issue>;

    async fn add_labels(&self, repo: &RepoRef, number: u64, labels: &[String])
    -> RepoResult<Vec<String>>;

    /// Create `name` pointing at `from_sha`.
    async fn create_branch(&self, repo: &RepoRef, name: &str, from_sha: &str)
    -> RepoResult<BranchInfo>;

    /// Create or update one file on `branch`. `sha` is required when the file exists.
    async fn put_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> RepoResult<()>;

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pull: &NewPullRequest,
    ) -> RepoResult<PullRequest>;
}
