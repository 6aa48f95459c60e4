//! In-memory repository host.
//!
//! Holds one repository entirely in process. Every write is logged, and
//! failures can be injected per call, which makes it the double of choice
//! for orchestrator and executor tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use forgepilot_core::error::RepoError;
use forgepilot_core::repository::*;
use forgepilot_core::task::RepoRef;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    sha: String,
    modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredBranch {
    head_sha: String,
    files: BTreeMap<String, StoredFile>,
}

#[derive(Debug)]
struct State {
    branches: BTreeMap<String, StoredBranch>,
    issues: BTreeMap<u64, Issue>,
    pulls: BTreeMap<u64, (PullRequest, Vec<ChangedFile>)>,
    comments: BTreeMap<u64, Vec<Comment>>,
    next_comment_id: u64,
    clock: DateTime<Utc>,
    writes: Vec<String>,
    write_failures: VecDeque<RepoError>,
    failing_paths: BTreeSet<String>,
}

impl State {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn next_number(&self) -> u64 {
        let issues = self.issues.keys().next_back().copied().unwrap_or(0);
        let pulls = self.pulls.keys().next_back().copied().unwrap_or(0);
        issues.max(pulls) + 1
    }

    /// Consume one injected failure, if any.
    fn check_write(&mut self) -> RepoResult<()> {
        match self.write_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A single repository held in memory.
pub struct InMemoryHost {
    repo: RepoRef,
    default_branch: String,
    state: Mutex<State>,
}

fn content_sha(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl InMemoryHost {
    /// An empty repository with one branch.
    pub fn new(repo: RepoRef, default_branch: impl Into<String>) -> Self {
        let default_branch = default_branch.into();
        let mut branches = BTreeMap::new();
        branches.insert(
            default_branch.clone(),
            StoredBranch {
                head_sha: content_sha(&default_branch),
                files: BTreeMap::new(),
            },
        );
        Self {
            repo,
            default_branch,
            state: Mutex::new(State {
                branches,
                issues: BTreeMap::new(),
                pulls: BTreeMap::new(),
                comments: BTreeMap::new(),
                next_comment_id: 1,
                clock: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
                writes: Vec::new(),
                write_failures: VecDeque::new(),
                failing_paths: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Builders ──

    /// Add a file on the default branch.
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.with_file_modified(path, content, None)
    }

    pub fn with_file_modified(
        self,
        path: impl Into<String>,
        content: impl Into<String>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        {
            let mut state = self.lock();
            let content = content.into();
            if let Some(branch) = state.branches.get_mut(&self.default_branch) {
                branch.files.insert(
                    path.into(),
                    StoredFile {
                        sha: content_sha(&content),
                        content,
                        modified,
                    },
                );
            }
        }
        self
    }

    pub fn with_issue(self, number: u64, title: impl Into<String>, body: impl Into<String>) -> Self {
        {
            let mut state = self.lock();
            let updated_at = state.tick();
            state.issues.insert(
                number,
                Issue {
                    number,
                    title: title.into(),
                    state: IssueState::Open,
                    author: "octocat".into(),
                    labels: Vec::new(),
                    body: body.into(),
                    updated_at,
                },
            );
        }
        self
    }

    /// Add an open pull request from `head` into the default branch.
    pub fn with_pull_request(
        self,
        number: u64,
        title: impl Into<String>,
        head: impl Into<String>,
        files: Vec<ChangedFile>,
    ) -> Self {
        {
            let mut state = self.lock();
            let updated_at = state.tick();
            let pull = PullRequest {
                number,
                title: title.into(),
                state: IssueState::Open,
                author: "octocat".into(),
                head: head.into(),
                base: self.default_branch.clone(),
                body: String::new(),
                updated_at,
                html_url: Some(format!("https://github.com/{}/pull/{number}", self.repo)),
            };
            state.pulls.insert(number, (pull, files));
        }
        self
    }

    pub fn with_comment(self, number: u64, author: impl Into<String>, body: impl Into<String>) -> Self {
        {
            let mut state = self.lock();
            let created_at = state.tick();
            let id = state.next_comment_id;
            state.next_comment_id += 1;
            state.comments.entry(number).or_default().push(Comment {
                id,
                author: author.into(),
                body: body.into(),
                created_at,
            });
        }
        self
    }

    // ── Failure injection ──

    /// The next `errors.len()` writes fail with these errors, in order.
    pub fn fail_next_writes(&self, errors: Vec<RepoError>) {
        self.lock().write_failures.extend(errors);
    }

    /// Reading `path` fails with a server error.
    pub fn fail_reads_of(&self, path: impl Into<String>) {
        self.lock().failing_paths.insert(path.into());
    }

    // ── Inspection ──

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn comments_on(&self, number: u64) -> Vec<Comment> {
        self.lock().comments.get(&number).cloned().unwrap_or_default()
    }

    pub fn file_on(&self, branch: &str, path: &str) -> Option<String> {
        self.lock()
            .branches
            .get(branch)
            .and_then(|b| b.files.get(path))
            .map(|f| f.content.clone())
    }

    pub fn issue_snapshot(&self, number: u64) -> Option<Issue> {
        self.lock().issues.get(&number).cloned()
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.lock().pulls.values().map(|(p, _)| p.clone()).collect()
    }

    fn check_repo(&self, repo: &RepoRef) -> RepoResult<()> {
        if *repo == self.repo {
            Ok(())
        } else {
            Err(RepoError::NotFound(format!("repository {repo}")))
        }
    }
}

#[async_trait]
impl RepositoryHost for InMemoryHost {
    fn name(&self) -> &str {
        "memory"
    }

    async fn repository(&self, repo: &RepoRef) -> RepoResult<RepositoryInfo> {
        self.check_repo(repo)?;
        Ok(RepositoryInfo {
            repo: repo.clone(),
            default_branch: self.default_branch.clone(),
            description: None,
        })
    }

    async fn branch(&self, repo: &RepoRef, branch: &str) -> RepoResult<BranchInfo> {
        self.check_repo(repo)?;
        self.lock()
            .branches
            .get(branch)
            .map(|b| BranchInfo {
                name: branch.to_string(),
                head_sha: b.head_sha.clone(),
            })
            .ok_or_else(|| RepoError::NotFound(format!("branch {branch}")))
    }

    async fn list_files(&self, repo: &RepoRef, branch: &str) -> RepoResult<Vec<FileEntry>> {
        self.check_repo(repo)?;
        let state = self.lock();
        let stored = state
            .branches
            .get(branch)
            .ok_or_else(|| RepoError::NotFound(format!("branch {branch}")))?;
        Ok(stored
            .files
            .iter()
            .map(|(path, file)| FileEntry {
                path: path.clone(),
                size: file.content.len() as u64,
                last_modified: file.modified,
            })
            .collect())
    }

    async fn file(&self, repo: &RepoRef, branch: &str, path: &str) -> RepoResult<FileContent> {
        self.check_repo(repo)?;
        let state = self.lock();
        if state.failing_paths.contains(path) {
            return Err(RepoError::Server { status: 500 });
        }
        state
            .branches
            .get(branch)
            .and_then(|b| b.files.get(path))
            .map(|f| FileContent {
                path: path.to_string(),
                content: f.content.clone(),
                sha: f.sha.clone(),
            })
            .ok_or_else(|| RepoError::NotFound(format!("file {path} on {branch}")))
    }

    async fn issue(&self, repo: &RepoRef, number: u64) -> RepoResult<Issue> {
        self.check_repo(repo)?;
        self.lock()
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("issue #{number}")))
    }

    async fn list_open_issues(&self, repo: &RepoRef) -> RepoResult<Vec<Issue>> {
        self.check_repo(repo)?;
        Ok(self
            .lock()
            .issues
            .values()
            .filter(|i| i.state == IssueState::Open)
            .cloned()
            .collect())
    }

    async fn comments(&self, repo: &RepoRef, number: u64) -> RepoResult<Vec<Comment>> {
        self.check_repo(repo)?;
        let state = self.lock();
        if !state.issues.contains_key(&number) && !state.pulls.contains_key(&number) {
            return Err(RepoError::NotFound(format!("#{number}")));
        }
        Ok(state.comments.get(&number).cloned().unwrap_or_default())
    }

    async fn pull_request(&self, repo: &RepoRef, number: u64) -> RepoResult<PullRequest> {
        self.check_repo(repo)?;
        self.lock()
            .pulls
            .get(&number)
            .map(|(p, _)| p.clone())
            .ok_or_else(|| RepoError::NotFound(format!("pull request #{number}")))
    }

    async fn pull_request_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> RepoResult<Vec<ChangedFile>> {
        self.check_repo(repo)?;
        self.lock()
            .pulls
            .get(&number)
            .map(|(_, files)| files.clone())
            .ok_or_else(|| RepoError::NotFound(format!("pull request #{number}")))
    }

    async fn find_open_pull_request(
        &self,
        repo: &RepoRef,
        head: &str,
    ) -> RepoResult<Option<PullRequest>> {
        self.check_repo(repo)?;
        Ok(self
            .lock()
            .pulls
            .values()
            .map(|(p, _)| p)
            .find(|p| p.state == IssueState::Open && p.head == head)
            .cloned())
    }

    async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> RepoResult<Comment> {
        self.check_repo(repo)?;
        let mut state = self.lock();
        state.check_write()?;
        if !state.issues.contains_key(&number) && !state.pulls.contains_key(&number) {
            return Err(RepoError::NotFound(format!("#{number}")));
        }
        let created_at = state.tick();
        let id = state.next_comment_id;
        state.next_comment_id += 1;
        let comment = Comment {
            id,
            author: "forgepilot".into(),
            body: body.to_string(),
            created_at,
        };
        state.comments.entry(number).or_default().push(comment.clone());
        state.writes.push(format!("comment #{number}"));
        Ok(comment)
    }

    async fn create_issue(&self, repo: &RepoRef, issue: &NewIssue) -> RepoResult<Issue> {
        self.check_repo(repo)?;
        let mut state = self.lock();
        state.check_write()?;
        let number = state.next_number();
        let updated_at = state.tick();
        let created = Issue {
            number,
            title: issue.title.clone(),
            state: IssueState::Open,
            author: "forgepilot".into(),
            labels: issue.labels.clone(),
            body: issue.body.clone(),
            updated_at,
        };
        state.issues.insert(number, created.clone());
        state.writes.push(format!("create issue #{number}"));
        Ok(created)
    }

    async fn close_issue(&self, repo: &RepoRef, number: u64) -> RepoResult<Issue> {
        self.check_repo(repo)?;
        let mut state = self.lock();
        state.check_write()?;
        let updated_at = state.tick();
        let issue = state
            .issues
            .get_mut(&number)
            .ok_or_else(|| RepoError::NotFound(format!("issue #{number}")))?;
        issue.state = IssueState::Closed;
        issue.updated_at = updated_at;
        let closed = issue.clone();
        state.writes.push(format!("close issue #{number}"));
        Ok(closed)
    }

    async fn add_labels(
        &self,
        repo: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> RepoResult<Vec<String>> {
        self.check_repo(repo)?;
        let mut state = self.lock();
        state.check_write()?;
        let issue = state
            .issues
            .get_mut(&number)
            .ok_or_else(|| RepoError::NotFound(format!("issue #{number}")))?;
        for label in labels {
            if !issue.labels.contains(label) {
                issue.labels.push(label.clone());
            }
        }
        let all = issue.labels.clone();
        state.writes.push(format!("label #{number}"));
        Ok(all)
    }

    async fn create_branch(
        &self,
        repo: &RepoRef,
        name: &str,
        from_sha: &str,
    ) -> RepoResult<BranchInfo> {
        self.check_repo(repo)?;
        let mut state = self.lock();
        state.check_write()?;
        if state.branches.contains_key(name) {
            return Err(RepoError::Invalid(format!("branch {name} already exists")));
        }
        let source = state
            .branches
            .values()
            .find(|b| b.head_sha == from_sha)
            .cloned()
            .ok_or_else(|| RepoError::Invalid(format!("unknown sha {from_sha}")))?;
        let head_sha = content_sha(&format!("{name}:{from_sha}"));
        state.branches.insert(
            name.to_string(),
            StoredBranch {
                head_sha: head_sha.clone(),
                files: source.files,
            },
        );
        state.writes.push(format!("create branch {name}"));
        Ok(BranchInfo {
            name: name.to_string(),
            head_sha,
        })
    }

    async fn put_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        content: &str,
        _message: &str,
        sha: Option<&str>,
    ) -> RepoResult<()> {
        self.check_repo(repo)?;
        let mut state = self.lock();
        state.check_write()?;
        let modified = Some(state.tick());
        let stored = state
            .branches
            .get_mut(branch)
            .ok_or_else(|| RepoError::NotFound(format!("branch {branch}")))?;
        if let Some(existing) = stored.files.get(path) {
            if sha != Some(existing.sha.as_str()) {
                return Err(RepoError::Invalid(format!("sha mismatch for {path}")));
            }
        }
        stored.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                sha: content_sha(content),
                modified,
            },
        );
        stored.head_sha = content_sha(&format!("{}:{path}", stored.head_sha));
        state.writes.push(format!("write {branch}:{path}"));
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pull: &NewPullRequest,
    ) -> RepoResult<PullRequest> {
        self.check_repo(repo)?;
        let mut state = self.lock();
        state.check_write()?;
        if !state.branches.contains_key(&pull.head) {
            return Err(RepoError::Invalid(format!("unknown head {}", pull.head)));
        }
        let number = state.next_number();
        let updated_at = state.tick();
        let created = PullRequest {
            number,
            title: pull.title.clone(),
            state: IssueState::Open,
            author: "forgepilot".into(),
            head: pull.head.clone(),
            base: pull.base.clone(),
            body: pull.body.clone(),
            updated_at,
            html_url: Some(format!("https://github.com/{}/pull/{number}", self.repo)),
        };
        state.pulls.insert(number, (created.clone(), Vec::new()));
        state.writes.push(format!("open pull request #{number}"));
        Ok(created)
    }
}
