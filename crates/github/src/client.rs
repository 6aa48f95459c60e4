//! GitHub REST v3 implementation of [`RepositoryHost`].
//!
//! - Bearer token authentication (optional for public reads)
//! - `application/vnd.github+json` media type, pinned API version
//! - File content travels base64-encoded
//! - All requests share one [`RateLimiter`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use forgepilot_core::error::RepoError;
use forgepilot_core::ratelimit::RateLimiter;
use forgepilot_core::repository::*;
use forgepilot_core::task::RepoRef;
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

const API_VERSION: &str = "2022-11-28";
const PER_PAGE: &str = "100";
/// Pagination stops here even if GitHub offers more pages.
const MAX_PAGES: usize = 50;

/// GitHub REST client.
pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    user_agent: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            user_agent: format!("forgepilot/{}", env!("CARGO_PKG_VERSION")),
            client,
            limiter: Arc::new(RateLimiter::default()),
        }
    }

    /// Build from the application configuration.
    pub fn from_config(config: &forgepilot_config::AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.rate_limit.request_timeout())
            .build()
            .unwrap_or_default();

        Self {
            api_url: config.github.api_url.trim_end_matches('/').to_string(),
            token: config.github.token.clone(),
            user_agent: config.github.user_agent.clone(),
            client,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit.max_concurrent,
                config.rate_limit.min_interval(),
            )),
        }
    }

    /// Share a limiter with other clients.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// `{api_url}/repos/{owner}/{name}/{tail...}` with each segment escaped.
    fn endpoint(&self, repo: &RepoRef, tail: &[&str]) -> RepoResult<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| RepoError::Invalid(format!("bad api_url '{}': {e}", self.api_url)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RepoError::Invalid(format!("bad api_url '{}'", self.api_url)))?;
            segments
                .pop_if_empty()
                .extend(["repos", repo.owner.as_str(), repo.name.as_str()])
                .extend(tail);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", &self.user_agent)
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder, what: &str) -> RepoResult<reqwest::Response> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| RepoError::Network("rate limiter closed".into()))?;

        debug!(request = what, "GitHub request");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RepoError::Timeout(e.to_string())
            } else {
                RepoError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let err = status_error(status, response.headers(), what);
        let body = response.text().await.unwrap_or_default();
        warn!(status, request = what, body = %body, "GitHub API error");
        Err(err)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> RepoResult<T> {
        self.execute(builder, what)
            .await?
            .json()
            .await
            .map_err(|e| RepoError::Decode(format!("{what}: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, what: &str) -> RepoResult<T> {
        self.json(self.request(Method::GET, url), what).await
    }

    /// GET a list endpoint, following `Link: rel="next"` across pages.
    async fn get_paged<T: DeserializeOwned>(&self, url: Url, what: &str) -> RepoResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;
        while let Some(url) = next.take() {
            if pages == MAX_PAGES {
                warn!(request = what, pages, "Pagination limit reached, list is incomplete");
                break;
            }
            pages += 1;
            let response = self.execute(self.request(Method::GET, url), what).await?;
            next = next_page(response.headers());
            let page: Vec<T> = response
                .json()
                .await
                .map_err(|e| RepoError::Decode(format!("{what}: {e}")))?;
            items.extend(page);
        }
        if pages > 1 {
            debug!(request = what, pages, items = items.len(), "Paged listing");
        }
        Ok(items)
    }
}

/// The `rel="next"` target of a `Link` header, if any.
pub fn next_page(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.trim().split_once(';')?;
        let is_next = params.split(';').any(|param| {
            param
                .trim()
                .strip_prefix("rel=")
                .map(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"))
                .unwrap_or(false)
        });
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

/// Map a non-success status to the repository error taxonomy.
///
/// GitHub signals primary rate limits as 403 with `x-ratelimit-remaining: 0`
/// and secondary limits as 403/429 with `retry-after`.
pub fn status_error(status: u16, headers: &HeaderMap, what: &str) -> RepoError {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let retry_after = header(RETRY_AFTER.as_str()).and_then(|v| v.trim().parse::<u64>().ok());
    let exhausted = header("x-ratelimit-remaining") == Some("0");

    match status {
        401 => RepoError::Unauthorized(what.to_string()),
        403 | 429 if exhausted || retry_after.is_some() || status == 429 => {
            let until_reset = header("x-ratelimit-reset")
                .and_then(|v| v.parse::<i64>().ok())
                .map(|reset| (reset - Utc::now().timestamp()).max(1) as u64);
            RepoError::RateLimited {
                retry_after_secs: retry_after.or(until_reset).unwrap_or(60),
            }
        }
        403 => RepoError::Forbidden(what.to_string()),
        404 => RepoError::NotFound(what.to_string()),
        409 | 422 => RepoError::Invalid(what.to_string()),
        500..=599 => RepoError::Server { status },
        _ => RepoError::Invalid(format!("{what} (status {status})")),
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn repository(&self, repo: &RepoRef) -> RepoResult<RepositoryInfo> {
        let api: ApiRepo = self
            .get(self.endpoint(repo, &[])?, &format!("repository {repo}"))
            .await?;
        Ok(RepositoryInfo {
            repo: repo.clone(),
            default_branch: api.default_branch,
            description: api.description,
        })
    }

    async fn branch(&self, repo: &RepoRef, branch: &str) -> RepoResult<BranchInfo> {
        let api: ApiBranch = self
            .get(
                self.endpoint(repo, &["branches", branch])?,
                &format!("branch {branch}"),
            )
            .await?;
        Ok(BranchInfo {
            name: api.name,
            head_sha: api.commit.sha,
        })
    }

    async fn list_files(&self, repo: &RepoRef, branch: &str) -> RepoResult<Vec<FileEntry>> {
        let mut url = self.endpoint(repo, &["git", "trees", branch])?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let api: ApiTree = self.get(url, &format!("tree {branch}")).await?;
        if api.truncated {
            warn!(repo = %repo, branch, "Repository tree truncated by GitHub");
        }
        Ok(api
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| FileEntry {
                path: entry.path,
                size: entry.size.unwrap_or(0),
                last_modified: None,
            })
            .collect())
    }

    async fn file(&self, repo: &RepoRef, branch: &str, path: &str) -> RepoResult<FileContent> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.endpoint(repo, &segments)?;
        url.query_pairs_mut().append_pair("ref", branch);

        let api: ApiContent = self.get(url, &format!("file {path}")).await?;
        let content = match (api.content, api.encoding.as_deref()) {
            (Some(encoded), Some("base64")) => decode_base64(&encoded)?,
            (Some(raw), _) => raw,
            (None, _) => String::new(),
        };
        Ok(FileContent {
            path: api.path,
            content,
            sha: api.sha,
        })
    }

    async fn issue(&self, repo: &RepoRef, number: u64) -> RepoResult<Issue> {
        let n = number.to_string();
        let api: ApiIssue = self
            .get(
                self.endpoint(repo, &["issues", &n])?,
                &format!("issue #{number}"),
            )
            .await?;
        Ok(api.into())
    }

    async fn list_open_issues(&self, repo: &RepoRef) -> RepoResult<Vec<Issue>> {
        let mut url = self.endpoint(repo, &["issues"])?;
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("per_page", PER_PAGE);
        let api: Vec<ApiIssue> = self.get_paged(url, "open issues").await?;
        Ok(api
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(Issue::from)
            .collect())
    }

    async fn comments(&self, repo: &RepoRef, number: u64) -> RepoResult<Vec<Comment>> {
        let n = number.to_string();
        let mut url = self.endpoint(repo, &["issues", &n, "comments"])?;
        url.query_pairs_mut().append_pair("per_page", PER_PAGE);
        let api: Vec<ApiComment> = self
            .get_paged(url, &format!("comments on #{number}"))
            .await?;
        Ok(api.into_iter().map(Comment::from).collect())
    }

    async fn pull_request(&self, repo: &RepoRef, number: u64) -> RepoResult<PullRequest> {
        let n = number.to_string();
        let api: ApiPull = self
            .get(
                self.endpoint(repo, &["pulls", &n])?,
                &format!("pull request #{number}"),
            )
            .await?;
        Ok(api.into())
    }

    async fn pull_request_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> RepoResult<Vec<ChangedFile>> {
        let n = number.to_string();
        let mut url = self.endpoint(repo, &["pulls", &n, "files"])?;
        url.query_pairs_mut().append_pair("per_page", PER_PAGE);
        let api: Vec<ApiPullFile> = self
            .get_paged(url, &format!("files of pull request #{number}"))
            .await?;
        Ok(api
            .into_iter()
            .map(|f| ChangedFile {
                path: f.filename,
                status: f.status,
                patch: f.patch,
            })
            .collect())
    }

    async fn find_open_pull_request(
        &self,
        repo: &RepoRef,
        head: &str,
    ) -> RepoResult<Option<PullRequest>> {
        let mut url = self.endpoint(repo, &["pulls"])?;
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("head", &format!("{}:{head}", repo.owner));
        let api: Vec<ApiPull> = self
            .get(url, &format!("open pull requests from {head}"))
            .await?;
        Ok(api.into_iter().next().map(PullRequest::from))
    }

    async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> RepoResult<Comment> {
        let n = number.to_string();
        let builder = self
            .request(
                Method::POST,
                self.endpoint(repo, &["issues", &n, "comments"])?,
            )
            .json(&serde_json::json!({ "body": body }));
        let api: ApiComment = self
            .json(builder, &format!("comment on #{number}"))
            .await?;
        Ok(api.into())
    }

    async fn create_issue(&self, repo: &RepoRef, issue: &NewIssue) -> RepoResult<Issue> {
        let builder = self
            .request(Method::POST, self.endpoint(repo, &["issues"])?)
            .json(&serde_json::json!({
                "title": issue.title,
                "body": issue.body,
                "labels": issue.labels,
            }));
        let api: ApiIssue = self.json(builder, "create issue").await?;
        Ok(api.into())
    }

    async fn close_issue(&self, repo: &RepoRef, number: u64) -> RepoResult<Issue> {
        let n = number.to_string();
        let builder = self
            .request(Method::PATCH, self.endpoint(repo, &["issues", &n])?)
            .json(&serde_json::json!({ "state": "closed" }));
        let api: ApiIssue = self.json(builder, &format!("close #{number}")).await?;
        Ok(api.into())
    }

    async fn add_labels(
        &self,
        repo: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> RepoResult<Vec<String>> {
        let n = number.to_string();
        let builder = self
            .request(
                Method::POST,
                self.endpoint(repo, &["issues", &n, "labels"])?,
            )
            .json(&serde_json::json!({ "labels": labels }));
        let api: Vec<ApiLabel> = self.json(builder, &format!("label #{number}")).await?;
        Ok(api.into_iter().map(|l| l.name).collect())
    }

    async fn create_branch(
        &self,
        repo: &RepoRef,
        name: &str,
        from_sha: &str,
    ) -> RepoResult<BranchInfo> {
        let builder = self
            .request(Method::POST, self.endpoint(repo, &["git", "refs"])?)
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{name}"),
                "sha": from_sha,
            }));
        let api: ApiRef = self
            .json(builder, &format!("create branch {name}"))
            .await?;
        Ok(BranchInfo {
            name: name.to_string(),
            head_sha: api.object.sha,
        })
    }

    async fn put_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> RepoResult<()> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut body = serde_json::json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::json!(sha);
        }
        let builder = self
            .request(Method::PUT, self.endpoint(repo, &segments)?)
            .json(&body);
        self.execute(builder, &format!("write {path}")).await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pull: &NewPullRequest,
    ) -> RepoResult<PullRequest> {
        let builder = self
            .request(Method::POST, self.endpoint(repo, &["pulls"])?)
            .json(&serde_json::json!({
                "title": pull.title,
                "body": pull.body,
                "head": pull.head,
                "base": pull.base,
            }));
        let api: ApiPull = self.json(builder, "create pull request").await?;
        Ok(api.into())
    }
}

/// GitHub wraps base64 content at 60 columns.
fn decode_base64(encoded: &str) -> RepoResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| RepoError::Decode(format!("file content: {e}")))?;
    String::from_utf8(bytes).map_err(|_| RepoError::Decode("file is not UTF-8 text".into()))
}

fn issue_state(state: &str) -> IssueState {
    if state.eq_ignore_ascii_case("closed") {
        IssueState::Closed
    } else {
        IssueState::Open
    }
}

// --- GitHub API types ---

#[derive(Debug, Deserialize)]
struct ApiRepo {
    default_branch: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiBranch {
    name: String,
    commit: ApiSha,
}

#[derive(Debug, Deserialize)]
struct ApiSha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    object: ApiSha,
}

#[derive(Debug, Deserialize)]
struct ApiTree {
    tree: Vec<ApiTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct ApiTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiContent {
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    state: String,
    user: ApiUser,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    body: Option<String>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<ApiIssue> for Issue {
    fn from(api: ApiIssue) -> Self {
        Self {
            number: api.number,
            title: api.title,
            state: issue_state(&api.state),
            author: api.user.login,
            labels: api.labels.into_iter().map(|l| l.name).collect(),
            body: api.body.unwrap_or_default(),
            updated_at: api.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiComment {
    id: u64,
    user: ApiUser,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ApiComment> for Comment {
    fn from(api: ApiComment) -> Self {
        Self {
            id: api.id,
            author: api.user.login,
            body: api.body.unwrap_or_default(),
            created_at: api.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiBranchRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    number: u64,
    title: String,
    state: String,
    user: ApiUser,
    head: ApiBranchRef,
    base: ApiBranchRef,
    #[serde(default)]
    body: Option<String>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    html_url: Option<String>,
}

impl From<ApiPull> for PullRequest {
    fn from(api: ApiPull) -> Self {
        Self {
            number: api.number,
            title: api.title,
            state: issue_state(&api.state),
            author: api.user.login,
            head: api.head.name,
            base: api.base.name,
            body: api.body.unwrap_or_default(),
            updated_at: api.updated_at,
            html_url: api.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiPullFile {
    filename: String,
    status: String,
    #[serde(default)]
    patch: Option<String>,
}
