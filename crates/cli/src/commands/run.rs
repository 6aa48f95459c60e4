//! `forgepilot run`: Execute one task against a repository.

use std::sync::Arc;

use clap::Args;
use forgepilot_agent::Orchestrator;
use forgepilot_config::AppConfig;
use forgepilot_core::repository::RepositoryHost;
use forgepilot_core::run::{RunOutcome, RunStatus};
use forgepilot_core::task::{RepoRef, Task, TaskTarget};
use forgepilot_github::GitHubClient;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// What the agent should do
    pub task: String,

    /// Target repository as owner/name
    #[arg(short, long)]
    pub repo: String,

    /// Branch to read from (defaults to the repository's default branch)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Target issue number
    #[arg(long)]
    pub issue: Option<u64>,

    /// Target pull request number
    #[arg(long)]
    pub pr: Option<u64>,

    /// Paths to focus on (repeatable)
    #[arg(long = "path")]
    pub paths: Vec<String>,

    /// Override agent.max_turns
    #[arg(long)]
    pub max_turns: Option<u32>,
}

impl RunArgs {
    pub fn to_task(&self) -> Result<Task, Box<dyn std::error::Error>> {
        let repo: RepoRef = self.repo.parse()?;
        let mut target = TaskTarget::new(repo);
        if let Some(branch) = &self.branch {
            target = target.with_branch(branch);
        }
        if let Some(issue) = self.issue {
            target = target.with_issue(issue);
        }
        if let Some(pr) = self.pr {
            target = target.with_pull_request(pr);
        }
        for path in &self.paths {
            target = target.with_path(path);
        }
        Ok(Task::new(&self.task, target)?)
    }
}

pub async fn run(args: RunArgs, config: AppConfig) -> Result<RunStatus, Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No model API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    FORGEPILOT_API_KEY=...   (generic)");
        eprintln!("    ANTHROPIC_API_KEY=...    (Anthropic)");
        eprintln!("    OPENAI_API_KEY=...       (OpenAI-compatible)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }
    if !config.has_github_token() {
        warn!("No GITHUB_TOKEN set; only public repositories can be read and no actions can be applied");
    }

    let task = args.to_task()?;

    let router = forgepilot_providers::router::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;
    let host: Arc<dyn RepositoryHost> = Arc::new(GitHubClient::from_config(&config));

    let mut orchestrator = Orchestrator::new(provider, host, &config);
    if let Some(max_turns) = args.max_turns {
        orchestrator = orchestrator.with_max_turns(max_turns);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Interrupted, finishing the current step...");
            on_signal.cancel();
        }
    });

    println!();
    println!("  Task:      {}", task.description());
    println!("  Repo:      {}", task.target().repository);
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", orchestrator.settings().model);
    println!();

    let outcome = orchestrator.run(task, cancel).await;
    print!("{}", render_outcome(&outcome));
    Ok(outcome.status)
}

/// Human-readable run report.
pub fn render_outcome(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("  Status:    {}\n", outcome.status));
    out.push_str(&format!("  Turns:     {}\n", outcome.turns));
    if let Some(reason) = &outcome.reason {
        out.push_str(&format!("  Reason:    {}\n", reason.message));
    }
    if let Some(summary) = &outcome.summary {
        out.push_str(&format!("  Summary:   {summary}\n"));
    }
    let actions = outcome.action_summaries();
    if actions.is_empty() {
        out.push_str("  Actions:   none\n");
    } else {
        out.push_str("  Actions:\n");
        for action in actions {
            out.push_str(&format!("    - {action}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgepilot_core::run::{FailureKind, FailureReason};
    use forgepilot_core::task::TaskId;

    fn args(repo: &str) -> RunArgs {
        RunArgs {
            task: "Review the pull request".into(),
            repo: repo.into(),
            branch: None,
            issue: None,
            pr: Some(7),
            paths: vec!["src/lib.rs".into()],
            max_turns: None,
        }
    }

    #[test]
    fn builds_task_from_args() {
        let task = args("octo/demo").to_task().unwrap();
        assert_eq!(task.target().repository, RepoRef::new("octo", "demo"));
        assert_eq!(task.target().pull_request, Some(7));
        assert_eq!(task.target().paths, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn rejects_malformed_repo() {
        assert!(args("just-a-name").to_task().is_err());
    }

    #[test]
    fn renders_failed_outcome() {
        let outcome = RunOutcome {
            task_id: TaskId::new(),
            status: RunStatus::Failed,
            reason: Some(FailureReason {
                kind: FailureKind::TurnLimitExceeded,
                message: "Turn limit exceeded after 3 turns".into(),
            }),
            summary: None,
            turns: 3,
            actions: vec![],
        };
        let text = render_outcome(&outcome);
        assert!(text.contains("Status:    Failed"));
        assert!(text.contains("Turn limit exceeded"));
        assert!(text.contains("Actions:   none"));
    }
}
