//! Prompt templates: system identity, decision protocol, task guidelines.

use std::fmt;

use forgepilot_core::decision::DECISION_SCHEMA_VERSION;

/// Default identity, used unless the configuration overrides it.
pub const DEFAULT_IDENTITY: &str = "\
You are Forgepilot, an engineering agent working on a GitHub repository. You specialize in:
- GitHub automation and repository management
- Code analysis and suggestions
- Development workflow optimization
- Problem-solving and technical guidance

Give accurate, practical answers. Follow best practices and keep security in mind.";

/// The decision block format the response parser accepts.
pub fn decision_protocol() -> String {
    format!(
        r#"## Response protocol (version {v})

End every response with exactly one fenced code block tagged `decision` that holds a single JSON object. Anything before the block is free-form reasoning.

```decision
{{"version": {v}, "type": "complete", "summary": "what was done"}}
```

`type` is one of:
- "complete": the task is finished. Fields: `summary`.
- "actions": change the repository. Fields: `actions`, a non-empty list executed in order.
- "need_context": more material is needed first. Fields: `paths`, `issues`, `pull_requests`, `reason`.

Each action has a `kind`:
- comment_on_issue {{number, body}}
- comment_on_pull_request {{number, body}}
- create_issue {{title, body, labels}}
- close_issue {{number, comment?}}
- add_labels {{number, labels}}
- open_pull_request {{title, body, head, base?, changes: [{{path, content}}], commit_message?}}

Feedback after each turn reports what was applied. Never repeat an action reported as applied; reply "complete" once the task is done."#,
        v = DECISION_SCHEMA_VERSION
    )
}

/// Identity followed by the decision protocol.
pub fn system_prompt(identity_override: Option<&str>) -> String {
    let identity = identity_override.unwrap_or(DEFAULT_IDENTITY);
    format!("{}\n\n{}", identity.trim_end(), decision_protocol())
}

/// What kind of work a task asks for, inferred from its wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    General,
    CodeReview,
    Debugging,
    Optimization,
}

const REVIEW_WORDS: &[&str] = &["review", "lgtm", "approve", "critique", "audit"];
const DEBUG_WORDS: &[&str] = &[
    "debug", "bug", "error", "crash", "panic", "fail", "exception", "traceback", "broken", "regression",
];
const OPTIMIZE_WORDS: &[&str] = &[
    "optimi", "performance", "perf", "faster", "speed", "slow", "latency", "throughput", "memory",
];

impl TaskKind {
    /// Infer from word prefixes; review outranks debugging outranks optimization.
    pub fn infer(task: &str) -> Self {
        let words: Vec<String> = task
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let mentions = |stems: &[&str]| {
            words
                .iter()
                .any(|w| stems.iter().any(|stem| w.starts_with(stem)))
        };

        if mentions(REVIEW_WORDS) {
            Self::CodeReview
        } else if mentions(DEBUG_WORDS) {
            Self::Debugging
        } else if mentions(OPTIMIZE_WORDS) {
            Self::Optimization
        } else {
            Self::General
        }
    }

    pub fn guidelines(self) -> &'static [&'static str] {
        match self {
            Self::General => &[
                "Provide clear, step-by-step reasoning before deciding.",
                "Highlight important considerations.",
                "Suggest best practices where relevant.",
            ],
            Self::CodeReview => &[
                "Review the changed code for correctness, security and readability.",
                "Reference files and lines when raising an issue.",
                "Approve plainly when nothing needs to change.",
            ],
            Self::Debugging => &[
                "Identify the root cause before proposing a fix.",
                "Quote exact error messages or outputs from the context.",
                "Keep fixes minimal and explain how to verify them.",
            ],
            Self::Optimization => &[
                "State the criteria being optimized.",
                "Prefer measurable improvements over speculative ones.",
                "Note trade-offs the change introduces.",
            ],
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::General => "general",
            Self::CodeReview => "code review",
            Self::Debugging => "debugging",
            Self::Optimization => "optimization",
        };
        f.write_str(name)
    }
}

/// The task section of the user message.
pub fn task_section(task: &str, kind: TaskKind) -> String {
    let mut section = format!("TASK:\n{task}\n\nGUIDELINES ({kind}):");
    for (i, line) in kind.guidelines().iter().enumerate() {
        section.push_str(&format!("\n{}. {line}", i + 1));
    }
    section
}
