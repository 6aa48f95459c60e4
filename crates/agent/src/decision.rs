//! Decision block parser.
//!
//! The model ends each response with one fenced block tagged `decision`
//! holding a versioned JSON object. Anything that is not exactly one valid
//! block becomes [`Decision::Unparseable`], never a silent no-op.

use forgepilot_core::action::Action;
use forgepilot_core::decision::{ContextRequest, DECISION_SCHEMA_VERSION, Decision, ModelResponse};
use forgepilot_core::provider::ProviderResponse;
use serde::Deserialize;

const FENCE_OPEN: &str = "```decision";
const FENCE_CLOSE: &str = "```";

#[derive(Debug, Deserialize)]
struct RawDecision {
    version: u32,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    actions: Option<Vec<Action>>,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    issues: Vec<u64>,
    #[serde(default)]
    pull_requests: Vec<u64>,
    #[serde(default)]
    reason: String,
}

/// Bodies of every `decision` block in `text`, or an error for an unclosed fence.
fn decision_blocks(text: &str) -> Result<Vec<String>, String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(body) = current.as_mut() {
            if trimmed == FENCE_CLOSE {
                blocks.push(body.join("\n"));
                current = None;
            } else {
                body.push(line);
            }
        } else if trimmed == FENCE_OPEN {
            current = Some(Vec::new());
        }
    }

    if current.is_some() {
        return Err("decision block is not closed".into());
    }
    Ok(blocks)
}

/// Interpret raw model output.
pub fn parse_decision(text: &str) -> Decision {
    let unparseable = |reason: String| Decision::Unparseable { reason };

    let blocks = match decision_blocks(text) {
        Ok(blocks) => blocks,
        Err(reason) => return unparseable(reason),
    };
    let body = match blocks.as_slice() {
        [] => return unparseable("no decision block found".into()),
        [only] => only,
        many => return unparseable(format!("expected one decision block, found {}", many.len())),
    };

    let raw: RawDecision = match serde_json::from_str(body) {
        Ok(raw) => raw,
        Err(e) => return unparseable(format!("invalid decision JSON: {e}")),
    };
    if raw.version != DECISION_SCHEMA_VERSION {
        return unparseable(format!(
            "unsupported decision version {} (expected {DECISION_SCHEMA_VERSION})",
            raw.version
        ));
    }

    match raw.kind.as_str() {
        "complete" => Decision::Complete {
            summary: raw.summary.unwrap_or_default(),
        },
        "actions" => match raw.actions {
            Some(actions) if !actions.is_empty() => Decision::Act { actions },
            _ => unparseable("\"actions\" decision has no actions".into()),
        },
        "need_context" => {
            let request = ContextRequest {
                paths: raw.paths,
                issues: raw.issues,
                pull_requests: raw.pull_requests,
                reason: raw.reason,
            };
            if request.is_empty() {
                unparseable("\"need_context\" decision names no paths, issues or pull requests".into())
            } else {
                Decision::RequestContext { request }
            }
        }
        other => unparseable(format!("unknown decision type \"{other}\"")),
    }
}

/// Attach the parsed decision to a provider response.
pub fn interpret(response: ProviderResponse) -> ModelResponse {
    let text = response.message.content;
    ModelResponse {
        decision: parse_decision(&text),
        text,
        usage: response.usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(json: &str) -> String {
        format!("Some reasoning first.\n\n```decision\n{json}\n```\n")
    }

    fn reason(decision: Decision) -> String {
        match decision {
            Decision::Unparseable { reason } => reason,
            other => panic!("expected unparseable, got {other:?}"),
        }
    }

    #[test]
    fn complete_decision() {
        let text = wrap(r#"{"version": 1, "type": "complete", "summary": "Reviewed."}"#);
        assert_eq!(
            parse_decision(&text),
            Decision::Complete {
                summary: "Reviewed.".into()
            }
        );
    }

    #[test]
    fn actions_decision() {
        let text = wrap(
            r#"{"version": 1, "type": "actions", "actions": [
                {"kind": "comment_on_pull_request", "number": 7, "body": "LGTM"},
                {"kind": "add_labels", "number": 7, "labels": ["approved"]}
            ]}"#,
        );
        let Decision::Act { actions } = parse_decision(&text) else {
            panic!("expected actions");
        };
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            Action::CommentOnPullRequest {
                number: 7,
                body: "LGTM".into()
            }
        );
    }

    #[test]
    fn need_context_decision() {
        let text = wrap(
            r#"{"version": 1, "type": "need_context", "paths": ["src/lib.rs"], "reason": "see the API"}"#,
        );
        let Decision::RequestContext { request } = parse_decision(&text) else {
            panic!("expected context request");
        };
        assert_eq!(request.paths, vec!["src/lib.rs".to_string()]);
        assert_eq!(request.reason, "see the API");
    }

    #[test]
    fn indented_fence_is_accepted() {
        let text = "  ```decision\n  {\"version\": 1, \"type\": \"complete\"}\n  ```";
        assert_eq!(parse_decision(text).kind(), "complete");
    }

    #[test]
    fn missing_block_is_unparseable() {
        assert!(reason(parse_decision("I think we are done.")).contains("no decision block"));
        // A plain json fence is not a decision block.
        let text = "```json\n{\"version\": 1, \"type\": \"complete\"}\n```";
        assert!(reason(parse_decision(text)).contains("no decision block"));
    }

    #[test]
    fn two_blocks_are_unparseable() {
        let one = wrap(r#"{"version": 1, "type": "complete"}"#);
        let text = format!("{one}{one}");
        assert!(reason(parse_decision(&text)).contains("found 2"));
    }

    #[test]
    fn invalid_json_is_unparseable() {
        let text = wrap(r#"{"version": 1, "type": "complete""#);
        assert!(reason(parse_decision(&text)).contains("invalid decision JSON"));
    }

    #[test]
    fn unknown_version_and_type_are_unparseable() {
        let text = wrap(r#"{"version": 2, "type": "complete"}"#);
        assert!(reason(parse_decision(&text)).contains("version 2"));
        let text = wrap(r#"{"version": 1, "type": "escalate"}"#);
        assert!(reason(parse_decision(&text)).contains("escalate"));
    }

    #[test]
    fn empty_actions_are_unparseable() {
        let text = wrap(r#"{"version": 1, "type": "actions", "actions": []}"#);
        assert!(reason(parse_decision(&text)).contains("no actions"));
        let text = wrap(r#"{"version": 1, "type": "actions"}"#);
        assert!(reason(parse_decision(&text)).contains("no actions"));
    }

    #[test]
    fn unknown_action_kind_is_unparseable() {
        let text = wrap(
            r#"{"version": 1, "type": "actions", "actions": [{"kind": "delete_repo"}]}"#,
        );
        assert!(reason(parse_decision(&text)).contains("invalid decision JSON"));
    }

    #[test]
    fn unclosed_block_is_unparseable() {
        let text = "```decision\n{\"version\": 1, \"type\": \"complete\"}";
        assert!(reason(parse_decision(text)).contains("not closed"));
    }
}
