//! Shared test helpers: a scripted model provider and decision builders.

use std::collections::VecDeque;
use std::sync::Mutex;

use forgepilot_core::error::ProviderError;
use forgepilot_core::message::Message;
use forgepilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use tokio_util::sync::CancellationToken;

type Scripted = Result<String, ProviderError>;

/// A provider that replays scripted responses in order.
///
/// Panics when the script runs out, unless a repeating response is set.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<Scripted>,
    requests: Mutex<Vec<ProviderRequest>>,
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    /// Return `response` on every call.
    pub fn repeating(response: Scripted) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(vec![])
        }
    }

    /// Cancel `token` while the first call is in flight.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }

        let next = self.script.lock().unwrap().pop_front();
        let scripted = match (next, &self.repeat) {
            (Some(scripted), _) => scripted,
            (None, Some(repeat)) => repeat.clone(),
            (None, None) => panic!("ScriptedProvider: no response scripted for call #{call}"),
        };
        scripted.map(|text| ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
            model,
        })
    }
}

/// Wrap a JSON object in a decision block after some reasoning text.
pub fn decision(json: &str) -> String {
    format!("Looking at the repository.\n\n```decision\n{json}\n```")
}

pub fn complete(summary: &str) -> String {
    decision(&format!(
        r#"{{"version": 1, "type": "complete", "summary": "{summary}"}}"#
    ))
}

/// `actions_json` is a JSON array of actions.
pub fn actions(actions_json: &str) -> String {
    decision(&format!(
        r#"{{"version": 1, "type": "actions", "actions": {actions_json}}}"#
    ))
}

pub fn need_paths(paths: &[&str]) -> String {
    let paths: Vec<String> = paths.iter().map(|p| format!("\"{p}\"")).collect();
    decision(&format!(
        r#"{{"version": 1, "type": "need_context", "paths": [{}], "reason": "need the source"}}"#,
        paths.join(", ")
    ))
}
