//! Prompt optimizer: normalize, budget, template, history.
//!
//! Fills the token budget in a fixed order:
//!
//! | Layer | Source | Trim strategy |
//! |-------|--------|---------------|
//! | 1. System | identity + decision protocol | Never trimmed |
//! | 2. Task | normalized description + guidelines | Cut down to the floor, then fail |
//! | 3. History | prior turns | Oldest dropped, capped at a share of what is left |
//! | 4. Context | ranked blocks | Lowest-ranked dropped |
//!
//! Every size is an upper bound on what [`Prompt::estimated_tokens`]
//! measures, so the finished prompt never exceeds the budget.

use forgepilot_config::AgentSettings;
use forgepilot_core::context::ContextBlock;
use forgepilot_core::error::{Error, Result};
use forgepilot_core::message::Message;
use forgepilot_core::prompt::{BLOCK_SEPARATOR, Prompt};
use forgepilot_core::run::TurnRecord;
use forgepilot_core::token::{
    MESSAGE_OVERHEAD, estimate_message_tokens, estimate_tokens, truncate_chars, truncate_to_tokens,
};
use serde::Serialize;
use tracing::debug;

use super::normalize::{normalize_block, normalize_task};
use super::technique::{Technique, apply_techniques};
use super::template::{TaskKind, system_prompt, task_section};

/// Budget parameters for prompt construction.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    /// Total prompt budget in estimated tokens.
    pub budget: usize,
    /// The task text is never cut below this many tokens.
    pub task_floor_tokens: usize,
    /// Most prior turns replayed.
    pub history_turns: usize,
    /// Share of the post-task allowance history may use.
    pub history_share: f32,
    /// Per-message character cap for replayed turns.
    pub history_turn_chars: usize,
    pub identity_override: Option<String>,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for OptimizerSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            budget: settings.context_budget_tokens,
            task_floor_tokens: settings.task_floor_tokens,
            history_turns: settings.history_turns,
            history_share: settings.history_share,
            history_turn_chars: settings.history_turn_chars,
            identity_override: settings.system_prompt_override.clone(),
        }
    }
}

/// Statistics for a single layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStats {
    pub name: String,
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Information about dropped content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

/// What the optimizer did to fit the budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub task_kind: String,
    pub task_truncated: bool,
    /// Upper bound on the prompt's estimated tokens.
    pub tokens_used: usize,
    pub budget: usize,
    pub layers: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
}

/// Builds budget-bounded prompts. Pure: no I/O, no clock, no randomness.
#[derive(Debug, Clone, Default)]
pub struct PromptOptimizer {
    settings: OptimizerSettings,
}

impl PromptOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Build a prompt that fits the budget.
    pub fn optimize(
        &self,
        task_description: &str,
        blocks: Vec<ContextBlock>,
        history: &[TurnRecord],
    ) -> Result<Prompt> {
        self.optimize_with_report(task_description, blocks, history)
            .map(|(prompt, _)| prompt)
    }

    /// Normalized, templated task section, as the model would see it.
    pub fn render_task(&self, task_description: &str) -> String {
        self.render_task_with(task_description, Technique::DEFAULT)
    }

    /// Task text rewritten with a caller-chosen list of techniques.
    pub fn render_task_with(&self, task_description: &str, techniques: &[Technique]) -> String {
        apply_techniques(task_description, techniques)
    }

    /// [`render_task_with`](Self::render_task_with) over several prompts, in order.
    pub fn render_tasks<S: AsRef<str>>(&self, prompts: &[S], techniques: &[Technique]) -> Vec<String> {
        prompts
            .iter()
            .map(|prompt| self.render_task_with(prompt.as_ref(), techniques))
            .collect()
    }

    pub fn optimize_with_report(
        &self,
        task_description: &str,
        blocks: Vec<ContextBlock>,
        history: &[TurnRecord],
    ) -> Result<(Prompt, OptimizationReport)> {
        let budget = self.settings.budget;
        let task = normalize_task(task_description);
        if task.is_empty() {
            return Err(Error::InvalidTask(
                "task description is empty after normalization".into(),
            ));
        }
        let kind = TaskKind::infer(&task);

        // ── Layer 1: System ──
        let system = system_prompt(self.settings.identity_override.as_deref());
        let system_tokens = MESSAGE_OVERHEAD + estimate_tokens(&system);

        // ── Layer 2: Task ──
        // The user message overhead is paid here even if no context follows.
        let head = system_tokens + MESSAGE_OVERHEAD;
        let full_section = task_section(&task, kind);
        let (section, task_truncated) = if head + estimate_tokens(&full_section) <= budget {
            (full_section, false)
        } else {
            let frame = estimate_tokens(&task_section("", kind));
            // At least one token of task text must survive.
            let floor = self
                .settings
                .task_floor_tokens
                .min(estimate_tokens(&task))
                .max(1);
            if head + frame + floor > budget {
                return Err(Error::BudgetExceeded {
                    required: head + frame + floor,
                    budget,
                });
            }
            let allowance = budget - head - frame;
            (task_section(truncate_to_tokens(&task, allowance), kind), true)
        };
        let section_tokens = estimate_tokens(&section);
        let mut used = head + section_tokens;
        let remaining = budget.saturating_sub(used);

        // ── Layer 3: History ──
        let history_allowance = (remaining as f64 * f64::from(self.settings.history_share)) as usize;
        let (history_messages, history_stats, history_drop) =
            self.render_history_layer(history, history_allowance.min(remaining));
        used += history_stats.tokens;

        // ── Layer 4: Context ──
        let context_allowance = budget.saturating_sub(used);
        let (kept, context_stats, context_drop) =
            Self::render_context_layer(blocks, context_allowance);
        used += context_stats.tokens;

        let mut drops = Vec::new();
        drops.extend(history_drop);
        drops.extend(context_drop);
        let dropped_blocks = context_stats.items_total - context_stats.items_included;

        let report = OptimizationReport {
            task_kind: kind.to_string(),
            task_truncated,
            tokens_used: used,
            budget,
            layers: vec![
                LayerStats {
                    name: "system".into(),
                    tokens: system_tokens,
                    items_included: 1,
                    items_total: 1,
                },
                LayerStats {
                    name: "task".into(),
                    tokens: MESSAGE_OVERHEAD + section_tokens,
                    items_included: 1,
                    items_total: 1,
                },
                history_stats,
                context_stats,
            ],
            drops,
        };

        debug!(
            budget,
            tokens_used = used,
            task_kind = %kind,
            task_truncated,
            blocks = kept.len(),
            dropped_blocks,
            "Prompt optimized"
        );

        let prompt = Prompt::new(
            system,
            section,
            kept,
            history_messages,
            budget,
            dropped_blocks,
        );
        Ok((prompt, report))
    }

    // ── Layer renderers ────────────────────────────────────────────────────

    /// Newest turns first, whole turns only, then back to chronological order.
    fn render_history_layer(
        &self,
        history: &[TurnRecord],
        budget: usize,
    ) -> (Vec<Message>, LayerStats, Option<DropInfo>) {
        let layer = "history";
        let cap = self.settings.history_turn_chars;
        let mut used = 0;
        let mut turns: Vec<[Message; 2]> = Vec::new();
        let mut dropped = 0;
        let mut dropped_tokens = 0;

        for (i, record) in history.iter().rev().enumerate() {
            let pair = [
                Message::assistant(truncate_chars(&record.response, cap)),
                Message::user(truncate_chars(&record.feedback, cap)),
            ];
            let pair_tokens: usize = pair.iter().map(estimate_message_tokens).sum();
            let fits = i < self.settings.history_turns && used + pair_tokens <= budget;
            if fits && dropped == 0 {
                used += pair_tokens;
                turns.push(pair);
            } else {
                dropped += 1;
                dropped_tokens += pair_tokens;
            }
        }

        turns.reverse();
        let included = turns.len();
        (
            turns.into_iter().flatten().collect(),
            LayerStats {
                name: layer.into(),
                tokens: used,
                items_included: included,
                items_total: history.len(),
            },
            maybe_drop(layer, dropped, dropped_tokens, "Oldest turns dropped"),
        )
    }

    /// Rank, then keep the longest prefix that fits.
    fn render_context_layer(
        blocks: Vec<ContextBlock>,
        budget: usize,
    ) -> (Vec<ContextBlock>, LayerStats, Option<DropInfo>) {
        let layer = "context";
        let total = blocks.len();
        let mut ranked: Vec<ContextBlock> = blocks
            .into_iter()
            .map(|b| {
                ContextBlock::new(b.source(), b.label(), normalize_block(b.content()))
                    .with_score(b.score())
                    .with_modified_at(b.modified_at())
            })
            .collect();
        ranked.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));

        let separator_tokens = estimate_tokens(BLOCK_SEPARATOR);
        let mut used = 0;
        let mut kept = Vec::new();
        let mut dropped_tokens = 0;
        let mut full = false;

        for block in ranked {
            let cost = separator_tokens + block.tokens();
            if !full && used + cost <= budget {
                used += cost;
                kept.push(block);
            } else {
                full = true;
                dropped_tokens += cost;
            }
        }

        let included = kept.len();
        (
            kept,
            LayerStats {
                name: layer.into(),
                tokens: used,
                items_included: included,
                items_total: total,
            },
            maybe_drop(
                layer,
                total - included,
                dropped_tokens,
                "Lowest-ranked blocks dropped",
            ),
        )
    }
}

fn maybe_drop(layer: &str, count: usize, tokens: usize, reason: &str) -> Option<DropInfo> {
    if count > 0 {
        Some(DropInfo {
            layer: layer.into(),
            items_dropped: count,
            tokens_dropped: tokens,
            reason: reason.into(),
        })
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use forgepilot_core::context::BlockSource;
    use forgepilot_core::message::Role;

    fn block(label: &str, score: f32, bytes: usize) -> ContextBlock {
        ContextBlock::new(BlockSource::File, label, "x".repeat(bytes)).with_score(score)
    }

    fn turn(n: u32, text: &str) -> TurnRecord {
        TurnRecord {
            number: n,
            response: format!("response {n}: {text}"),
            decision: "need_context".into(),
            feedback: format!("feedback {n}"),
        }
    }

    fn optimizer(budget: usize) -> PromptOptimizer {
        PromptOptimizer::new(OptimizerSettings {
            budget,
            ..Default::default()
        })
    }

    /// Tokens taken by system prompt and task alone.
    fn fixed_cost(task: &str) -> usize {
        let (prompt, _) = optimizer(100_000)
            .optimize_with_report(task, vec![], &[])
            .unwrap();
        prompt.estimated_tokens()
    }

    #[test]
    fn never_exceeds_budget() {
        let blocks: Vec<ContextBlock> = (0..40)
            .map(|i| block(&format!("f{i:02}.rs"), (i % 7) as f32, 37 + i * 53))
            .collect();
        let history: Vec<TurnRecord> = (1..=6).map(|n| turn(n, &"y".repeat(300))).collect();

        for budget in [1_200, 1_500, 2_000, 3_000, 5_000, 8_192] {
            let prompt = optimizer(budget)
                .optimize("Fix the parser please", blocks.clone(), &history)
                .unwrap();
            assert!(
                prompt.estimated_tokens() <= budget,
                "budget {budget}: {}",
                prompt.estimated_tokens()
            );
        }
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let blocks = vec![block("b.rs", 0.5, 100), block("a.rs", 0.5, 100)];
        let history = vec![turn(1, "first")];
        let a = optimizer(2_000).optimize("review", blocks.clone(), &history).unwrap();
        let b = optimizer(2_000).optimize("review", blocks, &history).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn lowest_ranked_blocks_are_dropped() {
        let task = "Fix the parser";
        let fixed = fixed_cost(task);
        // Room for exactly two 100-token blocks (separator costs one token each).
        let budget = fixed + 2 * (1 + block("high.rs", 0.0, 380).tokens());
        let blocks = vec![
            block("low.rs", 0.1, 380),
            block("high.rs", 0.9, 380),
            block("mid.rs", 0.5, 380),
        ];
        let prompt = optimizer(budget).optimize(task, blocks, &[]).unwrap();
        let labels: Vec<&str> = prompt.blocks().iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["high.rs", "mid.rs"]);
        assert_eq!(prompt.dropped_blocks(), 1);
    }

    #[test]
    fn ties_break_on_recency_then_label() {
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
        let new = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).single();
        let blocks = vec![
            block("b.rs", 0.5, 10).with_modified_at(old),
            block("a.rs", 0.5, 10).with_modified_at(old),
            block("c.rs", 0.5, 10).with_modified_at(new),
        ];
        let prompt = optimizer(8_192).optimize("task", blocks, &[]).unwrap();
        let labels: Vec<&str> = prompt.blocks().iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["c.rs", "a.rs", "b.rs"]);
    }

    #[test]
    fn zero_context_allowance_yields_zero_blocks() {
        let task = "Summarize the repository";
        let budget = fixed_cost(task);
        let prompt = optimizer(budget)
            .optimize(task, vec![block("a.rs", 1.0, 40)], &[])
            .unwrap();
        assert!(prompt.blocks().is_empty());
        assert_eq!(prompt.dropped_blocks(), 1);
        assert!(prompt.estimated_tokens() <= budget);
    }

    #[test]
    fn task_that_cannot_fit_is_budget_exceeded() {
        let err = optimizer(50).optimize("Fix the parser", vec![], &[]).unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded { budget: 50, .. }));
    }

    #[test]
    fn zero_floor_still_requires_some_task_text() {
        let zero_floor = |budget| {
            PromptOptimizer::new(OptimizerSettings {
                budget,
                task_floor_tokens: 0,
                ..Default::default()
            })
        };
        let err = zero_floor(50)
            .optimize("Fix the parser", vec![], &[])
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded { budget: 50, .. }));

        let task = "word ".repeat(2_000);
        let budget = fixed_cost("word") + 5;
        let prompt = zero_floor(budget).optimize(&task, vec![], &[]).unwrap();
        assert!(prompt.task().starts_with("TASK:\nword"));
        assert!(prompt.estimated_tokens() <= budget);
    }

    #[test]
    fn long_task_is_truncated_down_to_floor() {
        let task = "word ".repeat(2_000);
        let short = fixed_cost("word");
        let budget = short + 300;
        let (prompt, report) = PromptOptimizer::new(OptimizerSettings {
            budget,
            task_floor_tokens: 256,
            ..Default::default()
        })
        .optimize_with_report(&task, vec![], &[])
        .unwrap();
        assert!(report.task_truncated);
        assert!(prompt.estimated_tokens() <= budget);

        let err = PromptOptimizer::new(OptimizerSettings {
            budget: short + 100,
            task_floor_tokens: 256,
            ..Default::default()
        })
        .optimize(&task, vec![], &[])
        .unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded { .. }));
    }

    #[test]
    fn history_is_newest_first_then_chronological() {
        let history: Vec<TurnRecord> = (1..=6).map(|n| turn(n, "ok")).collect();
        let prompt = optimizer(8_192).optimize("task", vec![], &history).unwrap();
        // history_turns defaults to 4: turns 3..=6 survive, oldest first.
        let replayed = prompt.history();
        assert_eq!(replayed.len(), 8);
        assert!(replayed[0].content.starts_with("response 3"));
        assert_eq!(replayed[0].role, Role::Assistant);
        assert_eq!(replayed[7].content, "feedback 6");
        assert_eq!(replayed[7].role, Role::User);
    }

    #[test]
    fn history_turns_are_capped_in_length() {
        let history = vec![turn(1, &"z".repeat(5_000))];
        let prompt = PromptOptimizer::new(OptimizerSettings {
            history_turn_chars: 100,
            ..Default::default()
        })
        .optimize("task", vec![], &history)
        .unwrap();
        assert_eq!(prompt.history()[0].content.len(), 100);
    }

    #[test]
    fn batch_rendering_keeps_prompt_order() {
        let rendered = optimizer(8_192).render_tasks(
            &["Review PR #7", "Please fix the crash"],
            &[Technique::Clarity],
        );
        assert_eq!(rendered, vec!["Review PR #7".to_string(), "fix the crash".to_string()]);
    }

    #[test]
    fn filler_is_stripped_from_task() {
        let prompt = optimizer(8_192)
            .optimize("Please fix the parser, thanks", vec![], &[])
            .unwrap();
        assert!(prompt.task().starts_with("TASK:\nfix the parser,"));
        assert!(prompt.system().contains("```decision"));
    }

    #[test]
    fn report_tracks_drops() {
        let task = "task";
        let budget = fixed_cost(task) + 5;
        let (_, report) = optimizer(budget)
            .optimize_with_report(task, vec![block("a.rs", 1.0, 400)], &[])
            .unwrap();
        assert_eq!(report.drops.len(), 1);
        assert_eq!(report.drops[0].layer, "context");
        assert!(report.tokens_used <= budget);
    }
}
