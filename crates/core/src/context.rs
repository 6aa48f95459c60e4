//! Context blocks: bounded, scored units of repository material.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::estimate_tokens;

/// Where a block's material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    File,
    Diff,
    Issue,
    PullRequest,
    Comments,
}

impl fmt::Display for BlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::File => "file",
            Self::Diff => "diff",
            Self::Issue => "issue",
            Self::PullRequest => "pull_request",
            Self::Comments => "comments",
        };
        f.write_str(tag)
    }
}

/// A bounded unit of repository material with a relevance score.
///
/// The token size is computed once from the rendered form, which is what the
/// prompt actually carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    source: BlockSource,
    label: String,
    content: String,
    tokens: usize,
    score: f32,
    modified_at: Option<DateTime<Utc>>,
}

impl ContextBlock {
    pub fn new(source: BlockSource, label: impl Into<String>, content: impl Into<String>) -> Self {
        let label = label.into();
        let content = content.into();
        let tokens = estimate_tokens(&render(source, &label, &content));
        Self {
            source,
            label,
            content,
            tokens,
            score: 0.0,
            modified_at: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn with_modified_at(mut self, modified_at: Option<DateTime<Utc>>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn source(&self) -> BlockSource {
        self.source
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Estimated size of [`render`](Self::render) in tokens.
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    /// The block as it appears inside a prompt.
    pub fn render(&self) -> String {
        render(self.source, &self.label, &self.content)
    }

    pub fn rank_key(&self) -> RankKey<'_> {
        RankKey {
            score: self.score,
            modified_at: self.modified_at,
            label: &self.label,
        }
    }
}

fn render(source: BlockSource, label: &str, content: &str) -> String {
    format!("### [{source}] {label}\n{content}")
}

/// Ordering key shared by the assembler and the optimizer.
///
/// Sorts by descending score, then most recently modified first (unknown
/// times last), then label in lexical order. The order is total.
#[derive(Debug, Clone, Copy)]
pub struct RankKey<'a> {
    pub score: f32,
    pub modified_at: Option<DateTime<Utc>>,
    pub label: &'a str,
}

impl PartialEq for RankKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey<'_> {}

impl PartialOrd for RankKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| match (self.modified_at, other.modified_at) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.label.cmp(other.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap())
    }

    #[test]
    fn tokens_cover_rendered_form() {
        let block = ContextBlock::new(BlockSource::File, "src/lib.rs", "fn main() {}");
        assert_eq!(block.tokens(), estimate_tokens(&block.render()));
        assert!(block.render().starts_with("### [file] src/lib.rs\n"));
    }

    #[test]
    fn higher_score_sorts_first() {
        let hi = ContextBlock::new(BlockSource::File, "b.rs", "").with_score(0.9);
        let lo = ContextBlock::new(BlockSource::File, "a.rs", "").with_score(0.1);
        assert!(hi.rank_key() < lo.rank_key());
    }

    #[test]
    fn ties_break_on_recency_then_label() {
        let mut blocks = vec![
            ContextBlock::new(BlockSource::File, "c.rs", "").with_score(0.5),
            ContextBlock::new(BlockSource::File, "b.rs", "")
                .with_score(0.5)
                .with_modified_at(at(1)),
            ContextBlock::new(BlockSource::File, "a.rs", "").with_score(0.5),
            ContextBlock::new(BlockSource::File, "z.rs", "")
                .with_score(0.5)
                .with_modified_at(at(9)),
        ];
        blocks.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));
        let labels: Vec<&str> = blocks.iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["z.rs", "b.rs", "a.rs", "c.rs"]);
    }
}
