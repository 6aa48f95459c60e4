//! Relevance scoring for context candidates.
//!
//! Candidates are scored before their content is fetched, so scorers only
//! see what is known up front: source, label, path, issue/PR number and a
//! preview (issue bodies and diffs are already in hand; files have none).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use forgepilot_core::context::BlockSource;
use forgepilot_core::run::ContextFocus;
use forgepilot_core::task::Task;

/// Words too common to signal relevance.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "into", "are", "was", "were", "will",
    "should", "could", "would", "have", "has", "not", "but", "all", "any", "can", "you", "your",
    "our", "its", "there", "their", "what", "when", "where", "which", "who", "why", "how", "about",
    "please", "thanks", "make", "does", "then", "than", "them", "also", "just", "some",
];

/// Lowercased alphanumeric words of three or more characters, minus stopwords.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// A unit of repository material that may become a context block.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source: BlockSource,
    pub label: String,
    /// Repository path, for files and diffs.
    pub path: Option<String>,
    /// Issue or pull request number, for issue-like sources.
    pub number: Option<u64>,
    /// Text known before fetching; empty for files.
    pub preview: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// What the task names, precomputed once per assembly.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub keywords: BTreeSet<String>,
    pub paths: BTreeSet<String>,
    pub numbers: BTreeSet<u64>,
}

impl ScoringContext {
    pub fn new(task: &Task, focus: &ContextFocus) -> Self {
        let target = task.target();
        let mut paths: BTreeSet<String> = target.paths.iter().cloned().collect();
        paths.extend(focus.paths.iter().cloned());

        let mut numbers = BTreeSet::new();
        numbers.extend(target.issue);
        numbers.extend(target.pull_request);
        numbers.extend(focus.issues.iter().copied());
        numbers.extend(focus.pull_requests.iter().copied());

        Self {
            keywords: keywords(task.description()),
            paths,
            numbers,
        }
    }
}

/// Scores a candidate's relevance to the task. Higher is more relevant.
///
/// Implementations must be deterministic: the same context and candidate
/// always produce the same score.
pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, ctx: &ScoringContext, candidate: &Candidate) -> f32;
}

// ── Keyword overlap ──

/// Fraction of task keywords that appear in the candidate's label, path or preview.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordOverlapScorer;

impl RelevanceScorer for KeywordOverlapScorer {
    fn name(&self) -> &str {
        "keyword_overlap"
    }

    fn score(&self, ctx: &ScoringContext, candidate: &Candidate) -> f32 {
        if ctx.keywords.is_empty() {
            return 0.0;
        }
        let mut words = keywords(&candidate.label);
        if let Some(path) = &candidate.path {
            words.extend(keywords(path));
        }
        words.extend(keywords(&candidate.preview));

        let hits = ctx.keywords.intersection(&words).count();
        hits as f32 / ctx.keywords.len() as f32
    }
}

// ── Path proximity ──

/// How close a candidate's path sits to any path the task names.
///
/// An exact match scores 1.0; otherwise the share of leading directory
/// components in common with the nearest named path.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathProximityScorer;

impl PathProximityScorer {
    fn proximity(a: &str, b: &str) -> f32 {
        if a == b {
            return 1.0;
        }
        let a: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
        let b: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();
        let depth = a.len().max(b.len());
        if depth == 0 {
            return 0.0;
        }
        let shared = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
        // Never let a near miss tie with an exact match.
        (shared as f32 / depth as f32).min(0.9)
    }
}

impl RelevanceScorer for PathProximityScorer {
    fn name(&self) -> &str {
        "path_proximity"
    }

    fn score(&self, ctx: &ScoringContext, candidate: &Candidate) -> f32 {
        let Some(path) = &candidate.path else {
            return 0.0;
        };
        ctx.paths
            .iter()
            .map(|named| Self::proximity(path, named))
            .fold(0.0, f32::max)
    }
}

// ── Target match ──

/// 1.0 when the candidate is the target issue/PR, a requested one, or a named path.
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetMatchScorer;

impl RelevanceScorer for TargetMatchScorer {
    fn name(&self) -> &str {
        "target_match"
    }

    fn score(&self, ctx: &ScoringContext, candidate: &Candidate) -> f32 {
        let number_hit = candidate
            .number
            .is_some_and(|n| ctx.numbers.contains(&n));
        let path_hit = candidate
            .path
            .as_ref()
            .is_some_and(|p| ctx.paths.contains(p));
        if number_hit || path_hit { 1.0 } else { 0.0 }
    }
}

// ── Composite ──

/// Weighted sum of several scorers.
pub struct CompositeScorer {
    parts: Vec<(Box<dyn RelevanceScorer>, f32)>,
}

impl CompositeScorer {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    pub fn with(mut self, scorer: impl RelevanceScorer + 'static, weight: f32) -> Self {
        self.parts.push((Box::new(scorer), weight));
        self
    }
}

impl Default for CompositeScorer {
    fn default() -> Self {
        Self::new()
            .with(KeywordOverlapScorer, 0.4)
            .with(PathProximityScorer, 0.4)
            .with(TargetMatchScorer, 1.0)
    }
}

impl RelevanceScorer for CompositeScorer {
    fn name(&self) -> &str {
        "composite"
    }

    fn score(&self, ctx: &ScoringContext, candidate: &Candidate) -> f32 {
        self.parts
            .iter()
            .map(|(scorer, weight)| scorer.score(ctx, candidate) * weight)
            .sum()
    }
}
