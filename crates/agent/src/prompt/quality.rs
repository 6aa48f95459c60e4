//! Heuristic prompt quality analysis.

use serde::Serialize;

const CLARITY_KEYWORDS: &[&str] = &["specific", "exact", "clear", "show", "provide"];
const STRUCTURE_MARKERS: &[&str] = &[":", "1.", "-", "*"];
const EXAMPLE_MARKERS: &[&str] = &["example", "code", "specific"];

/// Scores are 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptQuality {
    pub word_count: usize,
    pub clarity_score: f32,
    pub specificity_score: f32,
    pub structure_score: f32,
    pub suggestions: Vec<String>,
}

pub fn analyze(text: &str) -> PromptQuality {
    let word_count = text.split_whitespace().count();
    let lower = text.to_lowercase();
    let newlines = text.matches('\n').count();

    let clarity_hits = CLARITY_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    let clarity_score = (clarity_hits as f32 * 10.0).min(100.0);
    let specificity_score = (word_count as f32 / 2.0).min(100.0);

    let formatted = STRUCTURE_MARKERS.iter().any(|m| text.contains(m));
    let structure_score = if newlines >= 2 && formatted { 50.0 } else { 25.0 };

    let mut suggestions = Vec::new();
    if word_count < 10 {
        suggestions.push("Add more context and details".to_string());
    }
    if newlines < 2 {
        suggestions.push("Use sections or bullet points for clarity".to_string());
    }
    if !EXAMPLE_MARKERS.iter().any(|m| text.contains(m)) {
        suggestions.push("Include examples or specific cases".to_string());
    }

    PromptQuality {
        word_count,
        clarity_score,
        specificity_score,
        structure_score,
        suggestions,
    }
}
