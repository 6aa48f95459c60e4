//! Rewriting techniques a caller can apply to task text.
//!
//! The run loop always renders tasks with [`Technique::DEFAULT`], so
//! `forgepilot analyze` with no technique flags shows exactly what the model
//! receives. Other combinations are for experimenting with phrasing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::normalize::normalize_task;
use super::template::{TaskKind, task_section};

const SPECIFICITY_CHECKLIST: &[&str] = &[
    "Name the exact files, functions or issue numbers involved.",
    "Quote exact error messages or outputs.",
    "State the programming language and tool versions if they matter.",
    "Describe the expected result.",
];

const EXAMPLES_SECTION: &str = "EXAMPLES:\n\
- Good: a focused change with a test that reproduces the problem\n\
- Avoid: unrelated refactors or speculative fixes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Strip filler words and collapse whitespace.
    Clarity,
    /// Append a checklist asking for concrete details.
    Specificity,
    /// Wrap the text in the `TASK:` / `GUIDELINES` section.
    Structure,
    /// Append good and bad example outcomes.
    Examples,
}

impl Technique {
    pub const ALL: &'static [Technique] = &[
        Technique::Clarity,
        Technique::Specificity,
        Technique::Structure,
        Technique::Examples,
    ];

    /// What the orchestration loop applies.
    pub const DEFAULT: &'static [Technique] = &[Technique::Clarity, Technique::Structure];

    pub fn name(self) -> &'static str {
        match self {
            Self::Clarity => "clarity",
            Self::Specificity => "specificity",
            Self::Structure => "structure",
            Self::Examples => "examples",
        }
    }

    fn apply(self, text: &str) -> String {
        match self {
            Self::Clarity => normalize_task(text),
            Self::Specificity => {
                let checklist: Vec<String> =
                    SPECIFICITY_CHECKLIST.iter().map(|item| format!("- {item}")).collect();
                format!("{text}\n\n{}", checklist.join("\n"))
            }
            Self::Structure => task_section(text, TaskKind::infer(text)),
            Self::Examples => format!("{text}\n\n{EXAMPLES_SECTION}"),
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|t| t.name()).collect();
                format!("unknown technique '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Apply `techniques` in order. Repeats after the first occurrence are ignored.
pub fn apply_techniques(text: &str, techniques: &[Technique]) -> String {
    let mut seen = Vec::with_capacity(techniques.len());
    let mut out = text.to_string();
    for &technique in techniques {
        if seen.contains(&technique) {
            continue;
        }
        seen.push(technique);
        out = technique.apply(&out);
    }
    out
}
