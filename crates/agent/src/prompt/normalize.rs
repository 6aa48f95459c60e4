//! Text normalization applied before budgeting.

use std::sync::LazyLock;

use regex_lite::Regex;

static FILLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:thank you|thanks|please|kindly|okay)\b[ \t]*[,.!]?")
        .expect("filler pattern is valid")
});

/// Normalize task text: strip filler words, collapse whitespace runs,
/// trim lines, collapse blank-line runs.
pub fn normalize_task(text: &str) -> String {
    let stripped = FILLER.replace_all(text, "");
    let lines = stripped
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "));
    collapse_blank_runs(lines)
}

/// Normalize block content: keep indentation, drop trailing whitespace,
/// collapse blank-line runs.
pub fn normalize_block(content: &str) -> String {
    collapse_blank_runs(content.lines().map(|line| line.trim_end().to_string()))
}

fn collapse_blank_runs(lines: impl Iterator<Item = String>) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in lines {
        if line.is_empty() && out.last().is_none_or(|prev| prev.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_filler_on_word_boundaries() {
        assert_eq!(
            normalize_task("Please, fix the   parser.  Thanks!"),
            "fix the parser."
        );
        assert_eq!(normalize_task("Kindly review PR #7, thank you."), "review PR #7,");
        // "pleased" and "okayish" are not filler.
        assert_eq!(normalize_task("pleased with okayish code"), "pleased with okayish code");
    }

    #[test]
    fn collapses_blank_line_runs() {
        let text = "\n\n  first line  \n\n\n\n\tsecond\t\tline\n\n";
        assert_eq!(normalize_task(text), "first line\n\nsecond line");
    }

    #[test]
    fn block_keeps_indentation() {
        let code = "fn main() {   \n    let x = 1;\n\n\n\n    x\n}\n\n";
        assert_eq!(normalize_block(code), "fn main() {\n    let x = 1;\n\n    x\n}");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_task("Okay so\n\n\nplease  look at this");
        assert_eq!(normalize_task(&once), once);
    }
}
