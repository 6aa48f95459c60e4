//! `forgepilot analyze`: Prompt quality reports and optimized task text.

use forgepilot_agent::prompt::normalize::normalize_task;
use forgepilot_agent::{
    OptimizerSettings, PromptOptimizer, PromptQuality, TaskKind, Technique, analyze,
};
use forgepilot_config::AppConfig;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub prompt: String,
    pub task_kind: String,
    pub quality: PromptQuality,
    pub techniques: Vec<Technique>,
    pub optimized: String,
}

/// One report per prompt, in input order. An empty technique list means
/// the run loop's defaults.
pub fn build_reports(
    prompts: &[String],
    techniques: &[Technique],
    config: &AppConfig,
) -> Vec<AnalysisReport> {
    let techniques = if techniques.is_empty() {
        Technique::DEFAULT
    } else {
        techniques
    };
    let optimizer = PromptOptimizer::new(OptimizerSettings::from(&config.agent));
    let optimized = optimizer.render_tasks(prompts, techniques);

    prompts
        .iter()
        .zip(optimized)
        .map(|(prompt, optimized)| AnalysisReport {
            prompt: prompt.clone(),
            task_kind: TaskKind::infer(&normalize_task(prompt)).to_string(),
            quality: analyze(prompt),
            techniques: techniques.to_vec(),
            optimized,
        })
        .collect()
}

pub fn run(
    prompts: &[String],
    techniques: &[Technique],
    config: &AppConfig,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let reports = build_reports(prompts, techniques, config);
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for (i, report) in reports.iter().enumerate() {
        if reports.len() > 1 {
            println!();
            println!("  ── Prompt {} of {} ──", i + 1, reports.len());
        }
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    let quality = &report.quality;
    let techniques: Vec<&str> = report.techniques.iter().map(|t| t.name()).collect();
    println!();
    println!("  Task kind:    {}", report.task_kind);
    println!("  Words:        {}", quality.word_count);
    println!("  Clarity:      {:.0}/100", quality.clarity_score);
    println!("  Specificity:  {:.0}/100", quality.specificity_score);
    println!("  Structure:    {:.0}/100", quality.structure_score);
    println!("  Techniques:   {}", techniques.join(", "));
    if !quality.suggestions.is_empty() {
        println!();
        println!("  Suggestions:");
        for suggestion in &quality.suggestions {
            println!("    - {suggestion}");
        }
    }
    println!();
    println!("  Optimized task:");
    println!();
    for line in report.optimized.lines() {
        println!("    {line}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn report_strips_filler_and_infers_kind() {
        let reports = build_reports(
            &prompts(&["Please review PR #7 for error handling, thanks!"]),
            &[],
            &AppConfig::default(),
        );
        let report = &reports[0];
        assert_eq!(report.task_kind, "code review");
        assert!(report.optimized.starts_with("TASK:\nreview PR #7"));
        assert!(!report.optimized.contains("Please"));
        assert_eq!(report.quality.word_count, 8);
        assert_eq!(report.techniques, Technique::DEFAULT.to_vec());
    }

    #[test]
    fn several_prompts_get_one_report_each() {
        let reports = build_reports(
            &prompts(&["Review PR #7", "Fix the crash in parse()"]),
            &[Technique::Clarity, Technique::Examples],
            &AppConfig::default(),
        );
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].prompt, "Review PR #7");
        assert_eq!(reports[1].prompt, "Fix the crash in parse()");
        assert!(reports.iter().all(|r| r.optimized.contains("EXAMPLES:")));
        assert!(reports.iter().all(|r| !r.optimized.starts_with("TASK:")));
    }
}
