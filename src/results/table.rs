//! Comparison table, custom sample and accuracy summary scraped from results text

use super::labels::resolve_label;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const HEADER_TEXT_COLUMN: &str = "Text (truncated)";
const CUSTOM_SAMPLE_MARKER: &str = "Custom Sample Analysis";
const CUSTOM_SAMPLE_END: &str = "🎯";
const CHECK: &str = "✓";
const CROSS: &str = "✗";
const UNCHANGED: &str = "=";

/// Rows at least this many characters wide use the fixed column layout
const FIXED_WIDTH_MIN: usize = 80;

/// Column boundaries of the fixed-width layout, in characters:
/// text | true | pretrained | fine-tuned | changed | verdict
const COLUMNS: [(usize, usize); 6] = [(0, 35), (35, 45), (45, 55), (55, 65), (65, 73), (73, 81)];

/// How the fine-tuned prediction compares to the pretrained one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Improved,
    Worsened,
    Same,
}

impl Verdict {
    fn from_flag(flag: &str) -> Self {
        match flag {
            CHECK => Verdict::Improved,
            CROSS => Verdict::Worsened,
            _ => Verdict::Same,
        }
    }
}

/// One sample compared across the pretrained (A) and fine-tuned (B) model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub text: String,
    pub true_label: String,
    pub prediction_a: String,
    pub prediction_b: String,
    pub changed: bool,
    pub verdict: Verdict,
}

/// The user's custom test sample, as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CustomSampleAnalysis {
    pub sample_text: Option<String>,
    pub true_label: Option<String>,
    pub prediction_a: Option<String>,
    pub prediction_b: Option<String>,
    pub correct_a: bool,
    pub correct_b: bool,
}

/// Headline numbers, each present only if the backend printed it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccuracySummary {
    pub pretrained_accuracy: Option<f64>,
    pub fine_tuned_accuracy: Option<f64>,
    pub improvement: Option<f64>,
    pub changed: Option<u32>,
    pub total: Option<u32>,
    pub change_percentage: Option<f64>,
}

/// Everything recovered from one run's results text
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedResults {
    pub rows: Vec<ComparisonRow>,
    pub custom_sample: Option<CustomSampleAnalysis>,
    pub summary: AccuracySummary,
}

impl ParsedResults {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.custom_sample.is_none() && self.summary == AccuracySummary::default()
    }
}

struct SummaryPatterns {
    pretrained: Regex,
    fine_tuned: Regex,
    improvement: Regex,
    changed: Regex,
    column_gap: Regex,
}

fn patterns() -> &'static SummaryPatterns {
    static PATTERNS: OnceLock<SummaryPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let build = |p: &str| Regex::new(p).expect("results pattern is valid");
        SummaryPatterns {
            pretrained: build(r"Pretrained Accuracy:\s*([\d.]+)%"),
            fine_tuned: build(r"Fine-tuned Accuracy:\s*([\d.]+)%"),
            improvement: build(r"Accuracy Improvement:\s*([+-]?[\d.]+)%"),
            changed: build(r"Predictions Changed:\s*(\d+)/(\d+)\s*\(([\d.]+)%\)"),
            column_gap: build(r"\s{2,}"),
        }
    })
}

/// Parse a results buffer. `labels` are the class names of the run's dataset.
pub fn parse_results(text: &str, labels: &[String]) -> ParsedResults {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut rows = Vec::new();
    let mut custom_sample = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if is_table_header(line) {
            while i < lines.len() && !ends_table(lines[i]) {
                if let Some(row) = parse_row(lines[i], labels) {
                    rows.push(row);
                }
                i += 1;
            }
            // The terminating line is examined again by the outer loop
            continue;
        }

        if line.contains(CUSTOM_SAMPLE_MARKER) {
            let mut analysis = CustomSampleAnalysis::default();
            let mut seen_any = false;
            while i < lines.len() && !lines[i].trim().is_empty() && !lines[i].contains(CUSTOM_SAMPLE_END) {
                seen_any |= apply_custom_line(&mut analysis, lines[i], labels);
                i += 1;
            }
            if seen_any {
                custom_sample = Some(analysis);
            }
        }
    }

    ParsedResults {
        rows,
        custom_sample,
        summary: parse_summary(text),
    }
}

fn is_table_header(line: &str) -> bool {
    line.contains(HEADER_TEXT_COLUMN) && line.contains("True") && line.contains("Pretrained")
}

fn ends_table(line: &str) -> bool {
    line.trim().is_empty() || line.contains(CUSTOM_SAMPLE_MARKER)
}

/// Parse one table line; separators and incomplete rows yield `None`
pub fn parse_row(line: &str, labels: &[String]) -> Option<ComparisonRow> {
    if line.contains("---") {
        return None;
    }

    let fields: Vec<String> = if line.chars().count() >= FIXED_WIDTH_MIN {
        COLUMNS
            .iter()
            .map(|&(start, end)| char_slice(line, start, end).trim().to_string())
            .collect()
    } else {
        let parts: Vec<&str> = patterns().column_gap.split(line).collect();
        if parts.len() < 4 {
            return None;
        }
        (0..6)
            .map(|idx| parts.get(idx).copied().unwrap_or(UNCHANGED).to_string())
            .collect()
    };

    let [text, true_label, pred_a, pred_b, changed, verdict] = <[String; 6]>::try_from(fields).ok()?;

    if text.is_empty()
        || text == HEADER_TEXT_COLUMN
        || text.contains("---")
        || true_label.is_empty()
        || pred_a.is_empty()
        || pred_b.is_empty()
    {
        return None;
    }

    Some(ComparisonRow {
        text: text.replacen("...", "", 1),
        true_label: resolve_label(labels, &true_label),
        prediction_a: resolve_label(labels, &pred_a),
        prediction_b: resolve_label(labels, &pred_b),
        changed: changed == CHECK,
        verdict: Verdict::from_flag(&verdict),
    })
}

/// Substring by character offsets, clamped to the line
fn char_slice(line: &str, start: usize, end: usize) -> &str {
    let byte_at = |n: usize| {
        line.char_indices()
            .nth(n)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len())
    };
    &line[byte_at(start)..byte_at(end)]
}

/// Apply one line of the custom sample block; returns whether it set a field
fn apply_custom_line(analysis: &mut CustomSampleAnalysis, line: &str, labels: &[String]) -> bool {
    let after_colon = || line.split(':').nth(1).map(str::trim);

    if line.contains("Sample:") {
        let quoted = line.split('\'').nth(1).filter(|s| !s.is_empty());
        analysis.sample_text = quoted.or_else(after_colon).map(str::to_string);
    } else if line.contains("True Label:") {
        analysis.true_label = after_colon().map(|l| resolve_label(labels, l));
    } else if line.contains("Pretrained Prediction:") {
        analysis.prediction_a = after_colon().map(|l| resolve_label(labels, l));
    } else if line.contains("Fine-tuned Prediction:") {
        analysis.prediction_b = after_colon().map(|l| resolve_label(labels, l));
    } else if line.contains("Pretrained Correct:") {
        analysis.correct_a = line.contains(CHECK);
    } else if line.contains("Fine-tuned Correct:") {
        analysis.correct_b = line.contains(CHECK);
    } else {
        return false;
    }
    true
}

/// Headline numbers anywhere in the text; the last occurrence of each wins
pub fn parse_summary(text: &str) -> AccuracySummary {
    let p = patterns();
    let last_float = |re: &Regex| -> Option<f64> {
        re.captures_iter(text)
            .last()
            .and_then(|c| c.get(1)?.as_str().parse().ok())
    };

    let mut summary = AccuracySummary {
        pretrained_accuracy: last_float(&p.pretrained),
        fine_tuned_accuracy: last_float(&p.fine_tuned),
        improvement: last_float(&p.improvement),
        ..Default::default()
    };

    if let Some(c) = p.changed.captures_iter(text).last() {
        summary.changed = c[1].parse().ok();
        summary.total = c[2].parse().ok();
        summary.change_percentage = c[3].parse().ok();
    }
    summary
}
