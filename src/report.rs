//! Project evaluation report: decode the backend's JSON and lay it out as text.
//!
//! The backend scores a fixed catalog of dimensions. Its JSON may arrive bare,
//! wrapped as `{"report": {...}}`, or inside a fenced ```` ```json ```` block.
//! Scores are merged onto the catalog by name so the view always lists every
//! dimension in catalog order, whatever the backend returned.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt::Write as _;

const BAR_WIDTH: usize = 20;

/// The scored dimensions and what each one asks.
pub const METRIC_CATALOG: [(&str, &str); 13] = [
    (
        "Problem Relevance",
        "How meaningful and well-defined is the problem the project aims to solve?",
    ),
    (
        "Solution Effectiveness",
        "How effectively does the implemented solution address the stated problem?",
    ),
    (
        "Technical Architecture Quality",
        "How well-structured and logically designed is the system architecture?",
    ),
    (
        "Technology Stack Appropriateness",
        "How suitable are the chosen technologies for the project's goals and scale?",
    ),
    (
        "Feature Completeness",
        "Are the core and supporting features fully implemented as expected?",
    ),
    (
        "Innovation & Uniqueness",
        "Does the project demonstrate originality or creative problem-solving?",
    ),
    (
        "Functionality & Stability",
        "Does the system operate reliably under normal usage conditions?",
    ),
    (
        "Error Handling & Edge Case Coverage",
        "How well does the project manage invalid inputs, failures, and uncommon scenarios?",
    ),
    (
        "Scalability Potential",
        "Can the system be extended to handle growth in users, data, or features?",
    ),
    (
        "Performance Efficiency",
        "Are performance and resource usage reasonably optimized?",
    ),
    (
        "Integration Quality",
        "How well do different components (frontend, backend, APIs, external services) work together?",
    ),
    (
        "Limitations & Future Scope Awareness",
        "Does the project clearly acknowledge current limitations and possible future improvements?",
    ),
    (
        "Overall Project Maturity",
        "How polished, complete, and production-like does the project feel overall?",
    ),
];

/// A field the backend sends either as one string or as a list of strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum TextOrList {
    One(String),
    Many(Vec<String>),
}

impl Default for TextOrList {
    fn default() -> Self {
        TextOrList::Many(Vec::new())
    }
}

impl TextOrList {
    fn into_items(self) -> Vec<String> {
        let items = match self {
            TextOrList::One(text) => vec![text],
            TextOrList::Many(items) => items,
        };
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawEvaluation {
    parameter: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    feedback: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawNextSteps {
    priority_fixes: TextOrList,
    short_term_goals: TextOrList,
    long_term_goals: TextOrList,
}

#[derive(Debug, Clone, Deserialize)]
struct RawReport {
    overall_score: f64,
    #[serde(default)]
    evaluation: Vec<RawEvaluation>,
    #[serde(default)]
    strengths: TextOrList,
    #[serde(default)]
    areas_to_improve: TextOrList,
    #[serde(default)]
    recommendations: TextOrList,
    #[serde(default)]
    next_steps: RawNextSteps,
    #[serde(default)]
    overall_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

impl Rating {
    #[must_use]
    pub fn from_score(score: u32) -> Self {
        match score {
            85.. => Rating::Excellent,
            75..=84 => Rating::Good,
            65..=74 => Rating::Fair,
            _ => Rating::NeedsImprovement,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Rating::Excellent => "Excellent",
            Rating::Good => "Good",
            Rating::Fair => "Fair",
            Rating::NeedsImprovement => "Needs Improvement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub score: u32,
    pub feedback: String,
    /// The backend did not score this dimension.
    pub missing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NextSteps {
    pub priority_fixes: Vec<String>,
    pub short_term_goals: Vec<String>,
    pub long_term_goals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub overall_score: u32,
    /// Catalog order.
    pub metrics: Vec<Metric>,
    pub strengths: Vec<String>,
    pub areas_to_improve: Vec<String>,
    pub recommendations: Vec<String>,
    pub next_steps: NextSteps,
    pub overall_summary: String,
}

fn clamp_score(score: f64) -> u32 {
    if score.is_finite() {
        score.round().clamp(0.0, 100.0) as u32
    } else {
        0
    }
}

/// Remove a surrounding ```` ```json ```` (or bare ```` ``` ````) fence.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
}

impl Report {
    /// Decode a report from backend text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(strip_code_fence(text)).context("report is not valid JSON")?;
        let body = match value.get("report") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };
        if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
            bail!("backend could not produce a report: {error}");
        }
        let raw: RawReport = serde_json::from_value(body).context("decode report fields")?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawReport) -> Self {
        let metrics = METRIC_CATALOG
            .iter()
            .map(|(name, description)| {
                let found = raw
                    .evaluation
                    .iter()
                    .find(|entry| entry.parameter.trim().eq_ignore_ascii_case(name));
                Metric {
                    name: (*name).to_string(),
                    description: (*description).to_string(),
                    score: found.map_or(0, |entry| clamp_score(entry.score)),
                    feedback: found.map(|entry| entry.feedback.trim().to_string()).unwrap_or_default(),
                    missing: found.is_none(),
                }
            })
            .collect();
        Self {
            overall_score: clamp_score(raw.overall_score),
            metrics,
            strengths: raw.strengths.into_items(),
            areas_to_improve: raw.areas_to_improve.into_items(),
            recommendations: raw.recommendations.into_items(),
            next_steps: NextSteps {
                priority_fixes: raw.next_steps.priority_fixes.into_items(),
                short_term_goals: raw.next_steps.short_term_goals.into_items(),
                long_term_goals: raw.next_steps.long_term_goals.into_items(),
            },
            overall_summary: raw.overall_summary.trim().to_string(),
        }
    }

    #[must_use]
    pub fn rating(&self) -> Rating {
        Rating::from_score(self.overall_score)
    }

    /// Rounded mean of the catalog scores.
    #[must_use]
    pub fn average_score(&self) -> u32 {
        if self.metrics.is_empty() {
            return 0;
        }
        let total: u32 = self.metrics.iter().map(|m| m.score).sum();
        (f64::from(total) / self.metrics.len() as f64).round() as u32
    }

    /// Metrics from highest to lowest score; ties keep catalog order.
    #[must_use]
    pub fn ranked(&self) -> Vec<&Metric> {
        let mut ranked: Vec<&Metric> = self.metrics.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }
}

fn score_bar(score: u32) -> String {
    let filled = (score.min(100) as usize * BAR_WIDTH + 50) / 100;
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{title}");
    for item in items {
        let _ = writeln!(out, "  - {item}");
    }
}

/// Plain-text report page: rating card, ranked metrics, summary, feedback.
#[must_use]
pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "PROJECT EVALUATION REPORT");
    let _ = writeln!(
        out,
        "Overall rating: {}/100 ({})",
        report.overall_score,
        report.rating().label()
    );
    if !report.overall_summary.is_empty() {
        let _ = writeln!(out, "\n{}", report.overall_summary);
    }

    let average = report.average_score();
    let _ = writeln!(out, "\nTECHNICAL EVALUATION");
    let _ = writeln!(
        out,
        "Average score: {average}  Total metrics: {}  Rating: {}",
        report.metrics.len(),
        Rating::from_score(average).label()
    );
    for (index, metric) in report.ranked().into_iter().enumerate() {
        let marker = if metric.missing { "  (not scored)" } else { "" };
        let _ = writeln!(
            out,
            "\n{:>2}. {:<38} {} {:>3}/100{marker}",
            index + 1,
            metric.name,
            score_bar(metric.score),
            metric.score
        );
        let _ = writeln!(out, "    {}", metric.description);
        if !metric.feedback.is_empty() {
            let _ = writeln!(out, "    > {}", metric.feedback);
        }
    }

    push_list(&mut out, "STRENGTHS", &report.strengths);
    push_list(&mut out, "AREAS TO IMPROVE", &report.areas_to_improve);
    push_list(&mut out, "RECOMMENDATIONS", &report.recommendations);
    let steps = &report.next_steps;
    if !(steps.priority_fixes.is_empty()
        && steps.short_term_goals.is_empty()
        && steps.long_term_goals.is_empty())
    {
        let _ = writeln!(out, "\nNEXT STEPS");
        push_list(&mut out, "Priority fixes", &steps.priority_fixes);
        push_list(&mut out, "Short-term goals", &steps.short_term_goals);
        push_list(&mut out, "Long-term goals", &steps.long_term_goals);
    }
    out
}
