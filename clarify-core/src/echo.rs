//! Goal echo: the understood intent restated for confirmation.
//!
//! Output is markdown-like text (`**bold**`, `•` bullets, emoji markers)
//! that calling UIs render as-is, so its shape is part of the public
//! contract.

use serde::{Deserialize, Serialize};

use crate::intent::ExtractedIntent;

const BAR_CELLS: usize = 10;
pub const READY_CONFIDENCE: f64 = 0.7;
pub const READY_AMBIGUITY: f64 = 40.0;

/// Formatted restatement of the current intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEcho {
    pub text: String,
    pub confidence: f64,
    pub ambiguity_score: f64,
    pub progress_percent: u8,
    pub progress_bar: String,
    /// Clear enough to hand off to generation
    pub ready: bool,
}

/// Deterministic goal echo formatter.
#[derive(Debug, Clone, Copy)]
pub struct GoalEchoGenerator {
    ready_confidence: f64,
    ready_ambiguity: f64,
}

impl Default for GoalEchoGenerator {
    fn default() -> Self {
        Self::with_thresholds(READY_CONFIDENCE, READY_AMBIGUITY)
    }
}

impl GoalEchoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An echo is ready once confidence exceeds `ready_confidence` and
    /// ambiguity is below `ready_ambiguity`.
    pub fn with_thresholds(ready_confidence: f64, ready_ambiguity: f64) -> Self {
        Self {
            ready_confidence,
            ready_ambiguity,
        }
    }

    pub fn generate(&self, intent: &ExtractedIntent, confidence: f64, ambiguity: f64) -> GoalEcho {
        let confidence = confidence.clamp(0.0, 1.0);
        let ambiguity = ambiguity.clamp(0.0, 100.0);
        let progress = progress_percent(confidence, ambiguity);
        let bar = progress_bar(progress);

        let mut lines = Vec::new();
        lines.push("**Here's what I understand so far:**".to_string());
        lines.push(String::new());
        lines.push(format!(
            "🎯 **Goal:** {}",
            intent.goal.as_deref().unwrap_or("Not yet clear")
        ));
        if let Some(scope) = &intent.scope {
            lines.push(format!("📐 **Scope:** {}", scope));
        }
        if !intent.constraints.is_empty() {
            lines.push("⚖️ **Constraints:**".to_string());
            lines.extend(intent.constraints.iter().map(|c| format!("• {}", c)));
        }
        if !intent.success_criteria.is_empty() {
            lines.push("✅ **Success looks like:**".to_string());
            lines.extend(intent.success_criteria.iter().map(|c| format!("• {}", c)));
        }
        if let Some(emotion) = &intent.emotional_context {
            lines.push(format!("💭 **What matters to you:** {}", emotion));
        }
        lines.push(String::new());
        lines.push(format!("📊 **Clarity:** {} {}%", bar, progress));

        GoalEcho {
            text: lines.join("\n"),
            confidence,
            ambiguity_score: ambiguity,
            progress_percent: progress,
            progress_bar: bar,
            ready: confidence > self.ready_confidence && ambiguity < self.ready_ambiguity,
        }
    }
}

/// Half confidence, half clarity.
pub fn progress_percent(confidence: f64, ambiguity: f64) -> u8 {
    let raw = 50.0 * confidence + 50.0 * (100.0 - ambiguity) / 100.0;
    raw.round().clamp(0.0, 100.0) as u8
}

pub fn progress_bar(percent: u8) -> String {
    let filled = ((percent as usize * BAR_CELLS) + 50) / 100;
    let filled = filled.min(BAR_CELLS);
    format!("{}{}", "▓".repeat(filled), "░".repeat(BAR_CELLS - filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_echo() {
        let intent = ExtractedIntent {
            goal: Some("Plan family meals".to_string()),
            scope: Some("Weeknight dinners".to_string()),
            constraints: vec!["iOS only".to_string()],
            success_criteria: vec!["Plan a week in 5 minutes".to_string()],
            emotional_context: Some("tired of deciding".to_string()),
        };
        let echo = GoalEchoGenerator::new().generate(&intent, 0.8, 20.0);

        assert_eq!(
            echo.text,
            "**Here's what I understand so far:**\n\
             \n\
             🎯 **Goal:** Plan family meals\n\
             📐 **Scope:** Weeknight dinners\n\
             ⚖️ **Constraints:**\n\
             • iOS only\n\
             ✅ **Success looks like:**\n\
             • Plan a week in 5 minutes\n\
             💭 **What matters to you:** tired of deciding\n\
             \n\
             📊 **Clarity:** ▓▓▓▓▓▓▓▓░░ 80%"
        );
        assert_eq!(echo.progress_percent, 80);
        assert!(echo.ready);
    }

    #[test]
    fn test_sparse_echo_not_ready() {
        let echo = GoalEchoGenerator::new().generate(&ExtractedIntent::default(), 0.0, 70.0);
        assert!(echo.text.contains("🎯 **Goal:** Not yet clear"));
        assert!(!echo.text.contains("📐"));
        assert_eq!(echo.progress_percent, 15);
        assert_eq!(echo.progress_bar, "▓▓░░░░░░░░");
        assert!(!echo.ready);
    }

    #[test]
    fn test_ready_thresholds_are_strict() {
        let g = GoalEchoGenerator::new();
        let intent = ExtractedIntent::with_goal("x");
        assert!(!g.generate(&intent, 0.7, 10.0).ready);
        assert!(!g.generate(&intent, 0.9, 40.0).ready);
        assert!(g.generate(&intent, 0.71, 39.0).ready);
    }

    #[test]
    fn test_custom_thresholds() {
        let intent = ExtractedIntent::with_goal("x");
        let strict = GoalEchoGenerator::with_thresholds(0.95, 20.0);
        assert!(!strict.generate(&intent, 0.9, 10.0).ready);
        assert!(strict.generate(&intent, 0.96, 10.0).ready);
    }

    #[test]
    fn test_progress_bounds() {
        assert_eq!(progress_percent(1.0, 0.0), 100);
        assert_eq!(progress_percent(0.0, 100.0), 0);
        assert_eq!(progress_bar(100), "▓".repeat(10));
        assert_eq!(progress_bar(0), "░".repeat(10));
    }
}
