//! User-facing response text.

use crate::agents::{AgentType, SubAgent};
use crate::echo::GoalEcho;

pub use crate::fallback::MANUAL_INPUT_MESSAGE as ERROR_RESPONSE;

pub const RESET_RESPONSE: &str =
    "🔄 **Starting over.** What would you like to build? Describe it in your own words.";
pub const SKIP_NOTE: &str =
    "⏭️ Skipping the remaining questions. I'll go with what we have so far.";
pub const ROUND_CAP_NOTE: &str =
    "⏳ We've been through several rounds of questions, so I'll proceed with my best understanding.";
pub const REFINED_NOTE: &str = "📝 Updated with your latest details.";

const SKIP_HINT: &str = "_Answer what you can, or say **skip** to continue with what we have._";
const READY_FOOTER: &str =
    "✨ **Ready to generate.** Reply with any changes, or say **reset** to start over.";

fn label(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Scope => "Scope",
        AgentType::Constraints => "Constraints",
        AgentType::Outcomes => "Outcomes",
        AgentType::Emotions => "Priorities",
    }
}

fn question_list(agents: &[SubAgent]) -> String {
    agents
        .iter()
        .filter(|a| a.is_active())
        .filter_map(|a| {
            a.current_question
                .as_deref()
                .map(|q| format!("• **{}:** {}", label(a.agent_type), q))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Opening of a clarification round.
pub fn clarification(agents: &[SubAgent], echo: Option<&GoalEcho>, round: u32) -> String {
    let mut parts = Vec::new();
    match echo {
        Some(echo) if round > 1 => {
            parts.push("**Thanks, that helps.** Here's where we are:".to_string());
            parts.push(echo.text.clone());
            parts.push("**A few more questions:**".to_string());
        }
        _ => parts.push(
            "🤔 **I'd like to understand a bit more before we start.**".to_string(),
        ),
    }
    parts.push(question_list(agents));
    parts.push(SKIP_HINT.to_string());
    parts.join("\n\n")
}

/// Follow-up questions within a round.
pub fn next_questions(agents: &[SubAgent]) -> String {
    format!(
        "**Got it.** Next:\n\n{}\n\n{}",
        question_list(agents),
        SKIP_HINT
    )
}

/// Final echo, optionally prefixed by a note on why we are proceeding.
pub fn ready(echo: &GoalEcho, note: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(note) = note {
        parts.push(note.to_string());
    }
    parts.push(echo.text.clone());
    parts.push(READY_FOOTER.to_string());
    parts.join("\n\n")
}
