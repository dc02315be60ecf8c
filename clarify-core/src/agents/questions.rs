//! Curated question banks for when no backend can phrase a question.

use super::types::AgentType;

const SCOPE_OPENING: &[&str] = &[
    "What exactly should this cover, and who is it for?",
    "Can you describe the main thing it needs to do?",
];
const SCOPE_FOLLOW_UP: &[&str] = &[
    "Is there anything that should definitely be left out of the first version?",
    "Which part matters most if we can only build one piece first?",
];

const CONSTRAINTS_OPENING: &[&str] = &[
    "Are there any technical requirements, such as a platform, language or existing system it must work with?",
    "What limits should I keep in mind, like budget, deadline or team size?",
];
const CONSTRAINTS_FOLLOW_UP: &[&str] = &[
    "Is there anything it must never do, or any rule it has to follow?",
    "How many people or how much data does it need to handle?",
];

const OUTCOMES_OPENING: &[&str] = &[
    "What would success look like once this is done?",
    "How will you know this is working the way you want?",
];
const OUTCOMES_FOLLOW_UP: &[&str] = &[
    "What is the single most important result for you?",
    "Is there a number or milestone that would tell you it was worth it?",
];

const EMOTIONS_OPENING: &[&str] = &[
    "What is frustrating you most about how things work today?",
    "How do you want people to feel when they use this?",
];
const EMOTIONS_FOLLOW_UP: &[&str] = &[
    "What worries you most about getting this wrong?",
    "What would make this a relief for you?",
];

fn bank(agent_type: AgentType, has_answered: bool) -> &'static [&'static str] {
    match (agent_type, has_answered) {
        (AgentType::Scope, false) => SCOPE_OPENING,
        (AgentType::Scope, true) => SCOPE_FOLLOW_UP,
        (AgentType::Constraints, false) => CONSTRAINTS_OPENING,
        (AgentType::Constraints, true) => CONSTRAINTS_FOLLOW_UP,
        (AgentType::Outcomes, false) => OUTCOMES_OPENING,
        (AgentType::Outcomes, true) => OUTCOMES_FOLLOW_UP,
        (AgentType::Emotions, false) => EMOTIONS_OPENING,
        (AgentType::Emotions, true) => EMOTIONS_FOLLOW_UP,
    }
}

/// Pick a question from the rule table.
///
/// The bank is chosen by agent type and whether the user has answered yet;
/// `questions_asked` rotates through it so consecutive questions differ.
pub fn rule_question(agent_type: AgentType, has_answered: bool, questions_asked: u32) -> String {
    let questions = bank(agent_type, has_answered);
    let question = questions
        .get(questions_asked as usize % questions.len().max(1))
        .map(|q| q.to_string())
        .unwrap_or_default();
    guard_question(agent_type, question)
}

/// Never hand out an empty question.
pub fn guard_question(agent_type: AgentType, question: String) -> String {
    if question.trim().is_empty() {
        generic_question(agent_type)
    } else {
        question
    }
}

pub fn generic_question(agent_type: AgentType) -> String {
    format!(
        "Could you tell me a bit more about {}?",
        agent_type.focus()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AgentType; 4] = [
        AgentType::Scope,
        AgentType::Constraints,
        AgentType::Outcomes,
        AgentType::Emotions,
    ];

    #[test]
    fn test_every_rule_yields_a_question() {
        for agent_type in ALL {
            for has_answered in [false, true] {
                for asked in 0..5 {
                    let q = rule_question(agent_type, has_answered, asked);
                    assert!(q.ends_with('?'), "{agent_type} {has_answered} {asked}: {q}");
                }
            }
        }
    }

    #[test]
    fn test_follow_up_differs_from_opening() {
        assert_ne!(
            rule_question(AgentType::Scope, false, 0),
            rule_question(AgentType::Scope, true, 1)
        );
        assert_ne!(
            rule_question(AgentType::Outcomes, true, 0),
            rule_question(AgentType::Outcomes, true, 1)
        );
    }

    #[test]
    fn test_guard_substitutes_generic() {
        let q = guard_question(AgentType::Constraints, "   ".to_string());
        assert_eq!(
            q,
            "Could you tell me a bit more about limits such as platform, budget, time and technology?"
        );
    }
}
