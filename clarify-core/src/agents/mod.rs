//! Typed clarification sub-agents.
//!
//! Each agent owns one facet of the user's intent (scope, constraints,
//! outcomes, emotions), asks at most `max_questions` questions and collects
//! findings in its sandbox. The orchestrator owns the registry of live agents
//! and merges a finished round into a single [`Synthesis`].

mod orchestrator;
mod questions;
mod types;

pub use orchestrator::{
    agent_types_for, deterministic_synthesis, extract_findings, extract_sentences,
    OrchestratorConfig, SubAgentOrchestrator, Synthesis, DEFAULT_GOAL, EMPTY_SUMMARY,
};
pub use questions::{generic_question, guard_question, rule_question};
pub use types::{AgentId, AgentSandbox, AgentStatus, AgentType, QaExchange, SubAgent};
