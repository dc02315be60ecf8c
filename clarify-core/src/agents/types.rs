//! Sub-agent types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Facet of intent a sub-agent is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Scope,
    Constraints,
    Outcomes,
    Emotions,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scope => "scope",
            Self::Constraints => "constraints",
            Self::Outcomes => "outcomes",
            Self::Emotions => "emotions",
        }
    }

    /// What the agent is trying to learn, for prompts and guard questions.
    pub fn focus(&self) -> &'static str {
        match self {
            Self::Scope => "what is included and who it is for",
            Self::Constraints => "limits such as platform, budget, time and technology",
            Self::Outcomes => "what success looks like",
            Self::Emotions => "how the user feels about the problem and what matters most to them",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Completed,
    Failed,
}

/// One question and the user's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaExchange {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// Private working area of one sub-agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSandbox {
    pub context: HashMap<String, String>,
    pub findings: Vec<String>,
    /// In [0, 1]
    pub confidence: f64,
    pub history: Vec<QaExchange>,
}

/// A focused clarification worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgent {
    pub id: AgentId,
    pub session_id: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub sandbox: AgentSandbox,
    pub current_question: Option<String>,
    pub questions_asked: u32,
    pub max_questions: u32,
    pub created_at: DateTime<Utc>,
}

impl SubAgent {
    pub fn new(session_id: impl Into<String>, agent_type: AgentType, max_questions: u32) -> Self {
        Self {
            id: AgentId::new(),
            session_id: session_id.into(),
            agent_type,
            status: AgentStatus::Active,
            sandbox: AgentSandbox::default(),
            current_question: None,
            questions_asked: 0,
            max_questions,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    pub fn has_answered(&self) -> bool {
        !self.sandbox.history.is_empty()
    }
}
