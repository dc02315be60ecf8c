//! Session state owned by the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::echo::{GoalEcho, READY_AMBIGUITY, READY_CONFIDENCE};
use crate::intent::IntentSnapshot;

/// Where a session is in the clarification state machine.
///
/// ```text
/// detecting → clarifying ⇄ synthesizing → ready → completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Detecting,
    Clarifying,
    Synthesizing,
    Ready,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detecting => "detecting",
            Self::Clarifying => "clarifying",
            Self::Synthesizing => "synthesizing",
            Self::Ready => "ready",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Everything the loop knows about one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub turn_count: u32,
    pub ambiguity_score: f64,
    pub previous_ambiguity_score: Option<f64>,
    pub active_sub_agents: Vec<AgentId>,
    pub conversation_history: Vec<ConversationTurn>,
    pub intent_snapshots: Vec<IntentSnapshot>,
    pub goal_echo: Option<GoalEcho>,
    pub status: SessionStatus,
    /// Clarification round, starting at 1 once agents are first spawned
    pub round: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turn_count: 0,
            ambiguity_score: 0.0,
            previous_ambiguity_score: None,
            active_sub_agents: Vec::new(),
            conversation_history: Vec::new(),
            intent_snapshots: Vec::new(),
            goal_echo: None,
            status: SessionStatus::Detecting,
            round: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a user message and count the turn.
    pub fn push_user(&mut self, content: &str) {
        self.turn_count += 1;
        self.conversation_history.push(ConversationTurn::user(content));
        self.touch();
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.conversation_history
            .push(ConversationTurn::assistant(content));
        self.touch();
    }

    /// Move to a new ambiguity score, remembering the old one.
    pub fn rescore(&mut self, score: f64) {
        self.previous_ambiguity_score = Some(self.ambiguity_score);
        self.ambiguity_score = score;
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &str> {
        self.conversation_history
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .map(|t| t.content.as_str())
    }

    pub fn latest_snapshot(&self) -> Option<&IntentSnapshot> {
        self.intent_snapshots.last()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Result of one loop request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub state: SessionState,
    /// Markdown-like text for the user
    pub response: String,
    pub needs_clarification: bool,
}

/// Loop thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Scores above this start clarification
    pub clarification_threshold: f64,
    /// Confidence that must be exceeded to be ready
    pub ready_confidence: f64,
    /// Ambiguity that must be undercut to be ready
    pub ready_ambiguity: f64,
    /// Rounds before proceeding with a best-effort intent
    pub max_rounds: u32,
    /// Idle sessions are dropped from memory after this long; the snapshot
    /// store still has them
    pub session_idle_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clarification_threshold: 60.0,
            ready_confidence: READY_CONFIDENCE,
            ready_ambiguity: READY_AMBIGUITY,
            max_rounds: 5,
            session_idle_secs: 3600,
        }
    }
}

impl LoopConfig {
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_clarification_threshold(mut self, threshold: f64) -> Self {
        self.clarification_threshold = threshold;
        self
    }

    pub fn needs_clarification(&self, score: f64) -> bool {
        score > self.clarification_threshold
    }

    pub fn is_ready(&self, confidence: f64, score: f64) -> bool {
        confidence > self.ready_confidence && score < self.ready_ambiguity
    }
}
