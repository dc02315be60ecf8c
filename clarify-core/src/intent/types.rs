//! Intent snapshot types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an intent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    /// Generate a new random snapshot ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the user is understood to want.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIntent {
    pub goal: Option<String>,
    pub scope: Option<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    pub emotional_context: Option<String>,
}

impl ExtractedIntent {
    pub fn with_goal(goal: impl Into<String>) -> Self {
        Self {
            goal: Some(goal.into()),
            ..Self::default()
        }
    }

    /// True when nothing at all has been extracted.
    pub fn is_empty(&self) -> bool {
        self.goal.is_none()
            && self.scope.is_none()
            && self.constraints.is_empty()
            && self.success_criteria.is_empty()
            && self.emotional_context.is_none()
    }
}

/// Change between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftVector {
    pub previous_snapshot_id: SnapshotId,
    /// Human-readable change descriptions, in detection order
    pub changes: Vec<String>,
    /// One-line inferred reason
    pub reason: String,
    /// In [0, 1]
    pub magnitude: f64,
}

/// Point-in-time capture of the understood intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSnapshot {
    pub id: SnapshotId,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub ambiguity_score: f64,
    pub raw_input: String,
    pub extracted_intent: ExtractedIntent,
    /// In [0, 1]
    pub confidence: f64,
    pub drift: Option<DriftVector>,
}

impl IntentSnapshot {
    pub fn new(
        session_id: impl Into<String>,
        raw_input: impl Into<String>,
        ambiguity_score: f64,
        extracted_intent: ExtractedIntent,
        confidence: f64,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            ambiguity_score: ambiguity_score.clamp(0.0, 100.0),
            raw_input: raw_input.into(),
            extracted_intent,
            confidence: confidence.clamp(0.0, 1.0),
            drift: None,
        }
    }

    pub fn with_drift(mut self, drift: Option<DriftVector>) -> Self {
        self.drift = drift;
        self
    }
}
