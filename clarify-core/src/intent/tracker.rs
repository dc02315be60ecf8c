//! Snapshot capture with drift.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use super::drift::compute_drift;
use super::store::SnapshotStore;
use super::types::{ExtractedIntent, IntentSnapshot};
use crate::ambiguity::AmbiguityAnalysis;
use crate::error::Result;

const MAX_GOAL_CHARS: usize = 120;

static GOAL_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:i\s+(?:want|need|would\s+like)\s+to|help\s+me(?:\s+to)?)\s+([^.!?\n]+)")
        .expect("invalid regex")
});

/// Records snapshots, linking each to its predecessor with a drift vector.
#[derive(Clone)]
pub struct IntentTracker {
    store: Arc<dyn SnapshotStore>,
}

impl IntentTracker {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Capture a snapshot for `session_id`.
    ///
    /// Drift is computed against the session's latest snapshot; the first
    /// snapshot of a session carries none.
    pub async fn capture(
        &self,
        session_id: &str,
        raw_input: &str,
        ambiguity_score: f64,
        intent: ExtractedIntent,
        confidence: f64,
    ) -> Result<IntentSnapshot> {
        let previous = self.store.latest(session_id).await?;
        let drift = previous
            .as_ref()
            .and_then(|p| compute_drift(p, &intent, ambiguity_score));
        if let Some(d) = &drift {
            debug!(session_id, magnitude = d.magnitude, reason = %d.reason, "intent drift");
        }

        let snapshot = IntentSnapshot::new(session_id, raw_input, ambiguity_score, intent, confidence)
            .with_drift(drift);
        self.store.append(&snapshot).await?;
        Ok(snapshot)
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<IntentSnapshot>> {
        self.store.history(session_id).await
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Best-effort intent from a first message, before any clarification.
pub fn extract_initial_intent(text: &str, analysis: &AmbiguityAnalysis) -> ExtractedIntent {
    let trimmed = text.trim();
    let goal_text = if trimmed.is_empty() {
        None
    } else if let Some(caps) = GOAL_PHRASE.captures(trimmed) {
        Some(capitalise(caps[1].trim()))
    } else {
        trimmed
            .split(['.', '!', '?', '\n'])
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(capitalise)
    };
    let goal = goal_text.map(|g| truncate_chars(&g, MAX_GOAL_CHARS));

    let markers = &analysis.signals.emotional_markers;
    let emotional_context = if markers.is_empty() {
        None
    } else {
        Some(
            markers
                .iter()
                .map(|m| format!("{} ({})", m.marker_type, m.evidence))
                .collect::<Vec<_>>()
                .join(", "),
        )
    };

    ExtractedIntent {
        goal,
        emotional_context,
        ..ExtractedIntent::default()
    }
}
