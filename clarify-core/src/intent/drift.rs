//! Drift between consecutive intent snapshots.

use super::types::{DriftVector, ExtractedIntent, IntentSnapshot};

pub const GOAL_WEIGHT: f64 = 0.4;
pub const SCOPE_WEIGHT: f64 = 0.2;
pub const CONSTRAINT_WEIGHT: f64 = 0.15;
pub const CRITERION_WEIGHT: f64 = 0.15;
/// Ambiguity moves smaller than this are noise.
pub const AMBIGUITY_DELTA_THRESHOLD: f64 = 20.0;

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A new text value that differs from the old one.
fn changed(old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(a), Some(b)) => normalize(a) != normalize(b),
    }
}

fn added<'a>(old: &[String], new: &'a [String]) -> Vec<&'a String> {
    let known: Vec<String> = old.iter().map(|s| normalize(s)).collect();
    let mut seen: Vec<String> = Vec::new();
    new.iter()
        .filter(|s| {
            let n = normalize(s);
            if known.contains(&n) || seen.contains(&n) {
                false
            } else {
                seen.push(n);
                true
            }
        })
        .collect()
}

/// Compute drift from `previous` to a new intent captured at `score`.
///
/// Magnitude is additive: goal change +0.4, scope change +0.2, each new
/// constraint or success criterion +0.15, and an ambiguity move of more than
/// 20 points adds `delta / 200`. Clamped to 1.0. `None` when nothing moved.
pub fn compute_drift(
    previous: &IntentSnapshot,
    intent: &ExtractedIntent,
    score: f64,
) -> Option<DriftVector> {
    let before = &previous.extracted_intent;
    let mut magnitude = 0.0;
    let mut changes = Vec::new();

    let goal_changed = changed(before.goal.as_deref(), intent.goal.as_deref());
    if goal_changed {
        magnitude += GOAL_WEIGHT;
        changes.push(match (&before.goal, &intent.goal) {
            (Some(old), Some(new)) => format!("Goal changed from \"{}\" to \"{}\"", old, new),
            (_, Some(new)) => format!("Goal set to \"{}\"", new),
            _ => "Goal changed".to_string(),
        });
    }

    let scope_changed = changed(before.scope.as_deref(), intent.scope.as_deref());
    if scope_changed {
        magnitude += SCOPE_WEIGHT;
        changes.push(match &intent.scope {
            Some(scope) => format!("Scope refined to \"{}\"", scope),
            None => "Scope changed".to_string(),
        });
    }

    let new_constraints = added(&before.constraints, &intent.constraints);
    for constraint in &new_constraints {
        magnitude += CONSTRAINT_WEIGHT;
        changes.push(format!("Added constraint: {}", constraint));
    }

    let new_criteria = added(&before.success_criteria, &intent.success_criteria);
    for criterion in &new_criteria {
        magnitude += CRITERION_WEIGHT;
        changes.push(format!("Added success criterion: {}", criterion));
    }

    let delta = (score - previous.ambiguity_score).abs();
    if delta > AMBIGUITY_DELTA_THRESHOLD {
        magnitude += delta / 200.0;
        let direction = if score < previous.ambiguity_score {
            "dropped"
        } else {
            "rose"
        };
        changes.push(format!(
            "Ambiguity {} from {:.0} to {:.0}",
            direction, previous.ambiguity_score, score
        ));
    }

    if changes.is_empty() {
        return None;
    }

    let reason = if goal_changed {
        "User redefined what they want to achieve"
    } else if scope_changed {
        "User narrowed or widened the scope"
    } else if !new_constraints.is_empty() || !new_criteria.is_empty() {
        "User added requirements"
    } else if score < previous.ambiguity_score {
        "Request became clearer"
    } else {
        "Request became less clear"
    };

    Some(DriftVector {
        previous_snapshot_id: previous.id.clone(),
        changes,
        reason: reason.to_string(),
        magnitude: magnitude.min(1.0),
    })
}
