//! Parsing of JSON payloads returned by reasoning backends.
//!
//! Backend output is untrusted: it may wrap the JSON in prose or code fences,
//! omit fields, or use the wrong types. Each payload shape gets a parse
//! function that returns `None` when the payload is unusable (so the caller
//! falls back to its deterministic path) and fills absent optional fields
//! with fixed defaults:
//!
//! | Payload   | Required                       | Defaults                          |
//! |-----------|--------------------------------|-----------------------------------|
//! | analysis  | numeric `score`                | empty signal lists, no strategy   |
//! | question  | non-empty question text        | none                              |
//! | synthesis | non-empty `summary` or `goal`  | empty lists, `None` text fields   |

use serde_json::{Map, Value};

/// Return the first balanced `{...}` span in `text`.
///
/// Braces inside JSON strings (including escaped quotes) are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    let raw = extract_json_object(text)?;
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(obj, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Accepts an array of strings (non-strings skipped) or a single string.
fn string_list(obj: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match field(obj, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An emotional marker as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPayload {
    pub marker_type: String,
    pub confidence: f64,
    pub evidence: String,
}

/// Ambiguity analysis as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPayload {
    /// Raw score, not yet clamped
    pub score: f64,
    pub hedging_phrases: Vec<String>,
    pub contradictions: Vec<String>,
    pub emotional_markers: Vec<MarkerPayload>,
    pub vague_terms: Vec<String>,
    pub topics: Vec<String>,
    pub strategy: Option<String>,
    pub reasoning: Option<String>,
}

/// Parse an ambiguity analysis. `None` unless a numeric score is present.
pub fn parse_analysis(text: &str) -> Option<AnalysisPayload> {
    let obj = parse_object(text)?;
    let score = field(&obj, &["score", "ambiguityScore", "ambiguity_score"]).and_then(number)?;
    if !score.is_finite() {
        return None;
    }

    let emotional_markers = match field(&obj, &["emotionalMarkers", "emotional_markers"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let m = item.as_object()?;
                let marker_type = text_field(m, &["type", "marker_type"])?;
                let confidence = field(m, &["confidence"])
                    .and_then(number)
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0);
                let evidence = text_field(m, &["evidence"]).unwrap_or_default();
                Some(MarkerPayload {
                    marker_type,
                    confidence,
                    evidence,
                })
            })
            .collect(),
        _ => Vec::new(),
    };

    Some(AnalysisPayload {
        score,
        hedging_phrases: string_list(&obj, &["hedgingPhrases", "hedging_phrases"]),
        contradictions: string_list(&obj, &["contradictions"]),
        emotional_markers,
        vague_terms: string_list(&obj, &["vagueTerms", "vague_terms"]),
        topics: string_list(&obj, &["topics"]),
        strategy: text_field(&obj, &["strategy", "recommendedStrategy"]),
        reasoning: text_field(&obj, &["reasoning"]),
    })
}

/// Parse a single clarifying question.
///
/// Accepts `{"question": "..."}` or plain text, in which case the first
/// non-empty line is used with list markers and wrapping quotes removed.
pub fn parse_question(text: &str) -> Option<String> {
    if let Some(obj) = parse_object(text) {
        if let Some(q) = text_field(&obj, &["question"]) {
            return Some(q);
        }
    }

    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```") && !l.starts_with('{'))?;
    let line = line
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '#' || c.is_ascii_digit())
        .trim_start_matches(['.', ')'])
        .trim();
    let line = line.strip_prefix("Question:").unwrap_or(line).trim();
    let line = line.trim_matches(|c| c == '"' || c == '\'').trim();

    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Synthesized intent as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisPayload {
    pub summary: String,
    pub goal: Option<String>,
    pub scope: Option<String>,
    pub constraints: Vec<String>,
    pub success_criteria: Vec<String>,
    pub emotional_context: Option<String>,
}

/// Parse a synthesis. `None` unless a summary or goal is present.
///
/// Fields may sit at the top level or inside an `extractedIntent` object.
pub fn parse_synthesis(text: &str) -> Option<SynthesisPayload> {
    let obj = parse_object(text)?;
    let intent = match field(&obj, &["extractedIntent", "extracted_intent", "intent"]) {
        Some(Value::Object(inner)) => inner.clone(),
        _ => obj.clone(),
    };

    let goal = text_field(&intent, &["goal"]);
    let summary = text_field(&obj, &["summary"]).or_else(|| goal.clone())?;

    Some(SynthesisPayload {
        summary,
        goal,
        scope: text_field(&intent, &["scope"]),
        constraints: string_list(&intent, &["constraints"]),
        success_criteria: string_list(&intent, &["successCriteria", "success_criteria"]),
        emotional_context: text_field(&intent, &["emotionalContext", "emotional_context"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_skips_prose_and_fences() {
        let text = "Here is my analysis:\n```json\n{\"score\": 40, \"topics\": [\"api\"]}\n```\nDone.";
        assert_eq!(
            extract_json_object(text),
            Some("{\"score\": 40, \"topics\": [\"api\"]}")
        );
    }

    #[test]
    fn test_extract_handles_braces_in_strings() {
        let text = r#"x {"reasoning": "uses } and { and \"quotes\"", "n": {"a": 1}} trailing }"#;
        let raw = extract_json_object(text).unwrap();
        let value: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(value["n"]["a"], 1);
    }

    #[test]
    fn test_extract_unbalanced_is_none() {
        assert_eq!(extract_json_object("{\"score\": 40"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_analysis_defaults() {
        let parsed = parse_analysis(r#"{"score": "72"}"#).unwrap();
        assert_eq!(parsed.score, 72.0);
        assert!(parsed.hedging_phrases.is_empty());
        assert!(parsed.emotional_markers.is_empty());
        assert_eq!(parsed.strategy, None);
    }

    #[test]
    fn test_analysis_full_payload() {
        let text = r#"{
            "score": 85,
            "hedgingPhrases": ["maybe"],
            "contradictions": [],
            "emotionalMarkers": [{"type": "urgency", "confidence": 1.7, "evidence": "asap"}, {"bogus": true}],
            "vagueTerms": ["something", 3],
            "topics": "mobile",
            "strategy": "multi",
            "reasoning": "very vague"
        }"#;
        let parsed = parse_analysis(text).unwrap();
        assert_eq!(parsed.vague_terms, vec!["something".to_string()]);
        assert_eq!(parsed.topics, vec!["mobile".to_string()]);
        assert_eq!(
            parsed.emotional_markers,
            vec![MarkerPayload {
                marker_type: "urgency".to_string(),
                confidence: 1.0,
                evidence: "asap".to_string(),
            }]
        );
        assert_eq!(parsed.strategy.as_deref(), Some("multi"));
    }

    #[test]
    fn test_analysis_without_score_is_rejected() {
        assert_eq!(parse_analysis(r#"{"reasoning": "hmm"}"#), None);
        assert_eq!(parse_analysis(r#"{"score": [1]}"#), None);
        assert_eq!(parse_analysis("[1, 2, 3]"), None);
    }

    #[test]
    fn test_question_shapes() {
        assert_eq!(
            parse_question(r#"{"question": "Who will use it?"}"#).as_deref(),
            Some("Who will use it?")
        );
        assert_eq!(
            parse_question("\n1. \"What platforms should it support?\"\nThanks").as_deref(),
            Some("What platforms should it support?")
        );
        assert_eq!(
            parse_question("Question: What is the deadline?").as_deref(),
            Some("What is the deadline?")
        );
        assert_eq!(parse_question("   \n  "), None);
    }

    #[test]
    fn test_synthesis_nested_intent() {
        let text = r#"{
            "summary": "A workout tracker",
            "extractedIntent": {
                "goal": "Track running workouts",
                "constraints": ["iOS only"],
                "success_criteria": ["logs a run in under 10 seconds"]
            }
        }"#;
        let parsed = parse_synthesis(text).unwrap();
        assert_eq!(parsed.summary, "A workout tracker");
        assert_eq!(parsed.goal.as_deref(), Some("Track running workouts"));
        assert_eq!(parsed.scope, None);
        assert_eq!(parsed.constraints, vec!["iOS only".to_string()]);
        assert_eq!(parsed.success_criteria.len(), 1);
    }

    #[test]
    fn test_synthesis_goal_doubles_as_summary() {
        let parsed = parse_synthesis(r#"{"goal": "Ship a CLI"}"#).unwrap();
        assert_eq!(parsed.summary, "Ship a CLI");
        assert_eq!(parse_synthesis(r#"{"constraints": ["x"]}"#), None);
    }
}
