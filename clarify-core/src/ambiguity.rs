//! Ambiguity scoring of free-text requests.
//!
//! The scorer asks a reasoning backend for a structured analysis under a
//! fixed timeout. Any failure (error, timeout, unusable JSON) drops to a
//! deterministic heuristic, so [`AmbiguityScorer::analyze`] always returns.
//!
//! Heuristic weights, summed and clamped to 100:
//!
//! | Signal                                           | Points     |
//! |--------------------------------------------------|------------|
//! | hedging term                                     | +20 each   |
//! | vague term                                       | +25 each   |
//! | uncertainty phrase                               | +30 each   |
//! | contains `?`                                     | +15        |
//! | fewer than 5 words                               | +30        |
//! | no specifics and fewer than 10 words             | +20        |
//! | generic action on a placeholder object           | +25        |

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::fallback::{FallbackCascade, FallbackRequest, FallbackStrategy};
use crate::json::{parse_analysis, AnalysisPayload};
use crate::llm::{BackendSet, InvokeConfig};

/// Scores above this recommend the multi-facet strategy.
pub const MULTI_STRATEGY_THRESHOLD: f64 = 70.0;

const HEDGING_TERMS: &[&str] = &[
    "maybe", "perhaps", "possibly", "probably", "might", "could", "kind of", "sort of", "i think",
    "i guess", "somewhat",
];

const VAGUE_TERMS: &[&str] = &[
    "something", "stuff", "things", "thing", "somehow", "whatever", "anything", "various", "etc",
];

const UNCERTAINTY_TERMS: &[&str] = &[
    "not sure",
    "don't know",
    "no idea",
    "unsure",
    "not certain",
    "confused",
    "i wonder",
    "figure out",
];

const EMOTION_TERMS: &[(&str, f64, &[&str])] = &[
    (
        "frustration",
        0.7,
        &["frustrated", "frustrating", "annoyed", "annoying", "fed up", "tired of", "sick of", "hate"],
    ),
    (
        "urgency",
        0.8,
        &["asap", "urgent", "urgently", "immediately", "right away", "deadline", "hurry"],
    ),
    (
        "excitement",
        0.6,
        &["excited", "can't wait", "love", "amazing", "awesome", "thrilled"],
    ),
    (
        "anxiety",
        0.7,
        &["worried", "anxious", "nervous", "scared", "afraid", "stressed"],
    ),
];

const CONTRADICTION_PAIRS: &[(&str, &str)] = &[
    ("simple", "complex"),
    ("cheap", "premium"),
    ("small", "large"),
    ("quick", "comprehensive"),
    ("minimal", "full-featured"),
    ("offline", "real-time"),
];

const TECH_TOPICS: &[&str] = &[
    "api", "app", "website", "database", "mobile", "web", "backend", "frontend", "ios",
    "android", "cli", "dashboard", "chatbot", "game", "service",
];

/// Compile a word-bounded, case-insensitive matcher for a term.
///
/// Apostrophes are optional and inner spaces match any whitespace run.
fn term_regex(term: &str) -> Regex {
    let body = regex::escape(term).replace('\'', "'?").replace(' ', r"\s+");
    Regex::new(&format!(r"(?i)\b{}\b", body)).expect("invalid regex")
}

fn compile_terms(terms: &[&'static str]) -> Vec<(&'static str, Regex)> {
    terms.iter().map(|t| (*t, term_regex(t))).collect()
}

static HEDGING: LazyLock<Vec<(&'static str, Regex)>> =
    LazyLock::new(|| compile_terms(HEDGING_TERMS));
static VAGUE: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| compile_terms(VAGUE_TERMS));
static UNCERTAINTY: LazyLock<Vec<(&'static str, Regex)>> =
    LazyLock::new(|| compile_terms(UNCERTAINTY_TERMS));

struct EmotionMatcher {
    marker_type: &'static str,
    confidence: f64,
    terms: Vec<(&'static str, Regex)>,
}

static EMOTIONS: LazyLock<Vec<EmotionMatcher>> = LazyLock::new(|| {
    EMOTION_TERMS
        .iter()
        .map(|(marker_type, confidence, terms)| EmotionMatcher {
            marker_type: *marker_type,
            confidence: *confidence,
            terms: compile_terms(terms),
        })
        .collect()
});

static CONTRADICTIONS: LazyLock<Vec<(&'static str, Regex, &'static str, Regex)>> =
    LazyLock::new(|| {
        CONTRADICTION_PAIRS
            .iter()
            .map(|(a, b)| (*a, term_regex(a), *b, term_regex(b)))
            .collect()
    });

static GENERIC_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(build|make|create|develop|do|design|improve|fix)\s+(something|stuff|things|thing|it|that|this|an\s+app|a\s+website|a\s+tool)\b",
    )
    .expect("invalid regex")
});

/// Recommended clarification focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationStrategy {
    Scope,
    Constraints,
    Outcomes,
    Emotions,
    Multi,
    General,
}

impl ClarificationStrategy {
    /// Map a backend label; anything unrecognised is `General`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "scope" => Self::Scope,
            "constraints" => Self::Constraints,
            "outcomes" => Self::Outcomes,
            "emotions" | "emotional" => Self::Emotions,
            "multi" | "multiple" => Self::Multi,
            _ => Self::General,
        }
    }

    /// Default strategy for a score when nothing better is known.
    pub fn for_score(score: f64) -> Self {
        if score > MULTI_STRATEGY_THRESHOLD {
            Self::Multi
        } else {
            Self::Scope
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scope => "scope",
            Self::Constraints => "constraints",
            Self::Outcomes => "outcomes",
            Self::Emotions => "emotions",
            Self::Multi => "multi",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for ClarificationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An emotional signal in the user's wording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalMarker {
    #[serde(rename = "type")]
    pub marker_type: String,
    pub confidence: f64,
    pub evidence: String,
}

/// Signal sets backing an ambiguity score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmbiguitySignals {
    pub hedging_phrases: Vec<String>,
    pub contradictions: Vec<String>,
    pub emotional_markers: Vec<EmotionalMarker>,
    pub vague_terms: Vec<String>,
    pub topics: Vec<String>,
}

/// Where an analysis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Backend,
    Cache,
    Heuristic,
}

/// Result of scoring one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityAnalysis {
    /// 0-100, higher means more clarification needed
    pub score: f64,
    pub signals: AmbiguitySignals,
    pub strategy: ClarificationStrategy,
    pub reasoning: String,
    pub source: AnalysisSource,
}

impl AmbiguityAnalysis {
    fn from_payload(payload: AnalysisPayload, source: AnalysisSource) -> Self {
        let score = payload.score.clamp(0.0, 100.0);
        let strategy = payload
            .strategy
            .as_deref()
            .map(ClarificationStrategy::from_label)
            .unwrap_or_else(|| ClarificationStrategy::for_score(score));
        Self {
            score,
            signals: AmbiguitySignals {
                hedging_phrases: payload.hedging_phrases,
                contradictions: payload.contradictions,
                emotional_markers: payload
                    .emotional_markers
                    .into_iter()
                    .map(|m| EmotionalMarker {
                        marker_type: m.marker_type,
                        confidence: m.confidence,
                        evidence: m.evidence,
                    })
                    .collect(),
                vague_terms: payload.vague_terms,
                topics: payload.topics,
            },
            strategy,
            reasoning: payload.reasoning.unwrap_or_default(),
            source,
        }
    }
}

fn matched_terms(text: &str, terms: &[(&'static str, Regex)]) -> Vec<String> {
    terms
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(term, _)| term.to_string())
        .collect()
}

fn strip_punctuation(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Punctuation-stripped tokens that do not start a sentence.
fn non_initial_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut sentence_start = true;
    for raw in text.split_whitespace() {
        let cleaned = strip_punctuation(raw);
        if !sentence_start && !cleaned.is_empty() {
            tokens.push(cleaned);
        }
        if !cleaned.is_empty() {
            sentence_start = false;
        }
        if raw.ends_with(['.', '!', '?']) {
            sentence_start = true;
        }
    }
    tokens
}

fn is_capitalised(token: &str) -> bool {
    token.chars().next().is_some_and(char::is_uppercase)
        && token != "I"
        && !token.starts_with("I'")
}

fn has_specifics(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        || non_initial_tokens(text).into_iter().any(is_capitalised)
}

fn detect_emotions(text: &str) -> Vec<EmotionalMarker> {
    EMOTIONS
        .iter()
        .filter_map(|emotion| {
            let found = emotion.terms.iter().find_map(|(_, re)| re.find(text))?;
            Some(EmotionalMarker {
                marker_type: emotion.marker_type.to_string(),
                confidence: emotion.confidence,
                evidence: found.as_str().to_string(),
            })
        })
        .collect()
}

fn detect_contradictions(text: &str) -> Vec<String> {
    CONTRADICTIONS
        .iter()
        .filter(|(_, a, _, b)| a.is_match(text) && b.is_match(text))
        .map(|(a, _, b, _)| format!("{} vs {}", a, b))
        .collect()
}

fn extract_topics(text: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    let mut push = |topic: String| {
        if !topics.iter().any(|t| t.eq_ignore_ascii_case(&topic)) {
            topics.push(topic);
        }
    };

    for token in non_initial_tokens(text) {
        if is_capitalised(token) || (token.contains('.') && token.len() > 2) {
            push(token.to_string());
        }
    }
    for word in text.split_whitespace().map(strip_punctuation) {
        let lower = word.to_lowercase();
        if TECH_TOPICS.contains(&lower.as_str()) {
            push(lower);
        }
    }
    topics.truncate(8);
    topics
}

/// Deterministic, side-effect-free ambiguity analysis.
pub fn heuristic_analysis(text: &str) -> AmbiguityAnalysis {
    let word_count = text.split_whitespace().count();
    let hedging = matched_terms(text, &HEDGING);
    let vague = matched_terms(text, &VAGUE);
    let uncertainty = matched_terms(text, &UNCERTAINTY);

    let mut score = 0.0;
    let mut reasons: Vec<String> = Vec::new();

    if !hedging.is_empty() {
        score += 20.0 * hedging.len() as f64;
        reasons.push(format!("hedging ({})", hedging.join(", ")));
    }
    if !vague.is_empty() {
        score += 25.0 * vague.len() as f64;
        reasons.push(format!("vague terms ({})", vague.join(", ")));
    }
    if !uncertainty.is_empty() {
        score += 30.0 * uncertainty.len() as f64;
        reasons.push(format!("uncertainty ({})", uncertainty.join(", ")));
    }
    if text.contains('?') {
        score += 15.0;
        reasons.push("phrased as a question".to_string());
    }
    if word_count < 5 {
        score += 30.0;
        reasons.push("very short request".to_string());
    }
    if word_count < 10 && !has_specifics(text) {
        score += 20.0;
        reasons.push("no concrete specifics".to_string());
    }
    if GENERIC_ACTION.is_match(text) {
        score += 25.0;
        reasons.push("generic action without a concrete object".to_string());
    }

    let score: f64 = f64::min(score, 100.0);
    let reasoning = if reasons.is_empty() {
        "Heuristic analysis: request is specific".to_string()
    } else {
        format!("Heuristic analysis: {}", reasons.join("; "))
    };

    // Uncertainty phrases count as hedging in the reported signals
    let mut hedging_phrases = hedging;
    hedging_phrases.extend(uncertainty);

    AmbiguityAnalysis {
        score,
        signals: AmbiguitySignals {
            hedging_phrases,
            contradictions: detect_contradictions(text),
            emotional_markers: detect_emotions(text),
            vague_terms: vague,
            topics: extract_topics(text),
        },
        strategy: ClarificationStrategy::for_score(score),
        reasoning,
        source: AnalysisSource::Heuristic,
    }
}

/// Scorer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Budget for the backend attempt before falling back to the heuristic
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Prior turns included in the backend prompt
    pub history_window: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_tokens: 800,
            temperature: 0.2,
            history_window: 6,
        }
    }
}

impl ScorerConfig {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

const REQUEST_TYPE: &str = "analysis";

/// Backend-assisted ambiguity scorer with a heuristic floor.
pub struct AmbiguityScorer {
    backends: BackendSet,
    config: ScorerConfig,
    cascade: Option<Arc<FallbackCascade>>,
}

impl AmbiguityScorer {
    pub fn new(backends: BackendSet, config: ScorerConfig) -> Self {
        Self {
            backends,
            config,
            cascade: None,
        }
    }

    /// Recover backend failures through the cascade before using the heuristic.
    pub fn with_cascade(mut self, cascade: Arc<FallbackCascade>) -> Self {
        self.cascade = Some(cascade);
        self
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Analyze `text` in the light of prior conversation lines. Never fails.
    pub async fn analyze(&self, text: &str, history: &[String]) -> AmbiguityAnalysis {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, self.analyze_with_backend(text, history)).await {
            Ok(Some(analysis)) => analysis,
            Ok(None) => heuristic_analysis(text),
            Err(_) => {
                warn!(timeout_ms = self.config.timeout_ms, "ambiguity backend timed out, using heuristic");
                heuristic_analysis(text)
            }
        }
    }

    async fn analyze_with_backend(&self, text: &str, history: &[String]) -> Option<AmbiguityAnalysis> {
        let prompt = self.build_prompt(text, history);
        let invoke = InvokeConfig::new(self.config.max_tokens, self.config.temperature);

        let attempted = self.backends.primary_provider();
        if let Some(client) = self.backends.primary() {
            match client.invoke(&prompt, &invoke).await {
                Ok(response) => match parse_analysis(&response.content) {
                    Some(payload) => {
                        if let Some(cascade) = &self.cascade {
                            cascade
                                .cache()
                                .store(
                                    REQUEST_TYPE,
                                    text,
                                    &serde_json::Value::Null,
                                    &response.content,
                                    Some(client.provider().as_str()),
                                )
                                .await;
                        }
                        return Some(AmbiguityAnalysis::from_payload(payload, AnalysisSource::Backend));
                    }
                    None => warn!("ambiguity backend returned unparseable analysis"),
                },
                Err(e) => warn!(error = %e, "ambiguity backend failed"),
            }
        }

        let cascade = self.cascade.as_ref()?;
        let request = FallbackRequest::new(REQUEST_TYPE, prompt, text)
            .with_attempted(attempted)
            .with_config(invoke);
        let fallback = cascade.handle(&request).await;
        if !fallback.is_generated() {
            debug!(strategy = ?fallback.strategy, "no generated analysis available");
            return None;
        }
        let source = match fallback.strategy {
            FallbackStrategy::Cache => AnalysisSource::Cache,
            _ => AnalysisSource::Backend,
        };
        parse_analysis(&fallback.response).map(|p| AmbiguityAnalysis::from_payload(p, source))
    }

    fn build_prompt(&self, text: &str, history: &[String]) -> String {
        let window = history.len().saturating_sub(self.config.history_window);
        let context = if history.is_empty() {
            "(none)".to_string()
        } else {
            history[window..].join("\n")
        };
        let schema = json!({
            "score": "0-100, higher means more ambiguous",
            "hedgingPhrases": ["..."],
            "contradictions": ["..."],
            "emotionalMarkers": [{"type": "frustration|urgency|excitement|anxiety", "confidence": 0.0, "evidence": "..."}],
            "vagueTerms": ["..."],
            "topics": ["..."],
            "strategy": "scope|constraints|outcomes|emotions|multi",
            "reasoning": "one sentence"
        });
        format!(
            "Assess how ambiguous this software request is.\n\n\
             Conversation so far:\n{}\n\n\
             Latest message:\n{}\n\n\
             Respond with a single JSON object shaped like:\n{}",
            context, text, schema
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CacheManager, Provider};
    use crate::logging::EventLogger;
    use crate::testing::ScriptedClient;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_vague_request_scores_high() {
        let analysis = heuristic_analysis("i want to build something with stuff");
        // vague x2 (50) + no specifics (20) + generic action (25)
        assert_eq!(analysis.score, 95.0);
        assert!(analysis.signals.vague_terms.contains(&"stuff".to_string()));
        assert!(analysis.signals.vague_terms.contains(&"something".to_string()));
        assert_eq!(analysis.strategy, ClarificationStrategy::Multi);
        assert_eq!(analysis.source, AnalysisSource::Heuristic);
    }

    #[test]
    fn test_specific_request_scores_low() {
        let analysis = heuristic_analysis(
            "Build a REST API with Node.js and Express for managing 500 user accounts with JWT authentication",
        );
        assert!(analysis.score < 50.0);
        assert_eq!(analysis.score, 0.0);
        assert!(analysis.signals.topics.contains(&"REST".to_string()));
        assert!(analysis.signals.topics.contains(&"API".to_string()));
        assert!(analysis.signals.topics.contains(&"Express".to_string()));
    }

    #[test]
    fn test_short_generic_request() {
        let analysis = heuristic_analysis("I want to build something");
        // vague (25) + no specifics (20) + generic action (25)
        assert_eq!(analysis.score, 70.0);
        assert_eq!(analysis.strategy, ClarificationStrategy::Scope);
    }

    #[test]
    fn test_hedging_uncertainty_and_question() {
        let analysis = heuristic_analysis("maybe an app? unsure");
        // hedging (20) + uncertainty (30) + ? (15) + short (30) + no specifics (20), capped
        assert_eq!(analysis.score, 100.0);
        assert_eq!(
            analysis.signals.hedging_phrases,
            vec!["maybe".to_string(), "unsure".to_string()]
        );

        let longer = heuristic_analysis("maybe an app? not sure");
        // five words: no short-request bonus
        assert_eq!(longer.score, 85.0);
    }

    #[test]
    fn test_each_term_scores_once() {
        let once = heuristic_analysis("something about the Payments module for Acme Corp");
        let twice =
            heuristic_analysis("something about the Payments module for Acme Corp, something");
        assert_eq!(once.score, twice.score);
    }

    #[test]
    fn test_sentence_initial_capital_is_not_specific() {
        let analysis = heuristic_analysis("Make it nicer");
        // short (30) + no specifics (20) + generic action "make it" (25)
        assert_eq!(analysis.score, 75.0);
    }

    #[test]
    fn test_emotional_markers_do_not_score() {
        let calm = heuristic_analysis("Add CSV export to the Billing page for 2024 invoices");
        let urgent =
            heuristic_analysis("Add CSV export to the Billing page for 2024 invoices asap");
        assert_eq!(calm.score, urgent.score);
        assert_eq!(urgent.signals.emotional_markers.len(), 1);
        assert_eq!(urgent.signals.emotional_markers[0].marker_type, "urgency");
        assert_eq!(urgent.signals.emotional_markers[0].evidence, "asap");
    }

    #[test]
    fn test_contradictions_detected() {
        let analysis = heuristic_analysis("It should be simple but also handle complex workflows");
        assert_eq!(analysis.signals.contradictions, vec!["simple vs complex".to_string()]);
    }

    #[test]
    fn test_matcher_tables_cover_every_term() {
        assert_eq!(EMOTIONS.len(), EMOTION_TERMS.len());
        for (matcher, (_, _, terms)) in EMOTIONS.iter().zip(EMOTION_TERMS) {
            assert_eq!(matcher.terms.len(), terms.len(), "{}", matcher.marker_type);
        }
        assert_eq!(CONTRADICTIONS.len(), CONTRADICTION_PAIRS.len());

        let analysis = heuristic_analysis("I'm fed up, it has to be quick yet comprehensive");
        assert_eq!(analysis.signals.emotional_markers[0].marker_type, "frustration");
        assert_eq!(analysis.signals.emotional_markers[0].evidence, "fed up");
        assert_eq!(
            analysis.signals.contradictions,
            vec!["quick vs comprehensive".to_string()]
        );
    }

    #[test]
    fn test_strategy_labels() {
        assert_eq!(ClarificationStrategy::from_label("Multi"), ClarificationStrategy::Multi);
        assert_eq!(ClarificationStrategy::from_label("timeline"), ClarificationStrategy::General);
        assert_eq!(ClarificationStrategy::for_score(70.0), ClarificationStrategy::Scope);
        assert_eq!(ClarificationStrategy::for_score(70.5), ClarificationStrategy::Multi);
    }

    proptest! {
        #[test]
        fn prop_heuristic_score_in_bounds(text in ".{0,200}") {
            let analysis = heuristic_analysis(&text);
            prop_assert!((0.0..=100.0).contains(&analysis.score));
        }

        #[test]
        fn prop_heuristic_is_deterministic(text in "[a-zA-Z ?.']{0,120}") {
            prop_assert_eq!(heuristic_analysis(&text), heuristic_analysis(&text));
        }
    }

    #[tokio::test]
    async fn test_offline_scorer_matches_heuristic() {
        let scorer = AmbiguityScorer::new(BackendSet::offline(), ScorerConfig::default());
        let text = "i want to build something with stuff";
        assert_eq!(scorer.analyze(text, &[]).await, heuristic_analysis(text));
    }

    #[tokio::test]
    async fn test_backend_analysis_is_clamped_and_defaulted() {
        let client = ScriptedClient::new(Provider::Anthropic)
            .reply(r#"Sure! {"score": 140, "vagueTerms": ["app"], "strategy": "emotions"}"#);
        let scorer = AmbiguityScorer::new(
            BackendSet::new().with_client(Arc::new(client)),
            ScorerConfig::default(),
        );

        let analysis = scorer.analyze("build an app", &["user: hi".to_string()]).await;
        assert_eq!(analysis.score, 100.0);
        assert_eq!(analysis.source, AnalysisSource::Backend);
        assert_eq!(analysis.strategy, ClarificationStrategy::Emotions);
        assert_eq!(analysis.signals.vague_terms, vec!["app".to_string()]);
        assert!(analysis.signals.topics.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_backend_output_falls_back() {
        let client = ScriptedClient::new(Provider::Anthropic).reply("I think it's fairly vague.");
        let scorer = AmbiguityScorer::new(
            BackendSet::new().with_client(Arc::new(client)),
            ScorerConfig::default(),
        );
        let analysis = scorer.analyze("I want to build something", &[]).await;
        assert_eq!(analysis.source, AnalysisSource::Heuristic);
        assert_eq!(analysis.score, 70.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out_to_heuristic() {
        let client = ScriptedClient::new(Provider::Anthropic)
            .always(r#"{"score": 5}"#)
            .with_delay(Duration::from_secs(30));
        let scorer = AmbiguityScorer::new(
            BackendSet::new().with_client(Arc::new(client)),
            ScorerConfig::default().with_timeout_ms(5000),
        );
        let analysis = scorer.analyze("I want to build something", &[]).await;
        assert_eq!(analysis.source, AnalysisSource::Heuristic);
        assert_eq!(analysis.score, 70.0);
    }

    #[tokio::test]
    async fn test_cascade_alternate_supplies_analysis() {
        let backends = BackendSet::new()
            .with_client(Arc::new(ScriptedClient::failing(Provider::Anthropic)))
            .with_client(Arc::new(
                ScriptedClient::new(Provider::OpenAI).reply(r#"{"score": 33}"#),
            ));
        let cascade = Arc::new(FallbackCascade::new(
            backends.clone(),
            Arc::new(CacheManager::in_memory()),
            Arc::new(EventLogger::tracing_only()),
        ));
        let scorer =
            AmbiguityScorer::new(backends, ScorerConfig::default()).with_cascade(cascade);

        let analysis = scorer.analyze("I want to build something", &[]).await;
        assert_eq!(analysis.source, AnalysisSource::Backend);
        assert_eq!(analysis.score, 33.0);
        assert_eq!(analysis.strategy, ClarificationStrategy::Scope);
    }
}
