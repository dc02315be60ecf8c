//! Sub-agent orchestrator.
//!
//! Spawns typed agents for a clarification round, drives one question at a
//! time per agent, records findings and synthesizes them into one intent.
//! Every backend call degrades to a deterministic local path, so a round can
//! always advance with no backend at all.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::questions::{guard_question, rule_question};
use super::types::{AgentId, AgentStatus, AgentType, QaExchange, SubAgent};
use crate::ambiguity::{ClarificationStrategy, MULTI_STRATEGY_THRESHOLD};
use crate::classifier::{classify_response, ResponseIntent};
use crate::error::{Error, Result};
use crate::fallback::{FallbackCascade, FallbackRequest};
use crate::intent::ExtractedIntent;
use crate::json::{parse_question, parse_synthesis};
use crate::llm::{BackendSet, CacheManager, InvokeConfig, RetryPolicy};
use crate::logging::{EventLogger, LogEntry, LogLevel};

const COMPONENT: &str = "orchestrator";
const QUESTION_REQUEST: &str = "clarify";
const SYNTHESIS_REQUEST: &str = "synthesis";

/// Findings shorter than this are not worth keeping.
const MIN_FINDING_CHARS: usize = 10;
/// Fallback finding length when no sentence survives.
const FINDING_EXCERPT_CHARS: usize = 100;
/// Shortest finding that can stand in for a goal.
const MIN_GOAL_CHARS: usize = 20;

pub const DEFAULT_GOAL: &str = "Clarify and build what the user described";
pub const EMPTY_SUMMARY: &str = "No specific details were gathered yet.";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Questions each agent may ask
    pub max_questions: u32,
    /// An agent completes once its confidence exceeds this
    pub completion_confidence: f64,
    /// Confidence gained per informative answer
    pub confidence_step: f64,
    /// Findings kept per answer
    pub max_findings: usize,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_questions: 2,
            completion_confidence: 0.8,
            confidence_step: 0.4,
            max_findings: 3,
            max_tokens: 300,
            temperature: 0.7,
        }
    }
}

/// Combined result of a clarification round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub summary: String,
    pub intent: ExtractedIntent,
    /// Mean agent confidence
    pub confidence: f64,
}

/// Agent types spawned for a strategy.
pub fn agent_types_for(strategy: ClarificationStrategy, score: f64) -> Vec<AgentType> {
    if strategy == ClarificationStrategy::Multi || score > MULTI_STRATEGY_THRESHOLD {
        return vec![AgentType::Scope, AgentType::Constraints, AgentType::Outcomes];
    }
    match strategy {
        ClarificationStrategy::Scope => vec![AgentType::Scope],
        ClarificationStrategy::Constraints => vec![AgentType::Constraints],
        ClarificationStrategy::Outcomes => vec![AgentType::Outcomes],
        ClarificationStrategy::Emotions => vec![AgentType::Emotions, AgentType::Outcomes],
        _ => vec![AgentType::Scope, AgentType::Outcomes],
    }
}

/// Sentences long enough to carry information.
pub fn extract_sentences(response: &str, max_findings: usize) -> Vec<String> {
    response
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.chars().count() > MIN_FINDING_CHARS)
        .take(max_findings)
        .map(str::to_string)
        .collect()
}

/// Sentence-level findings from a free-text answer, falling back to an
/// excerpt of the whole answer.
pub fn extract_findings(response: &str, max_findings: usize) -> Vec<String> {
    let findings = extract_sentences(response, max_findings);
    if !findings.is_empty() {
        return findings;
    }

    let trimmed = response.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.chars().take(FINDING_EXCERPT_CHARS).collect()]
    }
}

/// Synthesis built from agent findings alone.
pub fn deterministic_synthesis(agents: &[SubAgent]) -> Synthesis {
    let all: Vec<&String> = agents.iter().flat_map(|a| &a.sandbox.findings).collect();
    let of_type = |agent_type: AgentType| -> Vec<String> {
        agents
            .iter()
            .filter(|a| a.agent_type == agent_type)
            .flat_map(|a| a.sandbox.findings.iter().cloned())
            .collect()
    };

    let summary = if all.is_empty() {
        EMPTY_SUMMARY.to_string()
    } else {
        all.iter()
            .take(3)
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(". ")
    };
    let goal = all
        .iter()
        .find(|f| f.chars().count() > MIN_GOAL_CHARS)
        .map(|f| f.to_string())
        .unwrap_or_else(|| DEFAULT_GOAL.to_string());

    let scope = of_type(AgentType::Scope);
    let emotions = of_type(AgentType::Emotions);

    Synthesis {
        summary,
        intent: ExtractedIntent {
            goal: Some(goal),
            scope: (!scope.is_empty()).then(|| scope.join("; ")),
            constraints: of_type(AgentType::Constraints),
            success_criteria: of_type(AgentType::Outcomes),
            emotional_context: (!emotions.is_empty()).then(|| emotions.join("; ")),
        },
        confidence: mean_confidence(agents),
    }
}

fn mean_confidence(agents: &[SubAgent]) -> f64 {
    if agents.is_empty() {
        return 0.0;
    }
    agents.iter().map(|a| a.sandbox.confidence).sum::<f64>() / agents.len() as f64
}

/// Owns every live sub-agent.
pub struct SubAgentOrchestrator {
    backends: BackendSet,
    cascade: Arc<FallbackCascade>,
    cache: Arc<CacheManager>,
    logger: Arc<EventLogger>,
    config: OrchestratorConfig,
    retry: RetryPolicy,
    registry: RwLock<HashMap<AgentId, SubAgent>>,
}

impl SubAgentOrchestrator {
    pub fn new(
        backends: BackendSet,
        cascade: Arc<FallbackCascade>,
        cache: Arc<CacheManager>,
        logger: Arc<EventLogger>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backends,
            cascade,
            cache,
            logger,
            config,
            retry: RetryPolicy::none(),
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Retry policy for primary backend calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Spawn a batch of agents, each with its first question ready.
    pub async fn spawn_agents(
        &self,
        session_id: &str,
        strategy: ClarificationStrategy,
        input: &str,
        score: f64,
    ) -> Vec<SubAgent> {
        let mut agents: Vec<SubAgent> = agent_types_for(strategy, score)
            .into_iter()
            .map(|agent_type| {
                let mut agent = SubAgent::new(session_id, agent_type, self.config.max_questions);
                agent
                    .sandbox
                    .context
                    .insert("input".to_string(), input.to_string());
                agent
                    .sandbox
                    .context
                    .insert("ambiguity_score".to_string(), format!("{:.0}", score));
                agent
            })
            .collect();

        let questions = join_all(
            agents
                .iter()
                .map(|agent| self.generate_next_question(agent, input)),
        )
        .await;
        for (agent, question) in agents.iter_mut().zip(questions) {
            agent.current_question = Some(question);
        }

        {
            let mut registry = self.registry.write().await;
            for agent in &agents {
                registry.insert(agent.id, agent.clone());
            }
        }

        self.logger
            .log(
                LogEntry::new(LogLevel::Info, COMPONENT, "spawned agents")
                    .with_session(session_id)
                    .with_data(json!({
                        "strategy": strategy.as_str(),
                        "score": score,
                        "types": agents.iter().map(|a| a.agent_type.as_str()).collect::<Vec<_>>(),
                    })),
            )
            .await;
        agents
    }

    /// Phrase the agent's next question. Never empty.
    ///
    /// Primary backend first, then the fallback cascade's generated tiers,
    /// then the curated rule table.
    pub async fn generate_next_question(&self, agent: &SubAgent, context: &str) -> String {
        let prompt = self.question_prompt(agent, context);
        let invoke = InvokeConfig::new(self.config.max_tokens, self.config.temperature);
        let cache_context = json!({
            "agent_type": agent.agent_type.as_str(),
            "questions_asked": agent.questions_asked,
            "history": agent.sandbox.history.iter().map(|qa| &qa.answer).collect::<Vec<_>>(),
        });

        let attempted = self.backends.primary_provider();
        if let Some(client) = self.backends.primary() {
            match client.invoke_with_retry(&prompt, &invoke, &self.retry).await {
                Ok(response) => {
                    if let Some(question) = parse_question(&response.content) {
                        self.cache
                            .store(
                                QUESTION_REQUEST,
                                context,
                                &cache_context,
                                &question,
                                Some(client.provider().as_str()),
                            )
                            .await;
                        return question;
                    }
                    warn!(agent = %agent.agent_type, "backend returned no usable question");
                }
                Err(e) => warn!(agent = %agent.agent_type, error = %e, "question generation failed"),
            }
        }

        let request = FallbackRequest::new(QUESTION_REQUEST, prompt, context)
            .with_context(cache_context)
            .with_attempted(attempted)
            .with_config(invoke)
            .with_session(agent.session_id.clone());
        let fallback = self.cascade.handle(&request).await;
        if fallback.is_generated() {
            if let Some(question) = parse_question(&fallback.response) {
                return question;
            }
        }

        debug!(agent = %agent.agent_type, asked = agent.questions_asked, "using rule-table question");
        guard_question(
            agent.agent_type,
            rule_question(agent.agent_type, agent.has_answered(), agent.questions_asked),
        )
    }

    /// Generate and store the next question for each still-active agent.
    ///
    /// An agent that can only repeat a question it already asked has nothing
    /// left to learn and is marked failed.
    pub async fn advance_agents(&self, ids: &[AgentId], context: &str) -> Vec<SubAgent> {
        let active: Vec<SubAgent> = self
            .agents(ids)
            .await
            .into_iter()
            .filter(|a| a.is_active())
            .collect();

        let questions = join_all(
            active
                .iter()
                .map(|agent| self.generate_next_question(agent, context)),
        )
        .await;

        let mut registry = self.registry.write().await;
        active
            .into_iter()
            .zip(questions)
            .filter_map(|(agent, question)| {
                let stored = registry.get_mut(&agent.id)?;
                if !stored.is_active() {
                    return Some(stored.clone());
                }
                let repeated = stored
                    .sandbox
                    .history
                    .iter()
                    .any(|qa| qa.question.trim().eq_ignore_ascii_case(question.trim()));
                if repeated {
                    stored.status = AgentStatus::Failed;
                    stored.current_question = None;
                    debug!(agent = %stored.agent_type, "no new question, agent failed");
                } else {
                    stored.current_question = Some(question);
                }
                Some(stored.clone())
            })
            .collect()
    }

    /// Record the user's answer to an agent's pending question.
    ///
    /// A skip completes the agent without findings. Answering a finished
    /// agent is a no-op.
    pub async fn process_response(&self, agent_id: &AgentId, response: &str) -> Result<SubAgent> {
        let mut registry = self.registry.write().await;
        let agent = registry
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {}", agent_id)))?;
        if !agent.is_active() {
            return Ok(agent.clone());
        }

        let question = agent.current_question.take().unwrap_or_default();
        agent.sandbox.history.push(QaExchange {
            question,
            answer: response.to_string(),
            timestamp: chrono::Utc::now(),
        });
        agent.questions_asked += 1;

        if classify_response(response) != ResponseIntent::Answer {
            agent.status = AgentStatus::Completed;
            debug!(agent = %agent.agent_type, "agent skipped by user");
            return Ok(agent.clone());
        }

        agent
            .sandbox
            .findings
            .extend(extract_findings(response, self.config.max_findings));
        agent.sandbox.confidence = (agent.sandbox.confidence + self.config.confidence_step).min(1.0);

        if agent.questions_asked >= agent.max_questions
            || agent.sandbox.confidence > self.config.completion_confidence
        {
            agent.status = AgentStatus::Completed;
        }
        Ok(agent.clone())
    }

    /// Combine the findings of a finished round into one intent.
    pub async fn synthesize_findings(&self, agents: &[SubAgent]) -> Synthesis {
        let deterministic = deterministic_synthesis(agents);
        let session = agents.first().map(|a| a.session_id.clone());
        let findings: Vec<String> = agents
            .iter()
            .flat_map(|a| {
                a.sandbox
                    .findings
                    .iter()
                    .map(move |f| format!("[{}] {}", a.agent_type, f))
            })
            .collect();
        if findings.is_empty() {
            return deterministic;
        }

        let prompt = format!(
            "Combine these clarification findings into one intent.\n\n{}\n\n\
             Respond with a single JSON object: {{\"summary\": \"...\", \"extractedIntent\": \
             {{\"goal\": \"...\", \"scope\": \"...\", \"constraints\": [], \
             \"successCriteria\": [], \"emotionalContext\": \"...\"}}}}",
            findings.join("\n")
        );
        let input = findings.join("\n");
        let invoke = InvokeConfig::new(self.config.max_tokens * 2, 0.3);
        let started = Instant::now();

        let attempted = self.backends.primary_provider();
        let mut text = None;
        if let Some(client) = self.backends.primary() {
            match client.invoke_with_retry(&prompt, &invoke, &self.retry).await {
                Ok(response) if parse_synthesis(&response.content).is_some() => {
                    self.cache
                        .store(
                            SYNTHESIS_REQUEST,
                            &input,
                            &serde_json::Value::Null,
                            &response.content,
                            Some(client.provider().as_str()),
                        )
                        .await;
                    text = Some(response.content);
                }
                Ok(_) => warn!("backend returned unparseable synthesis"),
                Err(e) => warn!(error = %e, "synthesis failed"),
            }
        }
        if text.is_none() {
            let mut request = FallbackRequest::new(SYNTHESIS_REQUEST, prompt, input)
                .with_attempted(attempted)
                .with_config(invoke);
            if let Some(id) = &session {
                request = request.with_session(id.clone());
            }
            let fallback = self.cascade.handle(&request).await;
            if fallback.is_generated() {
                text = Some(fallback.response);
            }
        }

        let Some(payload) = text.as_deref().and_then(parse_synthesis) else {
            return deterministic;
        };

        let mut entry = LogEntry::new(LogLevel::Debug, COMPONENT, "synthesized findings")
            .with_duration_ms(started.elapsed().as_millis() as u64);
        if let Some(id) = session {
            entry = entry.with_session(id);
        }
        self.logger.log(entry).await;

        Synthesis {
            summary: payload.summary,
            intent: ExtractedIntent {
                goal: payload.goal.or(deterministic.intent.goal),
                scope: payload.scope,
                constraints: payload.constraints,
                success_criteria: payload.success_criteria,
                emotional_context: payload.emotional_context,
            },
            confidence: deterministic.confidence,
        }
    }

    pub async fn get_agent(&self, id: &AgentId) -> Option<SubAgent> {
        self.registry.read().await.get(id).cloned()
    }

    /// Agents for `ids`, in order, skipping unknown ids.
    pub async fn agents(&self, ids: &[AgentId]) -> Vec<SubAgent> {
        let registry = self.registry.read().await;
        ids.iter().filter_map(|id| registry.get(id).cloned()).collect()
    }

    /// Mark every listed agent completed.
    pub async fn complete_agents(&self, ids: &[AgentId]) -> Vec<SubAgent> {
        let mut registry = self.registry.write().await;
        ids.iter()
            .filter_map(|id| {
                let agent = registry.get_mut(id)?;
                if agent.is_active() {
                    agent.status = AgentStatus::Completed;
                    agent.current_question = None;
                }
                Some(agent.clone())
            })
            .collect()
    }

    /// Drop agents from the registry. Returns how many were removed.
    pub async fn retire_agents(&self, ids: &[AgentId]) -> usize {
        let mut registry = self.registry.write().await;
        ids.iter().filter(|id| registry.remove(id).is_some()).count()
    }

    pub async fn registry_len(&self) -> usize {
        self.registry.read().await.len()
    }

    fn question_prompt(&self, agent: &SubAgent, context: &str) -> String {
        let history = if agent.sandbox.history.is_empty() {
            "(no questions asked yet)".to_string()
        } else {
            agent
                .sandbox
                .history
                .iter()
                .map(|qa| format!("Q: {}\nA: {}", qa.question, qa.answer))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "You are a {} clarification agent. Your job is to understand {}.\n\n\
             User request:\n{}\n\n\
             Previous questions and answers:\n{}\n\n\
             Ask exactly one short, open question that moves this forward. \
             Respond with JSON: {{\"question\": \"...\"}}",
            agent.agent_type,
            agent.agent_type.focus(),
            context,
            history
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use crate::testing::ScriptedClient;
    use pretty_assertions::assert_eq;

    fn offline() -> SubAgentOrchestrator {
        with_backends(BackendSet::offline())
    }

    fn with_backends(backends: BackendSet) -> SubAgentOrchestrator {
        let cache = Arc::new(CacheManager::in_memory());
        let logger = Arc::new(EventLogger::tracing_only());
        let cascade = Arc::new(FallbackCascade::new(
            backends.clone(),
            cache.clone(),
            logger.clone(),
        ));
        SubAgentOrchestrator::new(backends, cascade, cache, logger, OrchestratorConfig::default())
    }

    fn types(agents: &[SubAgent]) -> Vec<AgentType> {
        agents.iter().map(|a| a.agent_type).collect()
    }

    #[tokio::test]
    async fn test_spawn_multi_and_scope() {
        let orchestrator = offline();
        let multi = orchestrator
            .spawn_agents("s", ClarificationStrategy::Multi, "build stuff", 80.0)
            .await;
        assert_eq!(
            types(&multi),
            vec![AgentType::Scope, AgentType::Constraints, AgentType::Outcomes]
        );

        let scope = orchestrator
            .spawn_agents("s", ClarificationStrategy::Scope, "build stuff", 50.0)
            .await;
        assert_eq!(types(&scope), vec![AgentType::Scope]);
        assert_eq!(orchestrator.registry_len().await, 4);

        for agent in multi.iter().chain(&scope) {
            assert!(agent.is_active());
            assert_eq!(agent.questions_asked, 0);
            assert!(!agent.current_question.as_deref().unwrap_or("").is_empty());
        }
    }

    #[test]
    fn test_strategy_table() {
        use ClarificationStrategy::*;
        assert_eq!(agent_types_for(Scope, 75.0).len(), 3);
        assert_eq!(agent_types_for(Constraints, 40.0), vec![AgentType::Constraints]);
        assert_eq!(agent_types_for(Outcomes, 40.0), vec![AgentType::Outcomes]);
        assert_eq!(
            agent_types_for(Emotions, 40.0),
            vec![AgentType::Emotions, AgentType::Outcomes]
        );
        assert_eq!(
            agent_types_for(General, 40.0),
            vec![AgentType::Scope, AgentType::Outcomes]
        );
    }

    #[tokio::test]
    async fn test_skip_completes_without_findings() {
        let orchestrator = offline();
        let agent = orchestrator
            .spawn_agents("s", ClarificationStrategy::Scope, "an app", 50.0)
            .await
            .remove(0);

        let updated = orchestrator.process_response(&agent.id, "skip").await.unwrap();
        assert_eq!(updated.status, AgentStatus::Completed);
        assert!(updated.sandbox.findings.is_empty());
        assert_eq!(updated.questions_asked, 1);
        assert_eq!(updated.sandbox.history.len(), 1);
    }

    #[tokio::test]
    async fn test_two_answers_complete_agent() {
        let orchestrator = offline();
        let agent = orchestrator
            .spawn_agents("s", ClarificationStrategy::Scope, "an app", 50.0)
            .await
            .remove(0);

        let first = orchestrator
            .process_response(&agent.id, "A recipe manager for my family. It runs on phones.")
            .await
            .unwrap();
        assert_eq!(first.status, AgentStatus::Active);
        assert_eq!(
            first.sandbox.findings,
            vec!["A recipe manager for my family", "It runs on phones"]
        );
        assert!((first.sandbox.confidence - 0.4).abs() < 1e-9);

        let advanced = orchestrator.advance_agents(&[agent.id], "an app").await;
        assert_eq!(advanced.len(), 1);
        assert!(advanced[0].current_question.is_some());

        let second = orchestrator
            .process_response(&agent.id, "Mostly weeknight dinners")
            .await
            .unwrap();
        assert_eq!(second.status, AgentStatus::Completed);
        assert_eq!(second.questions_asked, 2);

        // completed agents ignore further answers
        let third = orchestrator.process_response(&agent.id, "more").await.unwrap();
        assert_eq!(third, second);
        assert!(orchestrator.advance_agents(&[agent.id], "an app").await.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_question_fails_agent() {
        let client = Arc::new(
            ScriptedClient::new(Provider::Anthropic).always(r#"{"question": "What platform?"}"#),
        );
        let backends = BackendSet::new().with_client(client);
        let cache = Arc::new(CacheManager::in_memory());
        let logger = Arc::new(EventLogger::tracing_only());
        let cascade = Arc::new(FallbackCascade::new(backends.clone(), cache.clone(), logger.clone()));
        let orchestrator = SubAgentOrchestrator::new(
            backends,
            cascade,
            cache,
            logger,
            OrchestratorConfig {
                max_questions: 3,
                ..OrchestratorConfig::default()
            },
        );

        let agent = orchestrator
            .spawn_agents("s", ClarificationStrategy::Constraints, "an app", 50.0)
            .await
            .remove(0);
        assert_eq!(agent.current_question.as_deref(), Some("What platform?"));
        orchestrator
            .process_response(&agent.id, "Android phones")
            .await
            .unwrap();

        let advanced = orchestrator.advance_agents(&[agent.id], "an app").await;
        assert_eq!(advanced[0].status, AgentStatus::Failed);
        assert!(advanced[0].current_question.is_none());
        assert!(!advanced[0].is_active());
        assert_eq!(advanced[0].sandbox.findings, vec!["Android phones"]);
    }

    #[test]
    fn test_extract_sentences_has_no_fallback() {
        assert!(extract_sentences("yes", 3).is_empty());
        assert_eq!(
            extract_sentences("Use Postgres for storage. ok", 3),
            vec!["Use Postgres for storage"]
        );
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let err = offline()
            .process_response(&AgentId::new(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_extract_findings() {
        assert_eq!(
            extract_findings("Short. This one is long enough! And this one too? x", 3),
            vec!["This one is long enough", "And this one too"]
        );
        assert_eq!(extract_findings("iOS", 3), vec!["iOS"]);
        assert_eq!(extract_findings(&"a".repeat(150), 3)[0].len(), 100);
        assert!(extract_findings("   ", 3).is_empty());
        let many = "First sentence here. Second sentence here. Third sentence here. Fourth sentence here.";
        assert_eq!(extract_findings(many, 3).len(), 3);
    }

    #[tokio::test]
    async fn test_backend_question_is_used_and_cached() {
        let client = Arc::new(
            ScriptedClient::new(Provider::Anthropic).reply(r#"{"question": "Who will use it?"}"#),
        );
        let orchestrator = with_backends(BackendSet::new().with_client(client.clone()));
        let agents = orchestrator
            .spawn_agents("s", ClarificationStrategy::Scope, "an app", 50.0)
            .await;
        assert_eq!(agents[0].current_question.as_deref(), Some("Who will use it?"));
        assert_eq!(orchestrator.cache.stats().await.writes, 1);
    }

    #[tokio::test]
    async fn test_failed_backend_uses_alternate_then_rules() {
        let primary = Arc::new(ScriptedClient::failing(Provider::Anthropic));
        let alternate = Arc::new(ScriptedClient::new(Provider::OpenAI).reply("1. What platform?"));
        let backends = BackendSet::new()
            .with_client(primary.clone())
            .with_client(alternate.clone());
        let orchestrator = with_backends(backends);

        let agents = orchestrator
            .spawn_agents("s", ClarificationStrategy::Constraints, "an app", 50.0)
            .await;
        assert_eq!(agents[0].current_question.as_deref(), Some("What platform?"));

        // same request again: alternate is drained, the cache answers
        let agent = &agents[0];
        let cached = orchestrator.generate_next_question(agent, "an app").await;
        assert_eq!(cached, "What platform?");

        // nothing cached for a new context: rule table
        let question = orchestrator.generate_next_question(agent, "a website").await;
        assert_eq!(question, rule_question(AgentType::Constraints, false, 0));
    }

    fn finished(agent_type: AgentType, findings: &[&str], confidence: f64) -> SubAgent {
        let mut agent = SubAgent::new("s", agent_type, 2);
        agent.status = AgentStatus::Completed;
        agent.sandbox.findings = findings.iter().map(|f| f.to_string()).collect();
        agent.sandbox.confidence = confidence;
        agent
    }

    #[tokio::test]
    async fn test_deterministic_synthesis() {
        let agents = vec![
            finished(AgentType::Scope, &["A meal planner for families"], 0.8),
            finished(AgentType::Constraints, &["Runs on iOS", "No servers"], 0.4),
            finished(AgentType::Outcomes, &["Plans a week in five minutes"], 0.6),
        ];
        let synthesis = offline().synthesize_findings(&agents).await;

        assert!((synthesis.confidence - 0.6).abs() < 1e-9);
        assert_eq!(
            synthesis.summary,
            "A meal planner for families. Runs on iOS. No servers"
        );
        assert_eq!(
            synthesis.intent.goal.as_deref(),
            Some("A meal planner for families")
        );
        assert_eq!(
            synthesis.intent.scope.as_deref(),
            Some("A meal planner for families")
        );
        assert_eq!(synthesis.intent.constraints, vec!["Runs on iOS", "No servers"]);
        assert_eq!(
            synthesis.intent.success_criteria,
            vec!["Plans a week in five minutes"]
        );
        assert_eq!(synthesis.intent.emotional_context, None);
    }

    #[tokio::test]
    async fn test_synthesis_defaults_without_findings() {
        let synthesis = offline().synthesize_findings(&[]).await;
        assert_eq!(synthesis.confidence, 0.0);
        assert_eq!(synthesis.summary, EMPTY_SUMMARY);
        assert_eq!(synthesis.intent.goal.as_deref(), Some(DEFAULT_GOAL));
    }

    #[tokio::test]
    async fn test_backend_synthesis() {
        let client = Arc::new(ScriptedClient::new(Provider::Anthropic).reply(
            r#"{"summary": "Family meal planner", "extractedIntent": {"goal": "Plan family meals", "constraints": ["iOS"]}}"#,
        ));
        let orchestrator = with_backends(BackendSet::new().with_client(client));
        let agents = vec![finished(AgentType::Scope, &["Meals for a family of four"], 1.0)];

        let synthesis = orchestrator.synthesize_findings(&agents).await;
        assert_eq!(synthesis.summary, "Family meal planner");
        assert_eq!(synthesis.intent.goal.as_deref(), Some("Plan family meals"));
        assert_eq!(synthesis.intent.constraints, vec!["iOS"]);
        assert_eq!(synthesis.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_complete_and_retire() {
        let orchestrator = offline();
        let agents = orchestrator
            .spawn_agents("s", ClarificationStrategy::Multi, "x", 90.0)
            .await;
        let ids: Vec<AgentId> = agents.iter().map(|a| a.id).collect();

        let completed = orchestrator.complete_agents(&ids).await;
        assert!(completed.iter().all(|a| a.status == AgentStatus::Completed));
        assert_eq!(orchestrator.retire_agents(&ids).await, 3);
        assert_eq!(orchestrator.registry_len().await, 0);
        assert!(orchestrator.get_agent(&ids[0]).await.is_none());
    }
}
