//! The clarification loop engine.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::responses::{
    self, ERROR_RESPONSE, REFINED_NOTE, RESET_RESPONSE, ROUND_CAP_NOTE, SKIP_NOTE,
};
use super::state::{LoopConfig, SessionState, SessionStatus, TurnOutcome};
use crate::agents::{
    extract_sentences, AgentId, OrchestratorConfig, SubAgent, SubAgentOrchestrator, DEFAULT_GOAL,
};
use crate::ambiguity::{AmbiguityAnalysis, AmbiguityScorer, ScorerConfig};
use crate::classifier::{classify_response, is_acknowledgement, ResponseIntent};
use crate::config::ClarifyConfig;
use crate::echo::{GoalEcho, GoalEchoGenerator};
use crate::error::{Error, Result};
use crate::fallback::FallbackCascade;
use crate::intent::{
    extract_initial_intent, ExtractedIntent, InMemorySnapshotStore, IntentSnapshot, IntentTracker,
    SnapshotStore, SqliteSnapshotStore,
};
use crate::llm::{BackendSet, CacheManager, InMemoryResponseCache, RetryPolicy};
use crate::logging::{EventLogger, LogEntry, LogLevel};

const COMPONENT: &str = "meta_loop";
/// Upper bound on the idle window, keeps the cutoff arithmetic in range.
const MAX_IDLE_SECS: u64 = 10 * 365 * 24 * 3600;

/// Builder for [`MetaLoop`].
#[derive(Default)]
pub struct MetaLoopBuilder {
    backends: BackendSet,
    scorer: ScorerConfig,
    orchestrator: OrchestratorConfig,
    loop_config: LoopConfig,
    retry: Option<RetryPolicy>,
    cache: Option<Arc<CacheManager>>,
    store: Option<Arc<dyn SnapshotStore>>,
    logger: Option<Arc<EventLogger>>,
}

impl MetaLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reasoning backends. Defaults to none, which runs fully offline.
    pub fn backends(mut self, backends: BackendSet) -> Self {
        self.backends = backends;
        self
    }

    pub fn scorer_config(mut self, config: ScorerConfig) -> Self {
        self.scorer = config;
        self
    }

    pub fn orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    pub fn loop_config(mut self, config: LoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn logger(mut self, logger: Arc<EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> MetaLoop {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheManager::in_memory()));
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(EventLogger::tracing_only()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()));

        let cascade = Arc::new(FallbackCascade::new(
            self.backends.clone(),
            cache.clone(),
            logger.clone(),
        ));
        let scorer =
            AmbiguityScorer::new(self.backends.clone(), self.scorer).with_cascade(cascade.clone());
        let mut orchestrator = SubAgentOrchestrator::new(
            self.backends,
            cascade,
            cache,
            logger.clone(),
            self.orchestrator,
        );
        if let Some(retry) = self.retry {
            orchestrator = orchestrator.with_retry(retry);
        }

        MetaLoop {
            scorer,
            orchestrator,
            tracker: IntentTracker::new(store),
            echo: GoalEchoGenerator::with_thresholds(
                self.loop_config.ready_confidence,
                self.loop_config.ready_ambiguity,
            ),
            logger,
            config: self.loop_config,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

/// Per-session clarification state machine.
///
/// The in-memory session map is a cache over the snapshot store: on a miss
/// the session is rebuilt from its snapshot history, and only a session with
/// no history at all is treated as new.
pub struct MetaLoop {
    scorer: AmbiguityScorer,
    orchestrator: SubAgentOrchestrator,
    tracker: IntentTracker,
    echo: GoalEchoGenerator,
    logger: Arc<EventLogger>,
    config: LoopConfig,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MetaLoop {
    pub fn builder() -> MetaLoopBuilder {
        MetaLoopBuilder::new()
    }

    /// Production wiring from configuration.
    pub fn from_config(config: &ClarifyConfig) -> Result<Self> {
        config.validate()?;
        let backends = BackendSet::from_config(&config.backends)?;
        let cache = if config.cache.enabled {
            CacheManager::new(Arc::new(InMemoryResponseCache::new()), config.cache.clone())
        } else {
            CacheManager::disabled()
        };
        let store: Arc<dyn SnapshotStore> = match &config.snapshot_db {
            Some(path) => Arc::new(SqliteSnapshotStore::open(path)?),
            None => Arc::new(InMemorySnapshotStore::new()),
        };

        Ok(MetaLoopBuilder::new()
            .backends(backends)
            .scorer_config(config.scorer.clone())
            .orchestrator_config(config.orchestrator.clone())
            .loop_config(config.meta_loop.clone())
            .retry(config.retry.clone())
            .cache(Arc::new(cache))
            .snapshot_store(store)
            .logger(Arc::new(EventLogger::from_config(&config.logging)))
            .build())
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Begin a session with the user's first message.
    ///
    /// Any earlier history under the same id is discarded.
    pub async fn start_session(&self, session_id: &str, input: &str) -> Result<TurnOutcome> {
        validate(session_id, input)?;
        let started = Instant::now();

        let old = self.sessions.write().await.remove(session_id);
        if let Some(old) = old {
            self.orchestrator.retire_agents(&old.active_sub_agents).await;
        }
        if let Err(e) = self.tracker.store().delete_session(session_id).await {
            warn!(session_id, error = %e, "failed to clear previous snapshots");
        }

        let outcome = self.begin(SessionState::new(session_id), input).await;
        self.finish_request(&outcome, "start_session", started).await;
        Ok(outcome)
    }

    /// Advance a session with the user's reply.
    ///
    /// An unknown session is started with this message instead of failing.
    pub async fn continue_session(&self, session_id: &str, response: &str) -> Result<TurnOutcome> {
        validate(session_id, response)?;
        let started = Instant::now();

        let state = match self.load_session(session_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                self.logger
                    .info(Some(session_id), COMPONENT, "unknown session, starting fresh")
                    .await;
                let outcome = self.begin(SessionState::new(session_id), response).await;
                self.finish_request(&outcome, "continue_session", started).await;
                return Ok(outcome);
            }
            Err(e) => {
                self.logger
                    .error(Some(session_id), COMPONENT, format!("failed to load session: {}", e))
                    .await;
                let outcome = TurnOutcome {
                    state: SessionState::new(session_id),
                    response: ERROR_RESPONSE.to_string(),
                    needs_clarification: true,
                };
                self.finish_request(&outcome, "continue_session", started).await;
                return Ok(outcome);
            }
        };

        let outcome = match classify_response(response) {
            ResponseIntent::Reset => {
                self.reset_session(session_id).await;
                TurnOutcome {
                    state: SessionState::new(session_id),
                    response: RESET_RESPONSE.to_string(),
                    needs_clarification: true,
                }
            }
            intent => self.advance(state, response, intent).await,
        };
        self.finish_request(&outcome, "continue_session", started).await;
        Ok(outcome)
    }

    /// Current state, rebuilt from snapshots if not cached.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionState> {
        match self.load_session(session_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(session_id, error = %e, "failed to load session");
                None
            }
        }
    }

    /// Full snapshot history for a session, oldest first.
    pub async fn get_intent_map(&self, session_id: &str) -> Result<Vec<IntentSnapshot>> {
        self.tracker.history(session_id).await
    }

    /// Forget a session entirely.
    pub async fn reset_session(&self, session_id: &str) {
        let old = self.sessions.write().await.remove(session_id);
        if let Some(old) = old {
            self.orchestrator.retire_agents(&old.active_sub_agents).await;
        }
        if let Err(e) = self.tracker.store().delete_session(session_id).await {
            warn!(session_id, error = %e, "failed to delete snapshots on reset");
        }
        self.logger
            .info(Some(session_id), COMPONENT, "session reset")
            .await;
    }

    /// Mark a ready session as handed off to generation.
    pub async fn complete_session(&self, session_id: &str) -> Result<SessionState> {
        let mut state = self
            .load_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        if state.status != SessionStatus::Ready {
            return Err(Error::validation(format!(
                "session {} is {}, not ready",
                session_id, state.status
            )));
        }
        state.status = SessionStatus::Completed;
        state.updated_at = chrono::Utc::now();
        self.save(&state).await;
        Ok(state)
    }

    pub async fn flush_logs(&self) {
        self.logger.flush().await;
    }

    /// Live agents owned by this loop.
    pub async fn live_agents(&self) -> usize {
        self.orchestrator.registry_len().await
    }

    // ==================== Transitions ====================

    /// First message of a session: detecting → clarifying | ready.
    async fn begin(&self, mut state: SessionState, input: &str) -> TurnOutcome {
        state.push_user(input);
        let analysis = self.scorer.analyze(input, &[]).await;
        state.ambiguity_score = analysis.score;

        let intent = extract_initial_intent(input, &analysis);
        let confidence = clarity(analysis.score);
        self.capture(&mut state, input, &analysis, intent.clone(), confidence)
            .await;
        let echo = self.echo.generate(&intent, confidence, analysis.score);

        if self.config.needs_clarification(analysis.score) {
            let agents = self.spawn_round(&mut state, &analysis, input).await;
            let response = responses::clarification(&agents, None, state.round);
            self.respond(state, echo, response, SessionStatus::Clarifying)
                .await
        } else {
            let response = responses::ready(&echo, None);
            self.respond(state, echo, response, SessionStatus::Ready).await
        }
    }

    async fn advance(
        &self,
        mut state: SessionState,
        response: &str,
        intent: ResponseIntent,
    ) -> TurnOutcome {
        match state.status {
            SessionStatus::Ready | SessionStatus::Completed => {
                state.push_user(response);
                if intent == ResponseIntent::Skip || is_acknowledgement(response) {
                    self.confirm(state).await
                } else {
                    self.refine(state, response).await
                }
            }
            _ if state.active_sub_agents.is_empty() => {
                state.push_user(response);
                self.fresh_round(state, response).await
            }
            _ => {
                state.push_user(response);
                self.answer_agents(state, response, intent == ResponseIntent::Skip)
                    .await
            }
        }
    }

    /// Route an answer to the round's agents.
    async fn answer_agents(&self, mut state: SessionState, response: &str, skipped: bool) -> TurnOutcome {
        let ids = state.active_sub_agents.clone();
        if skipped {
            self.orchestrator.complete_agents(&ids).await;
        } else {
            for agent in self.orchestrator.agents(&ids).await {
                if !agent.is_active() {
                    continue;
                }
                if let Err(e) = self.orchestrator.process_response(&agent.id, response).await {
                    warn!(agent = %agent.id, error = %e, "failed to record answer");
                }
            }
        }

        let agents = self.orchestrator.agents(&ids).await;
        if agents.is_empty() {
            // Agents were lost (e.g. another process retired them)
            state.active_sub_agents.clear();
            return self.fresh_round(state, response).await;
        }

        if agents.iter().all(|a| !a.is_active()) {
            return self.finish_round(state, agents, skipped).await;
        }

        let context = original_request(&state);
        let active: Vec<AgentId> = agents.iter().filter(|a| a.is_active()).map(|a| a.id).collect();
        let advanced = self.orchestrator.advance_agents(&active, &context).await;
        if advanced.iter().all(|a| !a.is_active()) {
            // every remaining agent ran out of new questions
            let agents = self.orchestrator.agents(&ids).await;
            return self.finish_round(state, agents, false).await;
        }
        let text = responses::next_questions(&advanced);
        let echo = state.goal_echo.clone();
        let status = state.status;
        match echo {
            Some(echo) => self.respond(state, echo, text, status).await,
            None => {
                let echo = self.echo.generate(&ExtractedIntent::default(), 0.0, state.ambiguity_score);
                self.respond(state, echo, text, status).await
            }
        }
    }

    /// Every agent finished: synthesize, snapshot and decide.
    async fn finish_round(&self, mut state: SessionState, agents: Vec<SubAgent>, skipped: bool) -> TurnOutcome {
        state.status = SessionStatus::Synthesizing;
        let ids: Vec<AgentId> = agents.iter().map(|a| a.id).collect();

        let latest = latest_answer(&state);
        let history: Vec<String> = state.user_messages().map(str::to_string).collect();
        let analysis = self.scorer.analyze(&latest, &history).await;
        let synthesis = self.orchestrator.synthesize_findings(&agents).await;

        let intent = merge_intent(
            state.latest_snapshot().map(|s| &s.extracted_intent),
            synthesis.intent,
        );
        state.rescore(analysis.score);
        self.capture(&mut state, &latest, &analysis, intent.clone(), synthesis.confidence)
            .await;
        let echo = self.echo.generate(&intent, synthesis.confidence, analysis.score);

        self.orchestrator.retire_agents(&ids).await;
        state.active_sub_agents.clear();

        let note = if self.config.is_ready(synthesis.confidence, analysis.score) {
            Some(None)
        } else if skipped {
            Some(Some(SKIP_NOTE))
        } else if state.round >= self.config.max_rounds {
            Some(Some(ROUND_CAP_NOTE))
        } else {
            None
        };

        match note {
            Some(note) => {
                let text = responses::ready(&echo, note);
                self.respond(state, echo, text, SessionStatus::Ready).await
            }
            None => {
                let context = original_request(&state);
                let agents = self.spawn_round(&mut state, &analysis, &context).await;
                let text = responses::clarification(&agents, Some(&echo), state.round);
                self.respond(state, echo, text, SessionStatus::Clarifying)
                    .await
            }
        }
    }

    /// Clarifying with no live agents: score the message and spawn a batch.
    async fn fresh_round(&self, mut state: SessionState, response: &str) -> TurnOutcome {
        let history: Vec<String> = state.user_messages().map(str::to_string).collect();
        let analysis = self.scorer.analyze(response, &history).await;
        state.rescore(analysis.score);

        let intent = state
            .latest_snapshot()
            .map(|s| s.extracted_intent.clone())
            .unwrap_or_else(|| extract_initial_intent(response, &analysis));
        let confidence = state.latest_snapshot().map(|s| s.confidence).unwrap_or(0.0);
        self.capture(&mut state, response, &analysis, intent.clone(), confidence)
            .await;
        let echo = self.echo.generate(&intent, confidence, analysis.score);

        let context = original_request(&state);
        let agents = self.spawn_round(&mut state, &analysis, &context).await;
        let text = responses::clarification(&agents, Some(&echo), state.round);
        self.respond(state, echo, text, SessionStatus::Clarifying)
            .await
    }

    /// A ready session received more detail.
    async fn refine(&self, mut state: SessionState, response: &str) -> TurnOutcome {
        let history: Vec<String> = state.user_messages().map(str::to_string).collect();
        let analysis = self.scorer.analyze(response, &history).await;

        let previous = state.latest_snapshot();
        let confidence = previous.map(|s| s.confidence).unwrap_or(0.0);
        let mut intent = previous
            .map(|s| s.extracted_intent.clone())
            .unwrap_or_default();

        if self.config.needs_clarification(analysis.score) {
            state.rescore(analysis.score);
            self.capture(&mut state, response, &analysis, intent.clone(), confidence)
                .await;
            let echo = self.echo.generate(&intent, confidence, analysis.score);
            state.round = 0;
            let agents = self.spawn_round(&mut state, &analysis, response).await;
            let text = responses::clarification(&agents, None, state.round);
            return self
                .respond(state, echo, text, SessionStatus::Clarifying)
                .await;
        }

        let details = extract_sentences(response, 3);
        if details.is_empty() {
            return self.confirm(state).await;
        }
        for detail in details {
            if !intent
                .constraints
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&detail))
            {
                intent.constraints.push(detail);
            }
        }
        state.rescore(analysis.score);
        self.capture(&mut state, response, &analysis, intent.clone(), confidence)
            .await;
        let echo = self.echo.generate(&intent, confidence, analysis.score);
        let text = responses::ready(&echo, Some(REFINED_NOTE));
        self.respond(state, echo, text, SessionStatus::Ready).await
    }

    /// Nothing new to record: echo the current understanding again.
    async fn confirm(&self, state: SessionState) -> TurnOutcome {
        let echo = match (&state.goal_echo, state.latest_snapshot()) {
            (Some(echo), _) => echo.clone(),
            (None, Some(latest)) => self.echo.generate(
                &latest.extracted_intent,
                latest.confidence,
                latest.ambiguity_score,
            ),
            (None, None) => {
                self.echo
                    .generate(&ExtractedIntent::default(), 0.0, state.ambiguity_score)
            }
        };
        let text = responses::ready(&echo, None);
        let status = state.status;
        self.respond(state, echo, text, status).await
    }

    // ==================== Helpers ====================

    async fn spawn_round(
        &self,
        state: &mut SessionState,
        analysis: &AmbiguityAnalysis,
        input: &str,
    ) -> Vec<SubAgent> {
        state.round += 1;
        let agents = self
            .orchestrator
            .spawn_agents(&state.session_id, analysis.strategy, input, analysis.score)
            .await;
        state.active_sub_agents = agents.iter().map(|a| a.id).collect();
        agents
    }

    /// Append a snapshot. Storage failures are logged and the turn proceeds.
    async fn capture(
        &self,
        state: &mut SessionState,
        raw_input: &str,
        analysis: &AmbiguityAnalysis,
        intent: ExtractedIntent,
        confidence: f64,
    ) {
        match self
            .tracker
            .capture(&state.session_id, raw_input, analysis.score, intent, confidence)
            .await
        {
            Ok(snapshot) => state.intent_snapshots.push(snapshot),
            Err(e) => {
                self.logger
                    .error(
                        Some(state.session_id.as_str()),
                        COMPONENT,
                        format!("failed to record intent snapshot: {}", e),
                    )
                    .await
            }
        }
    }

    async fn respond(
        &self,
        mut state: SessionState,
        echo: GoalEcho,
        response: String,
        status: SessionStatus,
    ) -> TurnOutcome {
        state.status = status;
        state.goal_echo = Some(echo);
        state.push_assistant(&response);
        self.save(&state).await;
        TurnOutcome {
            needs_clarification: status == SessionStatus::Clarifying,
            state,
            response,
        }
    }

    /// Cache the session and drop sessions idle past the configured window.
    async fn save(&self, state: &SessionState) {
        let idle = self.config.session_idle_secs.min(MAX_IDLE_SECS) as i64;
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(idle);
        let evicted: Vec<SessionState> = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(state.session_id.clone(), state.clone());
            let stale: Vec<String> = sessions
                .values()
                .filter(|s| s.updated_at < cutoff && s.session_id != state.session_id)
                .map(|s| s.session_id.clone())
                .collect();
            stale.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for old in evicted {
            let retired = self.orchestrator.retire_agents(&old.active_sub_agents).await;
            debug!(session_id = %old.session_id, retired, "evicted idle session");
        }
    }

    /// Cache-aside load: memory, then snapshot history.
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        if let Some(state) = self.sessions.read().await.get(session_id) {
            return Ok(Some(state.clone()));
        }

        let history = self.tracker.history(session_id).await?;
        if history.is_empty() {
            return Ok(None);
        }
        let state = self.reconstruct(session_id, history);
        info!(session_id, status = %state.status, "session rebuilt from snapshots");
        self.save(&state).await;
        Ok(Some(state))
    }

    fn reconstruct(&self, session_id: &str, history: Vec<IntentSnapshot>) -> SessionState {
        let mut state = SessionState::new(session_id);
        for snapshot in &history {
            state.push_user(&snapshot.raw_input);
        }
        let len = history.len();
        let latest = &history[len - 1];
        state.ambiguity_score = latest.ambiguity_score;
        state.previous_ambiguity_score = (len > 1).then(|| history[len - 2].ambiguity_score);
        state.goal_echo = Some(self.echo.generate(
            &latest.extracted_intent,
            latest.confidence,
            latest.ambiguity_score,
        ));
        state.status = if self.config.is_ready(latest.confidence, latest.ambiguity_score)
            || !self.config.needs_clarification(latest.ambiguity_score)
        {
            SessionStatus::Ready
        } else {
            SessionStatus::Clarifying
        };
        state.created_at = history[0].timestamp;
        state.intent_snapshots = history;
        state
    }

    async fn finish_request(&self, outcome: &TurnOutcome, operation: &str, started: Instant) {
        self.logger
            .log(
                LogEntry::new(LogLevel::Info, COMPONENT, format!("{} handled", operation))
                    .with_session(outcome.state.session_id.clone())
                    .with_data(json!({
                        "status": outcome.state.status,
                        "score": outcome.state.ambiguity_score,
                        "turn": outcome.state.turn_count,
                        "round": outcome.state.round,
                        "agents": outcome.state.active_sub_agents.len(),
                    }))
                    .with_duration_ms(started.elapsed().as_millis() as u64),
            )
            .await;
        self.logger.flush().await;
    }
}

fn validate(session_id: &str, text: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(Error::validation("session id must not be empty"));
    }
    if text.trim().is_empty() {
        return Err(Error::validation("message must not be empty"));
    }
    Ok(())
}

/// Rough confidence for a request nobody has clarified yet.
fn clarity(score: f64) -> f64 {
    ((100.0 - score) / 100.0).clamp(0.0, 1.0)
}

fn original_request(state: &SessionState) -> String {
    state.user_messages().next().unwrap_or_default().to_string()
}

/// Most recent user message that carried information.
fn latest_answer(state: &SessionState) -> String {
    let messages: Vec<&str> = state.user_messages().collect();
    messages
        .iter()
        .rev()
        .find(|m| classify_response(m) == ResponseIntent::Answer)
        .or(messages.first())
        .map(|m| m.to_string())
        .unwrap_or_default()
}

/// Fold a round's synthesis into what was known before.
fn merge_intent(previous: Option<&ExtractedIntent>, next: ExtractedIntent) -> ExtractedIntent {
    let Some(previous) = previous else {
        return next;
    };

    let goal = match next.goal {
        Some(goal) if goal != DEFAULT_GOAL => Some(goal),
        fallback => previous.goal.clone().or(fallback),
    };
    let union = |old: &[String], new: Vec<String>| {
        let mut merged = old.to_vec();
        for item in new {
            if !merged.iter().any(|m| m.eq_ignore_ascii_case(&item)) {
                merged.push(item);
            }
        }
        merged
    };

    ExtractedIntent {
        goal,
        scope: next.scope.or_else(|| previous.scope.clone()),
        constraints: union(&previous.constraints, next.constraints),
        success_criteria: union(&previous.success_criteria, next.success_criteria),
        emotional_context: next
            .emotional_context
            .or_else(|| previous.emotional_context.clone()),
    }
}
