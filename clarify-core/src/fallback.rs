//! Tiered recovery for failed backend calls.
//!
//! When the primary backend fails, [`FallbackCascade::handle`] tries in
//! strict order:
//!
//! 1. an alternate backend (anything other than the provider that failed)
//! 2. the response cache
//! 3. a canned response picked by request type
//! 4. a manual-input response asking the user to rephrase or reset
//!
//! Each tier's failure is logged and swallowed. The last tier cannot fail,
//! so callers always get a usable response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::llm::{BackendSet, CacheManager, InvokeConfig, Provider};
use crate::logging::{EventLogger, LogEntry, LogLevel};

const COMPONENT: &str = "fallback";

/// Shown when every tier has failed.
pub const MANUAL_INPUT_MESSAGE: &str = "I'm sorry, I'm having trouble processing that right now. \
Could you rephrase your request in a sentence or two? You can also say **reset** to start over.";

const IDENTITY_PROMPT: &str = "Before we continue, please confirm who you are: \
your name and the email address associated with this request.";

const CLARIFY_PROMPT: &str = "Could you tell me a little more about what you're trying to achieve \
and who it's for?";

/// A backend call that needs recovering.
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    /// Kind of call, e.g. "clarify", "analysis", "synthesis"
    pub request_type: String,
    /// Prompt to replay against an alternate backend
    pub prompt: String,
    /// User input the call was about (part of the cache key)
    pub input: String,
    /// Extra cache-key context
    pub context: Value,
    /// Provider that already failed
    pub attempted_provider: Option<Provider>,
    pub config: InvokeConfig,
    pub session_id: Option<String>,
}

impl FallbackRequest {
    pub fn new(
        request_type: impl Into<String>,
        prompt: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            prompt: prompt.into(),
            input: input.into(),
            context: Value::Null,
            attempted_provider: None,
            config: InvokeConfig::default(),
            session_id: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_attempted(mut self, provider: Option<Provider>) -> Self {
        self.attempted_provider = provider;
        self
    }

    pub fn with_config(mut self, config: InvokeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Which tier produced a fallback response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    AlternateBackend,
    Cache,
    StaticResponse,
    ManualInput,
}

/// Result of running the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub strategy: FallbackStrategy,
    pub response: String,
    /// True only when every other tier failed
    pub requires_user_input: bool,
    /// Backend that answered, for the alternate tier
    pub provider: Option<Provider>,
}

impl FallbackResponse {
    fn new(strategy: FallbackStrategy, response: impl Into<String>) -> Self {
        Self {
            strategy,
            response: response.into(),
            requires_user_input: strategy == FallbackStrategy::ManualInput,
            provider: None,
        }
    }

    /// Whether the response came from a model (live or cached) rather than
    /// a fixed template.
    pub fn is_generated(&self) -> bool {
        matches!(
            self.strategy,
            FallbackStrategy::AlternateBackend | FallbackStrategy::Cache
        )
    }
}

/// The fallback cascade.
pub struct FallbackCascade {
    backends: BackendSet,
    cache: Arc<CacheManager>,
    logger: Arc<EventLogger>,
}

impl FallbackCascade {
    pub fn new(backends: BackendSet, cache: Arc<CacheManager>, logger: Arc<EventLogger>) -> Self {
        Self {
            backends,
            cache,
            logger,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Run the tiers in order until one produces a response.
    pub async fn handle(&self, request: &FallbackRequest) -> FallbackResponse {
        let session = request.session_id.as_deref();

        if let Some(response) = self.try_alternate_backend(request).await {
            return response;
        }

        if let Some(cached) = self
            .cache
            .lookup(&request.request_type, &request.input, &request.context)
            .await
        {
            self.record(request, FallbackStrategy::Cache, LogLevel::Info, "served from cache")
                .await;
            return FallbackResponse::new(FallbackStrategy::Cache, cached);
        }
        self.logger
            .log(Self::entry(session, LogLevel::Debug, "cache tier missed"))
            .await;

        if let Some(text) = static_response(&request.request_type) {
            self.record(
                request,
                FallbackStrategy::StaticResponse,
                LogLevel::Warn,
                "served static response",
            )
            .await;
            return FallbackResponse::new(FallbackStrategy::StaticResponse, text);
        }

        self.record(
            request,
            FallbackStrategy::ManualInput,
            LogLevel::Error,
            "all fallback tiers exhausted",
        )
        .await;
        FallbackResponse::new(FallbackStrategy::ManualInput, MANUAL_INPUT_MESSAGE)
    }

    async fn try_alternate_backend(&self, request: &FallbackRequest) -> Option<FallbackResponse> {
        let session = request.session_id.as_deref();
        let Some(client) = self.backends.alternate_to(request.attempted_provider) else {
            self.logger
                .log(Self::entry(session, LogLevel::Debug, "no alternate backend configured"))
                .await;
            return None;
        };
        let provider = client.provider();

        let started = Instant::now();
        match client.invoke(&request.prompt, &request.config).await {
            Ok(response) if !response.content.trim().is_empty() => {
                self.cache
                    .store(
                        &request.request_type,
                        &request.input,
                        &request.context,
                        &response.content,
                        Some(provider.as_str()),
                    )
                    .await;
                let mut entry = Self::entry(session, LogLevel::Info, "served by alternate backend")
                    .with_data(json!({
                        "request_type": request.request_type,
                        "provider": provider.as_str(),
                    }))
                    .with_duration_ms(started.elapsed().as_millis() as u64);
                if let Some(cost) = response.cost {
                    entry = entry.with_cost(cost);
                }
                self.logger.log(entry).await;

                let mut fallback =
                    FallbackResponse::new(FallbackStrategy::AlternateBackend, response.content);
                fallback.provider = Some(provider);
                Some(fallback)
            }
            Ok(_) => {
                self.logger
                    .log(
                        Self::entry(session, LogLevel::Warn, "alternate backend returned nothing")
                            .with_data(json!({"provider": provider.as_str()})),
                    )
                    .await;
                None
            }
            Err(e) => {
                self.logger
                    .log(
                        Self::entry(session, LogLevel::Warn, "alternate backend failed").with_data(
                            json!({"provider": provider.as_str(), "error": e.to_string()}),
                        ),
                    )
                    .await;
                None
            }
        }
    }

    async fn record(
        &self,
        request: &FallbackRequest,
        strategy: FallbackStrategy,
        level: LogLevel,
        message: &str,
    ) {
        self.logger
            .log(
                Self::entry(request.session_id.as_deref(), level, message).with_data(json!({
                    "request_type": request.request_type,
                    "strategy": strategy,
                })),
            )
            .await;
    }

    fn entry(session_id: Option<&str>, level: LogLevel, message: &str) -> LogEntry {
        let entry = LogEntry::new(level, COMPONENT, message);
        match session_id {
            Some(id) => entry.with_session(id),
            None => entry,
        }
    }
}

/// Canned response for a request type, if the type is recognised.
pub fn static_response(request_type: &str) -> Option<&'static str> {
    let kind = request_type.to_lowercase();
    if kind.contains("identity") || kind.contains("verify") {
        Some(IDENTITY_PROMPT)
    } else if kind.contains("clarify") || kind.contains("intent") {
        Some(CLARIFY_PROMPT)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::logging::MemoryLogSink;
    use crate::testing::ScriptedClient;
    use pretty_assertions::assert_eq;

    fn cascade(backends: BackendSet) -> (FallbackCascade, Arc<CacheManager>, Arc<MemoryLogSink>) {
        let cache = Arc::new(CacheManager::in_memory());
        let sink = Arc::new(MemoryLogSink::new());
        let logger = Arc::new(EventLogger::new(sink.clone(), 1));
        (FallbackCascade::new(backends, cache.clone(), logger), cache, sink)
    }

    #[tokio::test]
    async fn test_alternate_backend_answers_and_is_cached() {
        let alternate = Arc::new(ScriptedClient::new(Provider::OpenAI).reply("Who is it for?"));
        let backends = BackendSet::new()
            .with_client(Arc::new(ScriptedClient::failing(Provider::Anthropic)))
            .with_client(alternate.clone());
        let (cascade, cache, _) = cascade(backends);

        let request = FallbackRequest::new("clarify", "prompt", "build an app")
            .with_attempted(Some(Provider::Anthropic));
        let response = cascade.handle(&request).await;

        assert_eq!(response.strategy, FallbackStrategy::AlternateBackend);
        assert_eq!(response.response, "Who is it for?");
        assert_eq!(response.provider, Some(Provider::OpenAI));
        assert!(!response.requires_user_input);
        assert!(response.is_generated());
        assert_eq!(
            cache.lookup("clarify", "build an app", &Value::Null).await.as_deref(),
            Some("Who is it for?")
        );
    }

    #[tokio::test]
    async fn test_never_retries_the_attempted_provider() {
        let only = Arc::new(ScriptedClient::new(Provider::Anthropic).always("should not be used"));
        let (cascade, _, _) = cascade(BackendSet::new().with_client(only.clone()));

        let request = FallbackRequest::new("clarify", "p", "i")
            .with_attempted(Some(Provider::Anthropic));
        let response = cascade.handle(&request).await;

        assert_eq!(response.strategy, FallbackStrategy::StaticResponse);
        assert_eq!(only.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_tier_when_alternate_fails() {
        let backends = BackendSet::new()
            .with_client(Arc::new(ScriptedClient::failing(Provider::Anthropic)))
            .with_client(Arc::new(
                ScriptedClient::new(Provider::OpenAI).fail(Error::rate_limited("openai", "429")),
            ));
        let (cascade, cache, _) = cascade(backends);
        let ctx = json!({"agent": "scope"});
        cache
            .store("clarify", "build an app", &ctx, "What platforms?", None)
            .await;

        let request = FallbackRequest::new("clarify", "p", "build an app")
            .with_context(ctx)
            .with_attempted(Some(Provider::Anthropic));
        let response = cascade.handle(&request).await;

        assert_eq!(response.strategy, FallbackStrategy::Cache);
        assert_eq!(response.response, "What platforms?");
    }

    #[tokio::test]
    async fn test_static_table() {
        let (cascade, _, _) = cascade(BackendSet::offline());

        let identity = cascade
            .handle(&FallbackRequest::new("verify_identity", "p", "i"))
            .await;
        assert_eq!(identity.strategy, FallbackStrategy::StaticResponse);
        assert_eq!(identity.response, IDENTITY_PROMPT);

        let intent = cascade.handle(&FallbackRequest::new("intent_extraction", "p", "i")).await;
        assert_eq!(intent.response, CLARIFY_PROMPT);
        assert!(!intent.requires_user_input);
    }

    #[tokio::test]
    async fn test_manual_input_only_when_everything_failed() {
        let (cascade, _, sink) = cascade(BackendSet::offline());
        let response = cascade
            .handle(&FallbackRequest::new("synthesis", "p", "i").with_session("s-1"))
            .await;

        assert_eq!(response.strategy, FallbackStrategy::ManualInput);
        assert!(response.requires_user_input);
        assert!(response.response.contains("reset"));

        let entries = sink.entries().await;
        let last = entries.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.session_id.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn test_empty_alternate_answer_falls_through() {
        let backends = BackendSet::new().with_client(Arc::new(
            ScriptedClient::new(Provider::OpenRouter).reply("   "),
        ));
        let (cascade, _, _) = cascade(backends);
        let response = cascade.handle(&FallbackRequest::new("analysis", "p", "i")).await;
        assert_eq!(response.strategy, FallbackStrategy::ManualInput);
    }
}
