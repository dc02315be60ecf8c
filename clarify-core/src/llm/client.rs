//! LLM client trait, provider implementations and the primary/fallback set.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::retry::RetryPolicy;
use super::types::{
    ChatRole, CompletionRequest, CompletionResponse, InvokeConfig, ModelSpec, Provider,
    StopReason, TokenUsage,
};

/// Reasoning backend contract.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a request.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the provider for this client.
    fn provider(&self) -> Provider;

    /// List available models.
    fn available_models(&self) -> Vec<ModelSpec>;

    /// Invoke the backend with a single prompt.
    async fn invoke(&self, prompt: &str, config: &InvokeConfig) -> Result<CompletionResponse> {
        self.complete(config.to_request(prompt)).await
    }

    /// Invoke with exponential backoff on retryable failures.
    async fn invoke_with_retry(
        &self,
        prompt: &str,
        config: &InvokeConfig,
        policy: &RetryPolicy,
    ) -> Result<CompletionResponse> {
        policy.execute(|| self.invoke(prompt, config)).await
    }

    /// Estimate the USD cost of `usage` on `model` (or the first listed model).
    fn estimate_cost(&self, usage: &TokenUsage, model: Option<&str>) -> f64 {
        let models = self.available_models();
        let spec = model
            .and_then(|id| models.iter().find(|m| m.id == id || id.starts_with(&m.id)))
            .or_else(|| models.first());
        spec.map(|m| m.calculate_cost(usage.input_tokens, usage.output_tokens))
            .unwrap_or(0.0)
    }
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 60,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);

    // Proxy auto-detection can panic in some sandboxed environments.
    // Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e))),
    }
}

/// Map an HTTP status to the error taxonomy.
pub(crate) fn classify_status(provider: Provider, status: u16, message: String) -> Error {
    match status {
        429 => Error::rate_limited(provider.as_str(), message),
        408 => Error::BackendTimeout {
            provider: provider.to_string(),
            duration_ms: 0,
        },
        500..=599 => Error::backend_unavailable(provider.as_str(), format!("{}: {}", status, message)),
        _ => Error::backend_rejected(provider.as_str(), format!("{}: {}", status, message)),
    }
}

/// Map a transport failure to the error taxonomy.
fn classify_transport(provider: Provider, timeout_secs: u64, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::backend_timeout(provider.as_str(), timeout_secs * 1000)
    } else {
        Error::backend_unavailable(provider.as_str(), format!("HTTP request failed: {}", err))
    }
}

/// Anthropic Claude client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let provider = self.provider();
        let model = request
            .model
            .or(self.config.default_model.clone())
            .unwrap_or_else(|| ModelSpec::claude_sonnet().id);

        let messages: Vec<AnthropicMessage> = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant".to_string(),
                    // System prompt travels in its own field
                    ChatRole::User | ChatRole::System => "user".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let api_request = AnthropicRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(1024),
            system: request.system,
            temperature: request.temperature,
            stop_sequences: request.stop,
        };

        let url = format!("{}/v1/messages", self.base_url());
        debug!(%provider, %model, "complete: sending request");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| classify_transport(provider, self.config.timeout_secs, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(provider, self.config.timeout_secs, e))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<AnthropicError>(&body) {
                Ok(error) => format!("{}: {}", error.error.error_type, error.error.message),
                Err(_) => body,
            };
            return Err(classify_status(provider, status.as_u16(), message));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            Error::backend_rejected(provider.as_str(), format!("failed to parse response: {}", e))
        })?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_ref())
            .cloned()
            .collect::<Vec<_>>()
            .join("");

        let stop_reason = api_response.stop_reason.as_deref().map(|r| match r {
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        });

        let usage = TokenUsage::new(
            api_response.usage.input_tokens,
            api_response.usage.output_tokens,
        );
        let cost = self.estimate_cost(&usage, Some(&model));

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content,
            stop_reason,
            usage,
            timestamp: Utc::now(),
            cost: Some(cost),
            metadata: HashMap::from([("provider".to_string(), provider.to_string())]),
        })
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn available_models(&self) -> Vec<ModelSpec> {
        vec![ModelSpec::claude_sonnet(), ModelSpec::claude_haiku()]
    }
}

/// OpenAI-compatible chat completions client.
///
/// Also serves OpenRouter, which speaks the same wire format under a
/// different base URL.
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
    provider: Provider,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";
    const OPENROUTER_BASE_URL: &'static str = "https://openrouter.ai/api";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self {
            config,
            http,
            provider: Provider::OpenAI,
        })
    }

    /// Client for OpenRouter's OpenAI-compatible endpoint.
    pub fn openrouter(config: ClientConfig) -> Result<Self> {
        let mut client = Self::new(config)?;
        client.provider = Provider::OpenRouter;
        Ok(client)
    }

    fn base_url(&self) -> &str {
        let default = match self.provider {
            Provider::OpenRouter => Self::OPENROUTER_BASE_URL,
            _ => Self::DEFAULT_BASE_URL,
        };
        self.config.base_url.as_deref().unwrap_or(default)
    }

    fn default_model(&self) -> String {
        match self.provider {
            Provider::OpenRouter => ModelSpec::openrouter_sonnet().id,
            _ => ModelSpec::gpt4o().id,
        }
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    id: String,
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let provider = self.provider;
        let model = request
            .model
            .or(self.config.default_model.clone())
            .unwrap_or_else(|| self.default_model());

        let mut messages: Vec<OpenAIMessage> = Vec::new();

        if let Some(system) = &request.system {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }

        for m in &request.messages {
            messages.push(OpenAIMessage {
                role: match m.role {
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "assistant".to_string(),
                    ChatRole::System => "system".to_string(),
                },
                content: m.content.clone(),
            });
        }

        let api_request = OpenAIRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop,
        };

        let url = format!("{}/v1/chat/completions", self.base_url());
        debug!(%provider, %model, "complete: sending request");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| classify_transport(provider, self.config.timeout_secs, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(provider, self.config.timeout_secs, e))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<OpenAIError>(&body) {
                Ok(error) => error.error.message,
                Err(_) => body,
            };
            return Err(classify_status(provider, status.as_u16(), message));
        }

        let api_response: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            Error::backend_rejected(provider.as_str(), format!("failed to parse response: {}", e))
        })?;

        let choice = api_response
            .choices
            .first()
            .ok_or_else(|| Error::backend_rejected(provider.as_str(), "no choices in response"))?;

        let stop_reason = choice.finish_reason.as_deref().map(|r| match r {
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        });

        let usage = api_response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let cost = self.estimate_cost(&usage, Some(&model));

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content.clone(),
            stop_reason,
            usage,
            timestamp: Utc::now(),
            cost: Some(cost),
            metadata: HashMap::from([("provider".to_string(), provider.to_string())]),
        })
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn available_models(&self) -> Vec<ModelSpec> {
        match self.provider {
            Provider::OpenRouter => vec![
                ModelSpec::openrouter_sonnet(),
                ModelSpec::openrouter_gpt4o_mini(),
            ],
            _ => vec![ModelSpec::gpt4o(), ModelSpec::gpt4o_mini()],
        }
    }
}

/// Build a client for `provider`.
pub fn create_client(provider: Provider, config: ClientConfig) -> Result<Arc<dyn LLMClient>> {
    let client: Arc<dyn LLMClient> = match provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(config)?),
        Provider::OpenAI => Arc::new(OpenAIClient::new(config)?),
        Provider::OpenRouter => Arc::new(OpenAIClient::openrouter(config)?),
    };
    Ok(client)
}

/// Per-provider connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

impl ProviderSettings {
    fn has_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Which backends to build and which one to prefer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub primary: Provider,
    pub fallback: Option<Provider>,
    /// HTTP timeout for every backend
    pub timeout_secs: u64,
    pub anthropic: ProviderSettings,
    pub openai: ProviderSettings,
    pub openrouter: ProviderSettings,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            primary: Provider::Anthropic,
            fallback: Some(Provider::OpenAI),
            timeout_secs: 60,
            anthropic: ProviderSettings::default(),
            openai: ProviderSettings::default(),
            openrouter: ProviderSettings::default(),
        }
    }
}

impl BackendsConfig {
    pub fn settings(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::Anthropic => &self.anthropic,
            Provider::OpenAI => &self.openai,
            Provider::OpenRouter => &self.openrouter,
        }
    }

    pub fn settings_mut(&mut self, provider: Provider) -> &mut ProviderSettings {
        match provider {
            Provider::Anthropic => &mut self.anthropic,
            Provider::OpenAI => &mut self.openai,
            Provider::OpenRouter => &mut self.openrouter,
        }
    }
}

/// The set of reasoning backends available to the loop.
///
/// An empty set is the offline mode: every component falls through to its
/// deterministic path.
#[derive(Clone, Default)]
pub struct BackendSet {
    clients: HashMap<Provider, Arc<dyn LLMClient>>,
    /// Registration order, used when picking an alternate
    order: Vec<Provider>,
    primary: Option<Provider>,
    fallback: Option<Provider>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// No backends at all.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Register a client. The first registered client becomes primary.
    pub fn with_client(mut self, client: Arc<dyn LLMClient>) -> Self {
        let provider = client.provider();
        if !self.order.contains(&provider) {
            self.order.push(provider);
        }
        self.clients.insert(provider, client);
        if self.primary.is_none() {
            self.primary = Some(provider);
        }
        self
    }

    pub fn with_primary(mut self, provider: Provider) -> Self {
        self.primary = Some(provider);
        self
    }

    pub fn with_fallback(mut self, provider: Provider) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Build clients for every provider that has an API key.
    pub fn from_config(config: &BackendsConfig) -> Result<Self> {
        let mut set = Self::new();
        for provider in Provider::ALL {
            let settings = config.settings(provider);
            if !settings.has_key() {
                debug!(%provider, "backend skipped: no API key");
                continue;
            }
            let mut client_config =
                ClientConfig::new(settings.api_key.clone().unwrap_or_default())
                    .with_timeout(config.timeout_secs);
            if let Some(url) = &settings.base_url {
                client_config = client_config.with_base_url(url.clone());
            }
            if let Some(model) = &settings.default_model {
                client_config = client_config.with_default_model(model.clone());
            }
            set = set.with_client(create_client(provider, client_config)?);
        }

        if set.clients.contains_key(&config.primary) {
            set.primary = Some(config.primary);
        }
        set.fallback = config.fallback;

        info!(
            providers = ?set.order,
            primary = ?set.primary,
            fallback = ?set.fallback,
            "backends configured"
        );
        Ok(set)
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn LLMClient>> {
        self.clients.get(&provider).cloned()
    }

    pub fn primary(&self) -> Option<Arc<dyn LLMClient>> {
        self.primary.and_then(|p| self.get(p))
    }

    pub fn primary_provider(&self) -> Option<Provider> {
        self.primary.filter(|p| self.clients.contains_key(p))
    }

    /// The configured fallback, if registered and distinct from the primary.
    pub fn fallback(&self) -> Option<Arc<dyn LLMClient>> {
        self.fallback
            .filter(|f| Some(*f) != self.primary)
            .and_then(|f| self.get(f))
    }

    /// A backend other than `attempted`: the configured fallback when it
    /// qualifies, otherwise the first other registered provider.
    pub fn alternate_to(&self, attempted: Option<Provider>) -> Option<Arc<dyn LLMClient>> {
        if let Some(f) = self.fallback {
            if Some(f) != attempted {
                if let Some(client) = self.get(f) {
                    return Some(client);
                }
            }
        }
        self.order
            .iter()
            .find(|p| Some(**p) != attempted)
            .and_then(|p| self.get(*p))
    }

    pub fn providers(&self) -> &[Provider] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("providers", &self.order)
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .finish()
    }
}
