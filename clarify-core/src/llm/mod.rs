//! Reasoning backend abstraction.
//!
//! This module provides a uniform interface for invoking text-generation
//! backends (Anthropic, OpenAI, OpenRouter), plus the retry and response
//! caching primitives the clarification loop builds its resilience on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use clarify_core::llm::{create_client, BackendSet, ClientConfig, InvokeConfig, Provider};
//!
//! let client = create_client(Provider::Anthropic, ClientConfig::new("your-api-key"))?;
//! let backends = BackendSet::new().with_client(client);
//!
//! let primary = backends.primary().expect("configured");
//! let response = primary.invoke("Rate this request", &InvokeConfig::new(500, 0.3)).await?;
//! ```

mod cache;
mod client;
mod retry;
mod types;

pub use cache::{
    CacheConfig, CacheEntry, CacheKey, CacheManager, CacheStats, CachedRequest,
    InMemoryResponseCache, ResponseCache,
};
pub use client::{
    create_client, AnthropicClient, BackendSet, BackendsConfig, ClientConfig, LLMClient,
    OpenAIClient, ProviderSettings,
};
pub use retry::RetryPolicy;
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, InvokeConfig, ModelSpec,
    Provider, StopReason, TokenUsage,
};
