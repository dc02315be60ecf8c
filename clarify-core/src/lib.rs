//! # clarify-core
//!
//! A clarification loop that turns an ambiguous natural-language request into
//! a confirmable intent before anything is generated from it.
//!
//! ## Core Components
//!
//! - **Ambiguity**: 0-100 scoring with structured signals, backend-assisted
//!   with a deterministic heuristic floor
//! - **Agents**: typed clarification sub-agents and their orchestrator
//! - **Intent**: append-only intent snapshots with drift between them
//! - **Echo**: the understood intent restated for confirmation
//! - **Fallback**: alternate backend, cache, canned response, manual input
//! - **MetaLoop**: the per-session state machine composing all of the above
//!
//! ## Example
//!
//! ```rust,ignore
//! use clarify_core::{ClarifyConfig, MetaLoop};
//!
//! let meta = MetaLoop::from_config(&ClarifyConfig::from_env()?)?;
//! let outcome = meta.start_session("session-1", "I want to build something").await?;
//! println!("{}", outcome.response);
//!
//! let outcome = meta.continue_session("session-1", "A recipe app for my family").await?;
//! if !outcome.needs_clarification {
//!     let intent = meta.get_intent_map("session-1").await?;
//! }
//! ```

pub mod agents;
pub mod ambiguity;
pub mod classifier;
pub mod config;
pub mod echo;
pub mod error;
pub mod fallback;
pub mod intent;
pub mod json;
pub mod llm;
pub mod logging;
pub mod meta_loop;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use agents::{
    AgentId, AgentStatus, AgentType, OrchestratorConfig, SubAgent, SubAgentOrchestrator, Synthesis,
};
pub use ambiguity::{
    heuristic_analysis, AmbiguityAnalysis, AmbiguityScorer, AmbiguitySignals, ClarificationStrategy,
    ScorerConfig,
};
pub use classifier::{classify_response, ResponseIntent};
pub use config::ClarifyConfig;
pub use echo::{GoalEcho, GoalEchoGenerator};
pub use error::{Error, Result};
pub use fallback::{FallbackCascade, FallbackRequest, FallbackResponse, FallbackStrategy};
pub use intent::{
    compute_drift, DriftVector, ExtractedIntent, InMemorySnapshotStore, IntentSnapshot,
    IntentTracker, SnapshotStore, SqliteSnapshotStore,
};
pub use llm::{
    BackendSet, BackendsConfig, CacheManager, ClientConfig, CompletionRequest, CompletionResponse,
    InvokeConfig, LLMClient, Provider, RetryPolicy, TokenUsage,
};
pub use logging::{EventLogger, JsonLinesLogSink, LogEntry, LogLevel, LogSink, LoggingConfig};
pub use meta_loop::{LoopConfig, MetaLoop, MetaLoopBuilder, SessionState, SessionStatus, TurnOutcome};
