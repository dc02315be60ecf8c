//! Configuration for the whole clarification loop.
//!
//! Every component has its own serde config with defaults; [`ClarifyConfig`]
//! aggregates them. Values can come from JSON or from `CLARIFY_*`
//! environment variables plus the usual provider API key variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::agents::OrchestratorConfig;
use crate::ambiguity::ScorerConfig;
use crate::error::{Error, Result};
use crate::llm::{BackendsConfig, CacheConfig, Provider, RetryPolicy};
use crate::logging::LoggingConfig;
use crate::meta_loop::LoopConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarifyConfig {
    pub backends: BackendsConfig,
    pub scorer: ScorerConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(rename = "loop")]
    pub meta_loop: LoopConfig,
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
    /// SQLite file for intent snapshots; `None` keeps them in memory
    pub snapshot_db: Option<PathBuf>,
}

impl ClarifyConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(v) = get("CLARIFY_PRIMARY_BACKEND") {
            config.backends.primary = v.parse()?;
        }
        if let Some(v) = get("CLARIFY_FALLBACK_BACKEND") {
            config.backends.fallback = match v.to_lowercase().as_str() {
                "none" | "off" => None,
                _ => Some(v.parse()?),
            };
        }
        if let Some(v) = get("CLARIFY_BACKEND_TIMEOUT_SECS") {
            config.backends.timeout_secs = parse_value("CLARIFY_BACKEND_TIMEOUT_SECS", &v)?;
        }
        for (provider, key_var, model_var) in [
            (Provider::Anthropic, "ANTHROPIC_API_KEY", "CLARIFY_ANTHROPIC_MODEL"),
            (Provider::OpenAI, "OPENAI_API_KEY", "CLARIFY_OPENAI_MODEL"),
            (Provider::OpenRouter, "OPENROUTER_API_KEY", "CLARIFY_OPENROUTER_MODEL"),
        ] {
            let settings = config.backends.settings_mut(provider);
            if let Some(key) = get(key_var) {
                settings.api_key = Some(key);
            }
            if let Some(model) = get(model_var) {
                settings.default_model = Some(model);
            }
        }

        if let Some(v) = get("CLARIFY_SCORER_TIMEOUT_MS") {
            config.scorer.timeout_ms = parse_value("CLARIFY_SCORER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CLARIFY_MAX_QUESTIONS") {
            config.orchestrator.max_questions = parse_value("CLARIFY_MAX_QUESTIONS", &v)?;
        }
        if let Some(v) = get("CLARIFY_CLARIFICATION_THRESHOLD") {
            config.meta_loop.clarification_threshold =
                parse_value("CLARIFY_CLARIFICATION_THRESHOLD", &v)?;
        }
        if let Some(v) = get("CLARIFY_MAX_ROUNDS") {
            config.meta_loop.max_rounds = parse_value("CLARIFY_MAX_ROUNDS", &v)?;
        }
        if let Some(v) = get("CLARIFY_SESSION_IDLE_SECS") {
            config.meta_loop.session_idle_secs = parse_value("CLARIFY_SESSION_IDLE_SECS", &v)?;
        }
        if let Some(v) = get("CLARIFY_CACHE_ENABLED") {
            config.cache.enabled = parse_bool("CLARIFY_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("CLARIFY_CACHE_TTL_SECS") {
            config.cache.ttl_secs = parse_value("CLARIFY_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("CLARIFY_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_value("CLARIFY_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("CLARIFY_LOG_PATH") {
            config.logging.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CLARIFY_LOG_FLUSH_THRESHOLD") {
            config.logging.flush_threshold = parse_value("CLARIFY_LOG_FLUSH_THRESHOLD", &v)?;
        }
        if let Some(v) = get("CLARIFY_SNAPSHOT_DB") {
            config.snapshot_db = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing sections take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.backends.fallback == Some(self.backends.primary) {
            return Err(Error::Config(format!(
                "fallback backend must differ from primary ({})",
                self.backends.primary
            )));
        }
        check_range("loop.clarification_threshold", self.meta_loop.clarification_threshold, 0.0, 100.0)?;
        check_range("loop.ready_ambiguity", self.meta_loop.ready_ambiguity, 0.0, 100.0)?;
        check_range("loop.ready_confidence", self.meta_loop.ready_confidence, 0.0, 1.0)?;
        check_range(
            "orchestrator.completion_confidence",
            self.orchestrator.completion_confidence,
            0.0,
            1.0,
        )?;
        if self.orchestrator.confidence_step <= 0.0 || self.orchestrator.confidence_step > 1.0 {
            return Err(Error::Config(
                "orchestrator.confidence_step must be in (0, 1]".to_string(),
            ));
        }
        if self.orchestrator.max_questions == 0 {
            return Err(Error::Config("orchestrator.max_questions must be at least 1".to_string()));
        }
        if self.orchestrator.max_findings == 0 {
            return Err(Error::Config("orchestrator.max_findings must be at least 1".to_string()));
        }
        if self.meta_loop.max_rounds == 0 {
            return Err(Error::Config("loop.max_rounds must be at least 1".to_string()));
        }
        if self.scorer.timeout_ms == 0 {
            return Err(Error::Config("scorer.timeout_ms must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be at least 1.0".to_string()));
        }
        if self.logging.flush_threshold == 0 {
            return Err(Error::Config("logging.flush_threshold must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}: cannot parse {:?}: {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{}: expected a boolean, got {:?}", key, value))),
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be in [{}, {}], got {}",
            name, min, max, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ClarifyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.meta_loop.max_rounds, 5);
        assert_eq!(config.orchestrator.max_questions, 2);
        assert_eq!(config.scorer.timeout_ms, 5000);
    }

    #[test]
    fn test_from_lookup() {
        let config = ClarifyConfig::from_lookup(lookup(&[
            ("CLARIFY_PRIMARY_BACKEND", "openrouter"),
            ("CLARIFY_FALLBACK_BACKEND", "none"),
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("CLARIFY_OPENROUTER_MODEL", "openai/gpt-4o-mini"),
            ("CLARIFY_MAX_ROUNDS", "3"),
            ("CLARIFY_SESSION_IDLE_SECS", "600"),
            ("CLARIFY_CACHE_ENABLED", "off"),
            ("CLARIFY_LOG_PATH", "/tmp/clarify.jsonl"),
            ("ANTHROPIC_API_KEY", "  "),
        ]))
        .unwrap();

        assert_eq!(config.backends.primary, Provider::OpenRouter);
        assert_eq!(config.backends.fallback, None);
        assert_eq!(config.backends.openrouter.api_key.as_deref(), Some("sk-or-test"));
        assert_eq!(
            config.backends.openrouter.default_model.as_deref(),
            Some("openai/gpt-4o-mini")
        );
        assert_eq!(config.backends.anthropic.api_key, None);
        assert_eq!(config.meta_loop.max_rounds, 3);
        assert_eq!(config.meta_loop.session_idle_secs, 600);
        assert!(!config.cache.enabled);
        assert_eq!(config.logging.path, Some(PathBuf::from("/tmp/clarify.jsonl")));
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        for vars in [
            vec![("CLARIFY_MAX_ROUNDS", "many")],
            vec![("CLARIFY_PRIMARY_BACKEND", "gemini")],
            vec![("CLARIFY_CACHE_ENABLED", "maybe")],
            vec![("CLARIFY_MAX_QUESTIONS", "0")],
            vec![
                ("CLARIFY_PRIMARY_BACKEND", "openai"),
                ("CLARIFY_FALLBACK_BACKEND", "openai"),
            ],
        ] {
            let err = ClarifyConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{:?} -> {:?}", vars, err);
        }
    }

    #[test]
    fn test_from_json_partial() {
        let config = ClarifyConfig::from_json_str(
            r#"{"loop": {"max_rounds": 2}, "cache": {"ttl_secs": 60}, "snapshot_db": "intent.db"}"#,
        )
        .unwrap();
        assert_eq!(config.meta_loop.max_rounds, 2);
        assert_eq!(config.meta_loop.clarification_threshold, 60.0);
        assert_eq!(config.cache.ttl_secs, 60);
        assert!(config.cache.enabled);
        assert_eq!(config.snapshot_db, Some(PathBuf::from("intent.db")));

        let err = ClarifyConfig::from_json_str(r#"{"loop": {"ready_confidence": 2.0}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(ClarifyConfig::from_json_str("not json").is_err());
    }
}
