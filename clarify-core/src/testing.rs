//! Scripted backends for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::{
    CompletionRequest, CompletionResponse, LLMClient, ModelSpec, Provider, StopReason, TokenUsage,
};

/// Backend that replays queued replies and failures in order.
///
/// Once the queue is drained it answers with the `always` reply if one was
/// set, otherwise it fails as unavailable.
pub(crate) struct ScriptedClient {
    provider: Provider,
    script: Mutex<VecDeque<Result<String>>>,
    always: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub(crate) fn new(provider: Provider) -> Self {
        Self {
            provider,
            script: Mutex::new(VecDeque::new()),
            always: None,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A backend that fails every call.
    pub(crate) fn failing(provider: Provider) -> Self {
        Self::new(provider)
    }

    pub(crate) fn reply(self, text: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub(crate) fn fail(self, error: Error) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub(crate) fn always(mut self, text: impl Into<String>) -> Self {
        self.always = Some(text.into());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let content = match next {
            Some(step) => step?,
            None => match &self.always {
                Some(text) => text.clone(),
                None => {
                    return Err(Error::backend_unavailable(
                        self.provider.as_str(),
                        "scripted backend offline",
                    ))
                }
            },
        };

        Ok(CompletionResponse {
            id: format!("scripted-{}", self.calls()),
            model: "scripted".to_string(),
            content,
            stop_reason: Some(StopReason::EndTurn),
            usage: TokenUsage::new(10, 10),
            timestamp: Utc::now(),
            cost: None,
            metadata: HashMap::new(),
        })
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn available_models(&self) -> Vec<ModelSpec> {
        Vec::new()
    }
}
