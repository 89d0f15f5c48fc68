use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{GenerationRequest, TextGenerator};
use super::LlmError;

/// Mock generator for testing. Returns configurable replies.
///
/// Replies can be routed by a substring of the system prompt, so one
/// instance can stand in for every backend-assisted step of a pipeline.
pub struct ScriptedGenerator {
    model: String,
    default_reply: Option<String>,
    rules: Vec<(String, Option<String>)>,
    delay: Option<Duration>,
    panics: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn base(model: &str, default_reply: Option<String>) -> Self {
        Self {
            model: model.to_string(),
            default_reply,
            rules: Vec::new(),
            delay: None,
            panics: false,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `reply`.
    pub fn replying(model: &str, reply: &str) -> Self {
        Self::base(model, Some(reply.to_string()))
    }

    /// Always fail with a connection error.
    pub fn failing(model: &str) -> Self {
        Self::base(model, None)
    }

    /// Panic inside `generate`.
    pub fn panicking(model: &str) -> Self {
        let mut g = Self::base(model, None);
        g.panics = true;
        g
    }

    /// Reply with `reply` when the system prompt contains `needle`.
    pub fn on(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), Some(reply.to_string())));
        self
    }

    /// Fail when the system prompt contains `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.rules.push((needle.to_string(), None));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        if self.panics {
            panic!("scripted generator fault");
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| request.system_prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());

        reply.ok_or_else(|| LlmError::Connection(format!("scripted://{}", self.model)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_system_prompt() {
        let g = ScriptedGenerator::replying("m", "default")
            .on("hallucination", "{\"risk_score\": 0.1}")
            .failing_on("rewrite");

        let r = g.generate(&GenerationRequest::new("hallucination check", "x")).await;
        assert_eq!(r.unwrap(), "{\"risk_score\": 0.1}");
        let r = g.generate(&GenerationRequest::new("rewrite this", "x")).await;
        assert!(r.is_err());
        let r = g.generate(&GenerationRequest::new("other", "x")).await;
        assert_eq!(r.unwrap(), "default");
        assert_eq!(g.calls(), 3);
        assert_eq!(g.requests()[0].user_prompt, "x");
    }
}
