use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::LlmError;

/// One request to a text-generation backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_output_tokens: 1000,
            temperature: 0.1,
        }
    }

    pub fn with_limits(mut self, max_output_tokens: u32, temperature: f32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self.temperature = temperature;
        self
    }
}

/// Text-generation backend abstraction (allows mocking).
///
/// Implementations are shared read-only across concurrent calls, so they
/// must not hold per-request state.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    /// Model (or deployment) name this generator talks to.
    fn model_name(&self) -> &str;
}

/// Why a backend-assisted step returned a degraded result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DegradedReason {
    /// No backend configured for this step.
    Unavailable,
    /// The per-call deadline elapsed.
    Timeout { after_ms: u64 },
    /// Transport or HTTP status failure.
    Backend(String),
    /// The reply did not match the expected shape.
    MalformedReply(String),
    /// A fault inside the component itself (caught panic).
    Internal(String),
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "backend unavailable"),
            Self::Timeout { after_ms } => write!(f, "backend timed out after {after_ms}ms"),
            Self::Backend(e) => write!(f, "backend error: {e}"),
            Self::MalformedReply(e) => write!(f, "malformed reply: {e}"),
            Self::Internal(e) => write!(f, "internal fault: {e}"),
        }
    }
}

impl From<LlmError> for DegradedReason {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::NotConfigured => Self::Unavailable,
            LlmError::Timeout { after_ms } => Self::Timeout { after_ms },
            LlmError::ResponseParsing(msg) => Self::MalformedReply(msg),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<super::decode::DecodeError> for DegradedReason {
    fn from(e: super::decode::DecodeError) -> Self {
        Self::MalformedReply(e.to_string())
    }
}

/// A value plus whether it came from the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithFallback<T> {
    pub value: T,
    pub fallback: Option<DegradedReason>,
}

impl<T> WithFallback<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            fallback: None,
        }
    }

    pub fn degraded(value: T, reason: DegradedReason) -> Self {
        Self {
            value,
            fallback: Some(reason),
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WithFallback<U> {
        WithFallback {
            value: f(self.value),
            fallback: self.fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_and_limits() {
        let req = GenerationRequest::new("sys", "user");
        assert_eq!(req.max_output_tokens, 1000);
        let req = req.with_limits(2000, 0.3);
        assert_eq!(req.max_output_tokens, 2000);
        assert!((req.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn llm_errors_map_to_reasons() {
        assert_eq!(DegradedReason::from(LlmError::NotConfigured), DegradedReason::Unavailable);
        assert_eq!(
            DegradedReason::from(LlmError::Timeout { after_ms: 50 }),
            DegradedReason::Timeout { after_ms: 50 }
        );
        assert!(matches!(
            DegradedReason::from(LlmError::Connection("x".into())),
            DegradedReason::Backend(_)
        ));
        assert!(matches!(
            DegradedReason::from(LlmError::ResponseParsing("x".into())),
            DegradedReason::MalformedReply(_)
        ));
    }

    #[test]
    fn with_fallback_flags() {
        let fresh = WithFallback::fresh(1);
        assert!(!fresh.used_fallback());
        let degraded = WithFallback::degraded(2, DegradedReason::Unavailable);
        assert!(degraded.used_fallback());
        assert_eq!(degraded.map(|v| v * 10).value, 20);
    }

    #[test]
    fn degraded_reason_serializes_tagged() {
        let json = serde_json::to_string(&DegradedReason::Timeout { after_ms: 10 }).unwrap();
        assert!(json.contains("\"reason\":\"timeout\""));
        let json = serde_json::to_string(&DegradedReason::Unavailable).unwrap();
        assert_eq!(json, "{\"reason\":\"unavailable\"}");
    }
}
