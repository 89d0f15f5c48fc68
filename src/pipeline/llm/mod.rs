pub mod types;
pub mod decode;
pub mod ollama;
pub mod chat;
pub mod mock;

pub use types::*;
pub use decode::*;
pub use ollama::*;
pub use chat::*;
pub use mock::*;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{BackendKind, BackendSettings};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("No text-generation backend configured")]
    NotConfigured,

    #[error("Backend is not reachable at {0}")]
    Connection(String),

    #[error("Backend returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

/// Build a generator for the given backend settings.
pub fn build_generator(
    settings: &BackendSettings,
    timeout: Duration,
) -> Result<Arc<dyn TextGenerator>, LlmError> {
    match &settings.kind {
        BackendKind::Ollama => Ok(Arc::new(OllamaGenerator::new(
            &settings.base_url,
            &settings.model,
            timeout,
        )?)),
        BackendKind::OpenAi => {
            let key = settings.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
            Ok(Arc::new(ChatCompletionsGenerator::open_ai(
                &settings.base_url,
                key,
                &settings.model,
                timeout,
            )?))
        }
        BackendKind::AzureOpenAi { api_version } => {
            let key = settings.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
            Ok(Arc::new(ChatCompletionsGenerator::azure(
                &settings.base_url,
                key,
                &settings.model,
                api_version,
                timeout,
            )?))
        }
    }
}

/// Issue one backend call under a hard deadline.
///
/// Every error, including an elapsed deadline, comes back as a
/// `DegradedReason` so callers can pick their fallback without matching
/// on transport details.
pub async fn call_backend(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<String, DegradedReason> {
    match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(DegradedReason::Timeout {
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Call the backend (if any) and decode its reply into `T`.
pub async fn call_and_decode<T>(
    generator: Option<&dyn TextGenerator>,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<T, DegradedReason>
where
    T: serde::de::DeserializeOwned + Validate,
{
    let generator = generator.ok_or(DegradedReason::Unavailable)?;
    let reply = call_backend(generator, request, timeout).await?;
    Ok(decode_validated::<T>(&reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_backend_returns_reply() {
        let generator = ScriptedGenerator::replying("m", "hello");
        let reply = call_backend(&generator, &GenerationRequest::new("s", "u"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn call_backend_enforces_deadline() {
        let generator = ScriptedGenerator::replying("m", "late").with_delay(Duration::from_secs(5));
        let err = call_backend(&generator, &GenerationRequest::new("s", "u"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, DegradedReason::Timeout { after_ms: 20 });
    }

    #[tokio::test]
    async fn call_backend_maps_errors() {
        let generator = ScriptedGenerator::failing("m");
        let err = call_backend(&generator, &GenerationRequest::new("s", "u"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DegradedReason::Backend(_)));
    }

    #[tokio::test]
    async fn call_and_decode_without_backend_is_unavailable() {
        #[derive(serde::Deserialize)]
        struct Reply {
            #[allow(dead_code)]
            ok: bool,
        }
        impl Validate for Reply {}

        let err = call_and_decode::<Reply>(None, &GenerationRequest::new("s", "u"), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(err, DegradedReason::Unavailable);
    }

    #[test]
    fn build_generator_requires_key_for_hosted_backends() {
        let mut settings = BackendSettings::open_ai("https://api.example.com/v1", "k", "m");
        settings.api_key = None;
        assert!(matches!(
            build_generator(&settings, Duration::from_secs(1)),
            Err(LlmError::NotConfigured)
        ));
    }

    #[test]
    fn build_generator_uses_model_name() {
        let settings = BackendSettings::ollama("http://localhost:11434", "medgemma:4b");
        let generator = build_generator(&settings, Duration::from_secs(1)).unwrap();
        assert_eq!(generator.model_name(), "medgemma:4b");
    }
}
