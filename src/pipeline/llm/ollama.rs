use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{GenerationRequest, TextGenerator};
use super::LlmError;

/// Ollama HTTP client for local LLM inference.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaGenerator {
    /// Create a generator pointing at an Ollama instance.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout,
        })
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.user_prompt,
            system: &request.system_prompt,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    LlmError::Timeout {
                        after_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    LlmError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_trimmed() {
        let g = OllamaGenerator::new("http://localhost:11434/", "medgemma:4b", Duration::from_secs(5))
            .unwrap();
        assert_eq!(g.base_url, "http://localhost:11434");
        assert_eq!(g.model_name(), "medgemma:4b");
    }

    #[test]
    fn request_body_carries_limits() {
        let body = OllamaGenerateRequest {
            model: "m",
            prompt: "p",
            system: "s",
            stream: false,
            options: OllamaOptions {
                temperature: 0.25,
                num_predict: 800,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["num_predict"], 800);
        assert_eq!(json["stream"], false);
        assert_eq!(json["system"], "s");
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_error() {
        // Port 9 (discard) is closed on test machines.
        let g = OllamaGenerator::new("http://127.0.0.1:9", "m", Duration::from_secs(2)).unwrap();
        let err = g.generate(&GenerationRequest::new("s", "u")).await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::Connection(_) | LlmError::HttpClient(_) | LlmError::Timeout { .. }
        ));
    }
}
