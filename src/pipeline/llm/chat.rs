//! OpenAI-compatible `/chat/completions` client.
//!
//! One client covers OpenAI, Cerebras and other compatible hosts (bearer
//! auth, model in the body) as well as Azure OpenAI deployments (`api-key`
//! header, deployment and API version in the URL).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::types::{GenerationRequest, TextGenerator};
use super::LlmError;

#[derive(Debug, Clone, PartialEq)]
enum ChatAuth {
    Bearer(String),
    AzureKey(String),
}

pub struct ChatCompletionsGenerator {
    url: String,
    model: String,
    auth: ChatAuth,
    client: reqwest::Client,
    timeout: Duration,
}

impl ChatCompletionsGenerator {
    /// OpenAI-style host: `POST {base_url}/chat/completions` with bearer auth.
    pub fn open_ai(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            auth: ChatAuth::Bearer(api_key.to_string()),
            client: build_client(timeout)?,
            timeout,
        })
    }

    /// Azure OpenAI deployment.
    pub fn azure(
        endpoint: &str,
        api_key: &str,
        deployment: &str,
        api_version: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            url: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
            model: deployment.to_string(),
            auth: ChatAuth::AzureKey(api_key.to_string()),
            client: build_client(timeout)?,
            timeout,
        })
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        let mut body = serde_json::json!({
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
        });
        // Azure routes by deployment in the URL.
        if matches!(self.auth, ChatAuth::Bearer(_)) {
            body["model"] = Value::String(self.model.clone());
        }
        body
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::HttpClient(e.to_string()))
}

/// Pull `choices[0].message.content` out of a completion response.
pub fn parse_chat_response(json: &Value) -> Result<String, LlmError> {
    json.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| LlmError::ResponseParsing("Missing choices[0].message.content".to_string()))
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let builder = self.client.post(&self.url).json(&self.request_body(request));
        let builder = match &self.auth {
            ChatAuth::Bearer(key) => builder.bearer_auth(key),
            ChatAuth::AzureKey(key) => builder.header("api-key", key),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                LlmError::Connection(self.url.clone())
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

        let json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;
        parse_chat_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
