use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::llm::{call_backend, DegradedReason, TextGenerator, WithFallback};

use super::prompt::build_rewrite_request;

/// Backend rewrite of REWRITE-level text into safer wording.
pub struct AutoRewriter {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
}

impl AutoRewriter {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Rewrite `text`. On any failure the input comes back unchanged with
    /// the reason recorded, never a block marker.
    pub async fn rewrite(
        &self,
        text: &str,
        context: Option<&serde_json::Value>,
    ) -> WithFallback<String> {
        let Some(generator) = self.generator.as_deref() else {
            return WithFallback::degraded(text.to_string(), DegradedReason::Unavailable);
        };

        let request = build_rewrite_request(text, context);
        match call_backend(generator, &request, self.timeout).await {
            Ok(reply) => {
                let rewritten = strip_fence(reply.trim());
                if rewritten.is_empty() {
                    tracing::warn!("Rewrite returned empty text, keeping input");
                    WithFallback::degraded(
                        text.to_string(),
                        DegradedReason::MalformedReply("empty rewrite".to_string()),
                    )
                } else {
                    tracing::debug!("Rewrite applied");
                    WithFallback::fresh(rewritten.to_string())
                }
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Rewrite unavailable, keeping input");
                WithFallback::degraded(text.to_string(), reason)
            }
        }
    }
}

/// Drop a surrounding ``` fence if the backend added one.
fn strip_fence(reply: &str) -> &str {
    let Some(rest) = reply.strip_prefix("```") else {
        return reply;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::ScriptedGenerator;

    fn rewriter(generator: ScriptedGenerator) -> AutoRewriter {
        AutoRewriter::new(Some(Arc::new(generator)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn applies_backend_rewrite() {
        let r = rewriter(ScriptedGenerator::replying("m", "  血圧高値の可能性があります。  "));
        let result = r.rewrite("血圧が高い。", None).await;
        assert!(!result.used_fallback());
        assert_eq!(result.value, "血圧高値の可能性があります。");
    }

    #[tokio::test]
    async fn failure_returns_input_unchanged() {
        let r = rewriter(ScriptedGenerator::failing("m"));
        let result = r.rewrite("血圧が高い。", None).await;
        assert!(result.used_fallback());
        assert_eq!(result.value, "血圧が高い。");
    }

    #[tokio::test]
    async fn empty_reply_returns_input_unchanged() {
        let r = rewriter(ScriptedGenerator::replying("m", "   "));
        let result = r.rewrite("血圧が高い。", None).await;
        assert!(matches!(result.fallback, Some(DegradedReason::MalformedReply(_))));
        assert_eq!(result.value, "血圧が高い。");
    }

    #[tokio::test]
    async fn no_backend_returns_input_unchanged() {
        let r = AutoRewriter::new(None, Duration::from_secs(1));
        let result = r.rewrite("text", None).await;
        assert_eq!(result.fallback, Some(DegradedReason::Unavailable));
        assert_eq!(result.value, "text");
    }

    #[test]
    fn fence_is_stripped() {
        assert_eq!(strip_fence("```text\nhello\n```"), "hello");
        assert_eq!(strip_fence("plain"), "plain");
        assert_eq!(strip_fence("```"), "");
    }
}
