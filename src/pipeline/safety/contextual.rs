use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::pipeline::llm::{
    call_and_decode, clamp_unit, parse_array_lenient, DegradedReason, TextGenerator, Validate,
    WithFallback,
};

use super::masking::standard_mask;
use super::patterns::{context_window, detect_patterns, CONTEXT_WINDOW_CHARS};
use super::prompt::build_pii_detection_request;
use super::types::{PiiDetection, PiiType};

/// Envelope of the backend's PII reply.
#[derive(Debug, Deserialize)]
struct PiiReply {
    detected_pii: Vec<serde_json::Value>,
    #[serde(default)]
    #[allow(dead_code)]
    analysis_summary: Option<String>,
}

impl Validate for PiiReply {}

/// One item of `detected_pii`, as reported.
#[derive(Debug, Deserialize)]
struct ReportedPii {
    text: String,
    #[serde(default)]
    start_pos: Option<i64>,
    #[serde(default, rename = "type")]
    pii_type: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    masked_text: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    reasoning: String,
}

/// Backend-assisted PII detector with the rule matcher as fallback.
pub struct ContextualPiiDetector {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
}

impl ContextualPiiDetector {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub fn is_backend_configured(&self) -> bool {
        self.generator.is_some()
    }

    /// Detect PII in `text`.
    ///
    /// Never fails: when the backend is missing, times out, or replies with
    /// anything but the expected shape, the rule matcher's output is
    /// returned and the reason recorded as the fallback.
    pub async fn detect(&self, text: &str, medical_context: bool) -> WithFallback<Vec<PiiDetection>> {
        if text.trim().is_empty() {
            return WithFallback::fresh(Vec::new());
        }

        let request = build_pii_detection_request(text, medical_context);
        let reply: Result<PiiReply, DegradedReason> =
            call_and_decode(self.generator.as_deref(), &request, self.timeout).await;

        match reply {
            Ok(reply) => {
                let reported: Vec<ReportedPii> = parse_array_lenient(&reply.detected_pii);
                let reported_count = reported.len();
                let detections = anchor_reported(text, reported);
                if detections.len() < reported_count {
                    tracing::debug!(
                        reported = reported_count,
                        anchored = detections.len(),
                        "Dropped backend PII spans that could not be located"
                    );
                }
                tracing::debug!(detections = detections.len(), "Contextual PII detection complete");
                WithFallback::fresh(detections)
            }
            Err(reason) => {
                let detections = detect_patterns(text);
                tracing::warn!(
                    reason = %reason,
                    detections = detections.len(),
                    "Contextual PII detection unavailable, using rule matcher"
                );
                WithFallback::degraded(detections, reason)
            }
        }
    }
}

/// Turn reported items into detections with valid offsets into `text`.
///
/// Reported offsets are trusted only when they slice exactly to the
/// reported substring and that span is not already claimed by an earlier
/// item of the same type. Otherwise the unclaimed occurrence closest to
/// the reported start is used, so repeated values map to distinct
/// occurrences. Items with no unclaimed occurrence left are dropped.
fn anchor_reported(text: &str, reported: Vec<ReportedPii>) -> Vec<PiiDetection> {
    let mut detections: Vec<PiiDetection> = Vec::new();

    for item in reported {
        if item.text.is_empty() {
            continue;
        }
        let pii_type = PiiType::from_label(&item.pii_type);
        let claimed = |start: usize| {
            detections
                .iter()
                .any(|d| d.start_pos == start && d.text == item.text && d.pii_type == pii_type)
        };
        let Some(start) = locate(text, &item.text, item.start_pos, claimed) else {
            continue;
        };
        let end = start + item.text.len();

        let masked_text = if item.masked_text.is_empty() {
            standard_mask(&item.text, pii_type)
        } else {
            item.masked_text
        };
        let context = if item.context.is_empty() {
            context_window(text, start, end, CONTEXT_WINDOW_CHARS)
        } else {
            item.context
        };

        detections.push(PiiDetection {
            text: item.text,
            start_pos: start,
            end_pos: end,
            pii_type,
            confidence: clamp_unit(item.confidence),
            masked_text,
            context,
            reasoning: item.reasoning,
        });
    }

    detections
}

fn locate(
    text: &str,
    needle: &str,
    hint: Option<i64>,
    claimed: impl Fn(usize) -> bool,
) -> Option<usize> {
    let hint = hint.and_then(|h| usize::try_from(h).ok());

    if let Some(start) = hint {
        let exact = start
            .checked_add(needle.len())
            .and_then(|end| text.get(start..end));
        if exact == Some(needle) && !claimed(start) {
            return Some(start);
        }
    }

    let target = hint.unwrap_or(0);
    text.match_indices(needle)
        .map(|(i, _)| i)
        .filter(|&i| !claimed(i))
        .min_by_key(|i| i.abs_diff(target))
}
