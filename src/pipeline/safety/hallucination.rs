use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::llm::{call_and_decode, clamp_unit, TextGenerator, Validate, WithFallback};

use super::prompt::build_hallucination_request;

/// Backend fact-check of a (masked) clinical text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HallucinationAssessment {
    pub risk_score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Validate for HallucinationAssessment {
    fn validate(&self) -> Result<(), String> {
        if self.risk_score.is_finite() {
            Ok(())
        } else {
            Err("risk_score is not a finite number".to_string())
        }
    }
}

/// Scores the likelihood that a text contains medically incorrect claims.
pub struct HallucinationScorer {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
}

impl HallucinationScorer {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Assess `text`. Falls back to a zero score; blank text is never sent.
    pub async fn assess(&self, text: &str) -> WithFallback<HallucinationAssessment> {
        if text.trim().is_empty() {
            return WithFallback::fresh(HallucinationAssessment::default());
        }

        let request = build_hallucination_request(text);
        match call_and_decode::<HallucinationAssessment>(self.generator.as_deref(), &request, self.timeout)
            .await
        {
            Ok(mut assessment) => {
                assessment.risk_score = clamp_unit(assessment.risk_score);
                tracing::debug!(
                    risk_score = assessment.risk_score,
                    issue_count = assessment.issues.len(),
                    "Hallucination assessment complete"
                );
                WithFallback::fresh(assessment)
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Hallucination scoring unavailable, assuming 0.0");
                WithFallback::degraded(HallucinationAssessment::default(), reason)
            }
        }
    }
}
