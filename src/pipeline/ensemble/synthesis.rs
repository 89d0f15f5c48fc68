use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::pipeline::clinical::ClinicalCase;
use crate::pipeline::llm::{call_and_decode, clamp_unit, DegradedReason, TextGenerator};

use super::prompt::build_synthesis_request;
use super::types::{DiagnosisResult, EnsembleDiagnosisResult, SynthesisReply};

/// Reconciles individual diagnoses with one further backend call.
///
/// `synthesize` never fails: on any backend, decoding or internal fault it
/// falls back to the individual result with the strictly greatest
/// confidence (first in roster order on ties) and consensus 0.0.
pub struct SynthesisEngine {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
    lang: String,
}

impl SynthesisEngine {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, timeout: Duration, lang: &str) -> Self {
        Self {
            generator,
            timeout,
            lang: lang.to_string(),
        }
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn model_name(&self) -> Option<&str> {
        self.generator.as_deref().map(|g| g.model_name())
    }

    pub async fn synthesize(
        &self,
        individual_results: Vec<DiagnosisResult>,
        case: &ClinicalCase,
    ) -> EnsembleDiagnosisResult {
        let request = build_synthesis_request(&individual_results, case);
        let attempt = AssertUnwindSafe(call_and_decode::<SynthesisReply>(
            self.generator.as_deref(),
            &request,
            self.timeout,
        ))
        .catch_unwind()
        .await;

        let reason = match attempt {
            Ok(Ok(reply)) => {
                tracing::info!(
                    members = individual_results.len(),
                    consensus_level = clamp_unit(reply.consensus_level),
                    "Ensemble synthesis complete"
                );
                return EnsembleDiagnosisResult {
                    final_summary: reply.final_summary,
                    final_key_findings: reply.final_key_findings,
                    final_differential_diagnoses: reply.final_differential_diagnoses,
                    final_risk_factors: reply.final_risk_factors,
                    final_recommendations: reply.final_recommendations,
                    final_confidence_score: clamp_unit(reply.final_confidence_score),
                    individual_results,
                    synthesis_reasoning: reply.synthesis_reasoning,
                    consensus_level: clamp_unit(reply.consensus_level),
                    failed_models: Vec::new(),
                    synthesis_fallback: None,
                };
            }
            Ok(Err(reason)) => reason,
            Err(_) => DegradedReason::Internal("synthesis panicked".to_string()),
        };

        tracing::warn!(reason = %reason, "Ensemble synthesis failed, using best individual result");
        self.fallback(individual_results, reason)
    }

    fn fallback(&self, individual_results: Vec<DiagnosisResult>, reason: DegradedReason) -> EnsembleDiagnosisResult {
        let reasoning = if self.lang == "en" {
            "Final synthesis failed; using the individual diagnosis with the highest confidence"
        } else {
            "最終統合に失敗したため、最も信頼度の高い個別診断を使用"
        };

        let best = best_result(&individual_results).cloned();
        let (summary, findings, differentials, risks, recommendations, confidence) = match best {
            Some(b) => (
                b.summary,
                b.key_findings,
                b.differential_diagnoses,
                b.risk_factors,
                b.recommendations,
                b.confidence_score,
            ),
            None => (String::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new(), 0.0),
        };

        EnsembleDiagnosisResult {
            final_summary: summary,
            final_key_findings: findings,
            final_differential_diagnoses: differentials,
            final_risk_factors: risks,
            final_recommendations: recommendations,
            final_confidence_score: confidence,
            individual_results,
            synthesis_reasoning: reasoning.to_string(),
            consensus_level: 0.0,
            failed_models: Vec::new(),
            synthesis_fallback: Some(reason),
        }
    }
}

/// Result with the strictly greatest confidence; the earliest wins ties.
pub fn best_result(results: &[DiagnosisResult]) -> Option<&DiagnosisResult> {
    let mut best: Option<&DiagnosisResult> = None;
    for r in results {
        match best {
            Some(b) if r.confidence_score <= b.confidence_score => {}
            _ => best = Some(r),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::ScriptedGenerator;

    fn result(model: &str, confidence: f64) -> DiagnosisResult {
        DiagnosisResult {
            model_name: model.into(),
            summary: format!("{model} summary"),
            key_findings: vec![format!("{model} finding")],
            differential_diagnoses: vec![],
            risk_factors: vec![],
            recommendations: vec![],
            confidence_score: confidence,
            reasoning: String::new(),
        }
    }

    fn engine(generator: ScriptedGenerator) -> SynthesisEngine {
        SynthesisEngine::new(Some(Arc::new(generator)), Duration::from_secs(1), "ja")
    }

    #[tokio::test]
    async fn synthesized_reply_is_used() {
        let reply = r#"{"final_summary": "市中肺炎", "final_confidence_score": 0.9,
                        "consensus_level": 1.4, "synthesis_reasoning": "2 of 2 agree"}"#;
        let e = engine(ScriptedGenerator::replying("llama3.1-70b", reply));
        let out = e
            .synthesize(vec![result("a", 0.6), result("b", 0.7)], &ClinicalCase::default())
            .await;
        assert!(!out.used_fallback());
        assert_eq!(out.final_summary, "市中肺炎");
        assert_eq!(out.consensus_level, 1.0);
        assert_eq!(out.individual_results.len(), 2);
    }

    #[tokio::test]
    async fn failure_falls_back_to_most_confident() {
        let e = engine(ScriptedGenerator::replying("m", "not json"));
        let out = e
            .synthesize(vec![result("a", 0.6), result("b", 0.75)], &ClinicalCase::default())
            .await;
        assert!(matches!(out.synthesis_fallback, Some(DegradedReason::MalformedReply(_))));
        assert_eq!(out.consensus_level, 0.0);
        assert_eq!(out.final_summary, "b summary");
        assert_eq!(out.final_confidence_score, 0.75);
        assert_eq!(out.synthesis_reasoning, "最終統合に失敗したため、最も信頼度の高い個別診断を使用");
    }

    #[tokio::test]
    async fn panic_falls_back_too() {
        let e = engine(ScriptedGenerator::panicking("m"));
        let out = e.synthesize(vec![result("a", 0.6)], &ClinicalCase::default()).await;
        assert!(matches!(out.synthesis_fallback, Some(DegradedReason::Internal(_))));
        assert_eq!(out.final_summary, "a summary");
    }

    #[tokio::test]
    async fn no_backend_falls_back() {
        let e = SynthesisEngine::new(None, Duration::from_secs(1), "en");
        let out = e.synthesize(vec![result("a", 0.6)], &ClinicalCase::default()).await;
        assert_eq!(out.synthesis_fallback, Some(DegradedReason::Unavailable));
        assert!(out.synthesis_reasoning.starts_with("Final synthesis failed"));
    }

    #[test]
    fn ties_go_to_first() {
        let results = vec![result("a", 0.8), result("b", 0.8), result("c", 0.5)];
        assert_eq!(best_result(&results).map(|r| r.model_name.as_str()), Some("a"));
        assert!(best_result(&[]).is_none());
    }
}
