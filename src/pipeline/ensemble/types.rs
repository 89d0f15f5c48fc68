use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::clinical::types::lenient_differentials;
use crate::pipeline::clinical::DifferentialDiagnosis;
use crate::pipeline::llm::{DegradedReason, LlmError, Validate};
use crate::pipeline::safety::SafetyError;

/// One model's structured diagnosis of a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    /// Filled in by the orchestrator, not read from the reply.
    #[serde(default)]
    pub model_name: String,
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default, deserialize_with = "lenient_differentials")]
    pub differential_diagnoses: Vec<DifferentialDiagnosis>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Validate for DiagnosisResult {
    fn validate(&self) -> Result<(), String> {
        if !self.confidence_score.is_finite() {
            return Err("confidence_score is not a number".into());
        }
        if self.summary.trim().is_empty() {
            return Err("summary is empty".into());
        }
        Ok(())
    }
}

/// A roster member that produced no usable result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub model_name: String,
    pub reason: DegradedReason,
}

/// Reconciled judgment over every successful member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleDiagnosisResult {
    pub final_summary: String,
    pub final_key_findings: Vec<String>,
    pub final_differential_diagnoses: Vec<DifferentialDiagnosis>,
    pub final_risk_factors: Vec<String>,
    pub final_recommendations: Vec<String>,
    pub final_confidence_score: f64,
    /// Every member that returned a valid reply, in roster order.
    pub individual_results: Vec<DiagnosisResult>,
    pub synthesis_reasoning: String,
    pub consensus_level: f64,
    #[serde(default)]
    pub failed_models: Vec<MemberFailure>,
    /// Set when the synthesis call failed and the best member was used.
    #[serde(default)]
    pub synthesis_fallback: Option<DegradedReason>,
}

impl EnsembleDiagnosisResult {
    pub fn used_fallback(&self) -> bool {
        self.synthesis_fallback.is_some()
    }
}

/// Synthesis reply as decoded from the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct SynthesisReply {
    pub final_summary: String,
    #[serde(default)]
    pub final_key_findings: Vec<String>,
    #[serde(default, deserialize_with = "lenient_differentials")]
    pub final_differential_diagnoses: Vec<DifferentialDiagnosis>,
    #[serde(default)]
    pub final_risk_factors: Vec<String>,
    #[serde(default)]
    pub final_recommendations: Vec<String>,
    #[serde(default)]
    pub final_confidence_score: f64,
    #[serde(default)]
    pub synthesis_reasoning: String,
    #[serde(default)]
    pub consensus_level: f64,
}

impl Validate for SynthesisReply {
    fn validate(&self) -> Result<(), String> {
        if !self.final_confidence_score.is_finite() || !self.consensus_level.is_finite() {
            return Err("score is not a number".into());
        }
        if self.final_summary.trim().is_empty() {
            return Err("final_summary is empty".into());
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Ensemble roster is empty")]
    EmptyRoster,

    #[error("All {count} ensemble members failed", count = .failures.len())]
    AllBackendsFailed { failures: Vec<MemberFailure> },

    #[error("Case masking failed: {0}")]
    Masking(#[from] SafetyError),

    #[error("Backend setup failed: {0}")]
    Backend(#[from] LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::decode_validated;

    #[test]
    fn diagnosis_reply_decodes_with_defaults() {
        let d: DiagnosisResult = decode_validated(r#"{"summary": "急性上気道炎"}"#).unwrap();
        assert_eq!(d.summary, "急性上気道炎");
        assert_eq!(d.confidence_score, 0.0);
        assert!(d.model_name.is_empty());
    }

    #[test]
    fn diagnosis_without_summary_is_rejected() {
        assert!(decode_validated::<DiagnosisResult>(r#"{"confidence_score": 0.9}"#).is_err());
    }

    #[test]
    fn synthesis_reply_keeps_model_agreement() {
        let reply: SynthesisReply = decode_validated(
            r#"{"final_summary": "s", "consensus_level": 0.8,
                "final_differential_diagnoses": [
                  {"diagnosis": "市中肺炎", "probability": 0.8, "model_agreement": ["llama3.1-8b", "llama-3.3-70b"]}
                ]}"#,
        )
        .unwrap();
        assert_eq!(reply.final_differential_diagnoses[0].model_agreement.len(), 2);
    }

    #[test]
    fn all_failed_message_counts_members() {
        let err = EnsembleError::AllBackendsFailed {
            failures: vec![
                MemberFailure { model_name: "a".into(), reason: DegradedReason::Unavailable },
                MemberFailure { model_name: "b".into(), reason: DegradedReason::Unavailable },
            ],
        };
        assert_eq!(err.to_string(), "All 2 ensemble members failed");
    }
}
