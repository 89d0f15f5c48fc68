use serde::{Deserialize, Serialize};

use crate::pipeline::clinical::ClinicalCase;
use crate::pipeline::safety::{SafetyOrchestrator, SafetyResult};

use super::orchestrator::EnsembleOrchestrator;
use super::types::{EnsembleDiagnosisResult, EnsembleError};

/// Ensemble output together with the safety screening of its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedDiagnosis {
    pub diagnosis: EnsembleDiagnosisResult,
    pub screening: SafetyResult,
}

impl ScreenedDiagnosis {
    /// Text to show a user: the screened summary, or the blocked marker.
    pub fn display_summary(&self) -> &str {
        &self.screening.processed_text
    }
}

/// Run the ensemble, then pass `final_summary` through the safety layer.
pub async fn diagnose_and_screen(
    ensemble: &EnsembleOrchestrator,
    safety: &SafetyOrchestrator,
    case: &ClinicalCase,
) -> Result<ScreenedDiagnosis, EnsembleError> {
    let diagnosis = ensemble.run(case).await?;

    let context = serde_json::json!({
        "source": "ensemble_diagnosis",
        "models": diagnosis
            .individual_results
            .iter()
            .map(|r| r.model_name.as_str())
            .collect::<Vec<_>>(),
        "consensus_level": diagnosis.consensus_level,
        "synthesis_fallback": diagnosis.used_fallback(),
    });
    let screening = safety
        .process_medical_text(&diagnosis.final_summary, Some(&context))
        .await;

    tracing::info!(
        risk_level = screening.risk_level.as_str(),
        action = screening.action_taken.as_str(),
        "Ensemble summary screened"
    );

    Ok(ScreenedDiagnosis { diagnosis, screening })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::SafetySettings;
    use crate::pipeline::ensemble::SynthesisEngine;
    use crate::pipeline::llm::{ScriptedGenerator, TextGenerator};
    use crate::pipeline::safety::{AuditRecorder, MemoryAuditSink, RiskLevel, SafetyAction};

    fn ensemble(summary: &str) -> EnsembleOrchestrator {
        let reply = serde_json::json!({"summary": summary, "confidence_score": 0.7}).to_string();
        let member: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::replying("m", &reply));
        EnsembleOrchestrator::new(
            vec![member],
            SynthesisEngine::new(None, Duration::from_secs(1), "ja"),
            Duration::from_secs(1),
        )
    }

    fn safety() -> (SafetyOrchestrator, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let settings = SafetySettings {
            use_contextual_detection: false,
            ..SafetySettings::default()
        };
        let orch = SafetyOrchestrator::new(settings, None, AuditRecorder::silent().with_sink(sink.clone()));
        (orch, sink)
    }

    #[tokio::test]
    async fn summary_is_screened_and_audited() {
        let (safety, sink) = safety();
        let out = diagnose_and_screen(&ensemble("市中肺炎が疑われる"), &safety, &ClinicalCase::default())
            .await
            .unwrap();
        assert_eq!(out.screening.original_text, "市中肺炎が疑われる");
        assert_eq!(out.screening.risk_level, RiskLevel::Low);
        assert_eq!(out.display_summary(), "市中肺炎が疑われる");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context["source"], "ensemble_diagnosis");
        assert_eq!(records[0].context["synthesis_fallback"], true);
    }

    #[tokio::test]
    async fn leaked_identifier_in_summary_is_blocked() {
        let (safety, _) = safety();
        let out = diagnose_and_screen(&ensemble("患者番号：P123456 は肺炎"), &safety, &ClinicalCase::default())
            .await
            .unwrap();
        assert_eq!(out.screening.action_taken, SafetyAction::Block);
        assert!(out.screening.is_blocked());
        assert_ne!(out.display_summary(), out.diagnosis.final_summary);
    }
}
