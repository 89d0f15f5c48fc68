use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::FutureExt;

use crate::config::EnsembleSettings;
use crate::pipeline::clinical::ClinicalCase;
use crate::pipeline::llm::{build_generator, call_and_decode, clamp_unit, DegradedReason, LlmError, TextGenerator};
use crate::pipeline::safety::AdaptiveMasker;

use super::prompt::build_diagnosis_request;
use super::synthesis::SynthesisEngine;
use super::types::{DiagnosisResult, EnsembleDiagnosisResult, EnsembleError, MemberFailure};

/// Fans one case out to every roster member, then reconciles.
///
/// Members run concurrently with the same prompt pair and a per-member
/// deadline. A failed, timed-out, malformed or panicking member is only
/// recorded in `failed_models`; the run fails only when no member
/// produced a valid result.
pub struct EnsembleOrchestrator {
    members: Vec<Arc<dyn TextGenerator>>,
    synthesis: SynthesisEngine,
    member_timeout: Duration,
    case_masker: Option<AdaptiveMasker>,
}

impl EnsembleOrchestrator {
    pub fn new(members: Vec<Arc<dyn TextGenerator>>, synthesis: SynthesisEngine, member_timeout: Duration) -> Self {
        let case_masker = Some(AdaptiveMasker::new(synthesis.lang()));
        Self {
            members,
            synthesis,
            member_timeout,
            case_masker,
        }
    }

    /// Mask case free text before dispatch (on by default). The masker
    /// shares the synthesis language.
    pub fn with_case_masking(mut self, enabled: bool) -> Self {
        self.case_masker = enabled.then(|| AdaptiveMasker::new(self.synthesis.lang()));
        self
    }

    /// One generator per roster model on the shared backend, plus the
    /// synthesis model.
    pub fn from_settings(settings: &EnsembleSettings, lang: &str) -> Result<Self, EnsembleError> {
        let backend = settings.backend.as_ref().ok_or(LlmError::NotConfigured)?;
        let timeout = settings.member_timeout;

        let members = settings
            .roster
            .iter()
            .map(|model| build_generator(&backend.with_model(model), timeout))
            .collect::<Result<Vec<_>, _>>()?;
        let synthesis_generator = build_generator(&backend.with_model(&settings.synthesis_model), timeout)?;

        Ok(Self::new(
            members,
            SynthesisEngine::new(Some(synthesis_generator), timeout, lang),
            timeout,
        )
        .with_case_masking(settings.mask_case_pii))
    }

    pub fn roster(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.model_name()).collect()
    }

    /// Diagnose `case` with every member and synthesize the results.
    pub async fn run(&self, case: &ClinicalCase) -> Result<EnsembleDiagnosisResult, EnsembleError> {
        if self.members.is_empty() {
            return Err(EnsembleError::EmptyRoster);
        }

        let case = match &self.case_masker {
            Some(masker) => case.masked(masker)?,
            None => case.clone(),
        };

        let (results, failures) = self.collect(&case).await;
        if results.is_empty() {
            tracing::error!(members = self.members.len(), "Every ensemble member failed");
            return Err(EnsembleError::AllBackendsFailed { failures });
        }

        let mut diagnosis = self.synthesis.synthesize(results, &case).await;
        diagnosis.failed_models = failures;
        Ok(diagnosis)
    }

    /// Fan-out phase: valid results and failures, both in roster order.
    pub async fn collect(&self, case: &ClinicalCase) -> (Vec<DiagnosisResult>, Vec<MemberFailure>) {
        let started = Instant::now();
        let request = build_diagnosis_request(case);

        let futures: Vec<_> = self
            .members
            .iter()
            .map(|member| {
                let request = &request;
                async move {
                    let model_name = member.model_name().to_string();
                    let attempt = AssertUnwindSafe(call_and_decode::<DiagnosisResult>(
                        Some(member.as_ref()),
                        request,
                        self.member_timeout,
                    ))
                    .catch_unwind()
                    .await;

                    match attempt {
                        Ok(Ok(mut result)) => {
                            result.model_name = model_name;
                            result.confidence_score = clamp_unit(result.confidence_score);
                            tracing::info!(
                                model = %result.model_name,
                                confidence = result.confidence_score,
                                "Ensemble member returned a diagnosis"
                            );
                            Ok(result)
                        }
                        Ok(Err(reason)) => {
                            tracing::warn!(model = %model_name, reason = %reason, "Ensemble member failed");
                            Err(MemberFailure { model_name, reason })
                        }
                        Err(_) => {
                            tracing::error!(model = %model_name, "Ensemble member panicked");
                            Err(MemberFailure {
                                model_name,
                                reason: DegradedReason::Internal("member panicked".to_string()),
                            })
                        }
                    }
                }
            })
            .collect();

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for outcome in join_all(futures).await {
            match outcome {
                Ok(result) => results.push(result),
                Err(failure) => failures.push(failure),
            }
        }

        tracing::info!(
            collected = results.len(),
            failed = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ensemble fan-out complete"
        );

        (results, failures)
    }
}
