use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use crate::config::{SafetySettings, Settings};
use crate::pipeline::llm::{build_generator, DegradedReason, LlmError, TextGenerator, WithFallback};

use super::audit::{audit_hash, AuditRecorder};
use super::contextual::ContextualPiiDetector;
use super::hallucination::HallucinationScorer;
use super::masking::AdaptiveMasker;
use super::pii::PiiService;
use super::rewrite::AutoRewriter;
use super::risk::{classify, confidence_score, select_action};
use super::types::{
    blocked_marker_i18n, system_error_marker_i18n, BackendStep, Degradation, DetectedIssue,
    MaskingLevel, PiiType, RiskLevel, SafetyAction, SafetyError, SafetyResult, SafetyStage,
};

/// Snapshot of the safety layer's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub backend_configured: bool,
    pub model: Option<String>,
    pub hallucination_threshold: f64,
    pub auto_rewrite_enabled: bool,
    pub contextual_detection_enabled: bool,
    pub masking_level: MaskingLevel,
    pub language: String,
    pub supported_pii_types: Vec<PiiType>,
}

/// Sequences detection, masking, scoring, classification and the chosen
/// action into one call that always produces an audited `SafetyResult`.
pub struct SafetyOrchestrator {
    settings: SafetySettings,
    model: Option<String>,
    pii: PiiService,
    scorer: HallucinationScorer,
    rewriter: AutoRewriter,
    recorder: AuditRecorder,
}

/// Everything decided by the stages, before hashing and audit.
struct StageOutcome {
    processed_text: String,
    risk_level: RiskLevel,
    action: SafetyAction,
    confidence: f64,
    issues: Vec<DetectedIssue>,
    degradations: Vec<Degradation>,
    residual_risk: bool,
}

/// Last stage reached, readable after a panic.
struct StageTracker(AtomicU8);

impl StageTracker {
    fn new() -> Self {
        Self(AtomicU8::new(SafetyStage::Received as u8))
    }

    fn set(&self, stage: SafetyStage) {
        self.0.store(stage as u8, Ordering::SeqCst);
    }

    fn get(&self) -> SafetyStage {
        SafetyStage::from_u8(self.0.load(Ordering::SeqCst))
    }
}

impl SafetyOrchestrator {
    pub fn new(
        settings: SafetySettings,
        generator: Option<Arc<dyn TextGenerator>>,
        recorder: AuditRecorder,
    ) -> Self {
        let timeout = settings.backend_timeout;
        let masker = AdaptiveMasker::new(&settings.language)
            .with_birth_date_preserved(settings.preserve_birth_date_minimal);
        let mut pii = PiiService::new(
            ContextualPiiDetector::new(generator.clone(), timeout),
            masker,
            &settings.language,
        );
        if !settings.use_contextual_detection {
            pii = pii.rules_only();
        }

        Self {
            model: generator.as_ref().map(|g| g.model_name().to_string()),
            scorer: HallucinationScorer::new(generator.clone(), timeout),
            rewriter: AutoRewriter::new(generator, timeout),
            pii,
            recorder,
            settings,
        }
    }

    /// Build from top-level settings: safety backend, policy, audit sinks.
    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        let generator = match &settings.safety_backend {
            Some(backend) => Some(build_generator(backend, settings.safety.backend_timeout)?),
            None => None,
        };
        Ok(Self::new(
            settings.safety.clone(),
            generator,
            AuditRecorder::from_settings(&settings.audit),
        ))
    }

    pub fn settings(&self) -> &SafetySettings {
        &self.settings
    }

    pub fn pii_service(&self) -> &PiiService {
        &self.pii
    }

    pub fn status(&self) -> SafetyStatus {
        SafetyStatus {
            backend_configured: self.model.is_some(),
            model: self.model.clone(),
            hallucination_threshold: self.settings.hallucination_threshold,
            auto_rewrite_enabled: self.settings.enable_auto_rewrite,
            contextual_detection_enabled: self.settings.use_contextual_detection,
            masking_level: self.settings.masking_level,
            language: self.settings.language.clone(),
            supported_pii_types: PiiType::ALL.to_vec(),
        }
    }

    /// Run the full safety pipeline over one text.
    ///
    /// Never fails. Errors and panics inside the stages produce the
    /// fail-safe CRITICAL/BLOCK result, which is audited like any other.
    /// The audit record is written after the last await, so a caller that
    /// drops this future never leaves a partial record behind.
    pub async fn process_medical_text(
        &self,
        text: &str,
        context: Option<&serde_json::Value>,
    ) -> SafetyResult {
        let started = Instant::now();
        let stage = StageTracker::new();

        let outcome = match AssertUnwindSafe(self.run_stages(text, context, &stage))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(stage = ?stage.get(), error = %e, "Safety pipeline failed, blocking");
                self.fail_safe(stage.get(), e.to_string())
            }
            Err(_) => {
                // Panic payloads can quote the text being sliced; keep them out.
                tracing::error!(stage = ?stage.get(), "Safety pipeline panicked, blocking");
                self.fail_safe(stage.get(), "unexpected internal fault".to_string())
            }
        };
        stage.set(SafetyStage::Finalized);

        let timestamp = Utc::now();
        let result = SafetyResult {
            original_text: text.to_string(),
            audit_hash: audit_hash(text, &outcome.processed_text, outcome.issues.len(), timestamp),
            processed_text: outcome.processed_text,
            risk_level: outcome.risk_level,
            action_taken: outcome.action,
            confidence_score: outcome.confidence,
            detected_issues: outcome.issues,
            processing_time_ms: started.elapsed().as_millis() as u64,
            degradations: outcome.degradations,
            residual_risk: outcome.residual_risk,
        };

        self.recorder.record(&result, context, timestamp);

        tracing::info!(
            risk_level = result.risk_level.as_str(),
            action = result.action_taken.as_str(),
            confidence = result.confidence_score,
            issue_count = result.detected_issues.len(),
            degraded_steps = result.degradations.len(),
            processing_time_ms = result.processing_time_ms,
            "Safety processing complete"
        );

        result
    }

    async fn run_stages(
        &self,
        text: &str,
        context: Option<&serde_json::Value>,
        stage: &StageTracker,
    ) -> Result<StageOutcome, SafetyError> {
        let lang = self.settings.language.as_str();
        let mut degradations = Vec::new();

        // PII scan and masking
        let detections = note_fallback(
            &mut degradations,
            BackendStep::PiiDetection,
            self.pii.detect(text).await,
        );
        let masked = self
            .pii
            .masker()
            .mask(text, &detections, self.settings.masking_level)?;
        stage.set(SafetyStage::PiiScanned);

        // Hallucination scoring runs on masked text only
        let assessment = note_fallback(
            &mut degradations,
            BackendStep::HallucinationScoring,
            self.scorer.assess(&masked).await,
        );
        let hallucination_score = assessment.risk_score;
        let risk_level = classify(&detections, hallucination_score);
        stage.set(SafetyStage::RiskClassified);

        let action = select_action(risk_level, !detections.is_empty());
        stage.set(SafetyStage::ActionDetermined);

        let mut issues: Vec<DetectedIssue> = detections
            .iter()
            .map(|d| DetectedIssue::pii(d, lang))
            .collect();
        if hallucination_score >= self.settings.hallucination_threshold {
            issues.push(DetectedIssue::hallucination(hallucination_score, lang));
        }

        let mut residual_risk = false;
        let processed_text = match action {
            SafetyAction::Block => blocked_marker_i18n(lang).to_string(),
            SafetyAction::Rewrite if self.settings.enable_auto_rewrite => {
                let rewritten = self.rewriter.rewrite(&masked, context).await;
                let unchanged = rewritten.value.trim() == masked.trim();
                let fallback = rewritten.fallback.or_else(|| {
                    unchanged.then(|| {
                        DegradedReason::MalformedReply("rewrite returned input unchanged".to_string())
                    })
                });
                if let Some(reason) = fallback {
                    residual_risk = true;
                    issues.push(DetectedIssue::RewriteUnavailable {
                        reason: reason.clone(),
                    });
                    degradations.push(Degradation {
                        step: BackendStep::Rewrite,
                        reason,
                    });
                }
                rewritten.value
            }
            SafetyAction::Rewrite => {
                residual_risk = true;
                issues.push(DetectedIssue::RewriteUnavailable {
                    reason: DegradedReason::Unavailable,
                });
                masked
            }
            SafetyAction::Mask | SafetyAction::Allow => masked,
        };

        if residual_risk {
            tracing::warn!(
                risk_level = risk_level.as_str(),
                auto_rewrite = self.settings.enable_auto_rewrite,
                "Rewrite decision could not be applied, masked text returned with residual risk"
            );
        }

        Ok(StageOutcome {
            processed_text,
            risk_level,
            action,
            confidence: confidence_score(&detections, hallucination_score),
            issues,
            degradations,
            residual_risk,
        })
    }

    fn fail_safe(&self, stage: SafetyStage, message: String) -> StageOutcome {
        StageOutcome {
            processed_text: system_error_marker_i18n(&self.settings.language).to_string(),
            risk_level: RiskLevel::Critical,
            action: SafetyAction::Block,
            confidence: 0.0,
            issues: vec![DetectedIssue::SystemError { stage, message }],
            degradations: Vec::new(),
            residual_risk: false,
        }
    }
}

fn note_fallback<T>(
    degradations: &mut Vec<Degradation>,
    step: BackendStep,
    result: WithFallback<T>,
) -> T {
    if let Some(reason) = result.fallback {
        degradations.push(Degradation { step, reason });
    }
    result.value
}
