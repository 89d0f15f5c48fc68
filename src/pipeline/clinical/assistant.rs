use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::pipeline::llm::{call_and_decode, call_backend, DegradedReason, TextGenerator, WithFallback};
use crate::pipeline::safety::{AdaptiveMasker, MaskingLevel};

use super::prompt::{build_recommendation_request, build_situation_request, build_validation_request};
use super::types::{mask_json_strings, ClinicalCase, ClinicalValidation, Inconsistency, PatientSituation};

/// Backend-assisted support for a single encounter: situation summary,
/// Assessment/Plan consistency check and treatment recommendations.
///
/// Free text is masked at `minimal` level before any request is built.
/// Every operation returns a usable value; a failed backend call yields the
/// documented fallback with the reason attached.
pub struct ClinicalAssistant {
    generator: Option<Arc<dyn TextGenerator>>,
    masker: AdaptiveMasker,
    timeout: Duration,
    lang: String,
}

impl ClinicalAssistant {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, timeout: Duration, lang: &str) -> Self {
        Self {
            generator,
            masker: AdaptiveMasker::new(lang),
            timeout,
            lang: lang.to_string(),
        }
    }

    fn en(&self) -> bool {
        self.lang == "en"
    }

    pub async fn generate_patient_summary(&self, case: &ClinicalCase) -> WithFallback<PatientSituation> {
        let result = match case.masked(&self.masker) {
            Ok(safe_case) => {
                call_and_decode::<PatientSituation>(
                    self.generator.as_deref(),
                    &build_situation_request(&safe_case),
                    self.timeout,
                )
                .await
            }
            Err(e) => Err(DegradedReason::Internal(e.to_string())),
        };

        match result {
            Ok(mut situation) => {
                situation.confidence_score = crate::pipeline::llm::clamp_unit(situation.confidence_score);
                situation.generated_at = Utc::now();
                tracing::info!(
                    findings = situation.key_findings.len(),
                    differentials = situation.differential_diagnoses.len(),
                    "Patient summary generated"
                );
                WithFallback::fresh(situation)
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Patient summary unavailable, returning fallback");
                WithFallback::degraded(self.fallback_situation(), reason)
            }
        }
    }

    pub async fn validate_clinical_reasoning(
        &self,
        patient_summary: &str,
        assessment: &str,
        plan: &str,
        diagnosis_codes: &[String],
    ) -> WithFallback<ClinicalValidation> {
        let masked = self.redact(patient_summary).and_then(|summary| {
            Ok((summary, self.redact(assessment)?, self.redact(plan)?))
        });

        let result = match masked {
            Ok((summary, assessment, plan)) => {
                call_and_decode::<ClinicalValidation>(
                    self.generator.as_deref(),
                    &build_validation_request(&summary, &assessment, &plan, diagnosis_codes),
                    self.timeout,
                )
                .await
            }
            Err(reason) => Err(reason),
        };

        match result {
            Ok(mut validation) => {
                validation.consistency_score = crate::pipeline::llm::clamp_unit(validation.consistency_score);
                tracing::info!(
                    is_consistent = validation.is_consistent,
                    inconsistencies = validation.inconsistencies.len(),
                    "Clinical reasoning validated"
                );
                WithFallback::fresh(validation)
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Clinical validation unavailable, returning fallback");
                WithFallback::degraded(self.fallback_validation(), reason)
            }
        }
    }

    pub async fn generate_clinical_recommendations(
        &self,
        patient_data: &serde_json::Value,
        diagnosis: &str,
    ) -> WithFallback<Vec<String>> {
        let mut safe_data = patient_data.clone();
        let prepared = mask_json_strings(&mut safe_data, &self.masker)
            .map_err(|e| DegradedReason::Internal(e.to_string()))
            .and_then(|_| self.redact(diagnosis));

        let result = match (prepared, self.generator.as_deref()) {
            (Err(reason), _) => Err(reason),
            (Ok(_), None) => Err(DegradedReason::Unavailable),
            (Ok(diagnosis), Some(generator)) => {
                let request = build_recommendation_request(&safe_data, &diagnosis);
                call_backend(generator, &request, self.timeout)
                    .await
                    .and_then(|reply| {
                        let items = bullet_lines(&reply);
                        if items.is_empty() {
                            Err(DegradedReason::MalformedReply("no recommendation lines".into()))
                        } else {
                            Ok(items)
                        }
                    })
            }
        };

        match result {
            Ok(items) => WithFallback::fresh(items),
            Err(reason) => {
                tracing::warn!(reason = %reason, "Recommendations unavailable, returning fallback");
                WithFallback::degraded(self.fallback_recommendations(), reason)
            }
        }
    }

    fn redact(&self, text: &str) -> Result<String, DegradedReason> {
        self.masker
            .redact(text, MaskingLevel::Minimal)
            .map_err(|e| DegradedReason::Internal(e.to_string()))
    }

    fn fallback_situation(&self) -> PatientSituation {
        let (summary, recommendation) = if self.en() {
            (
                "Automatic summary failed. Please organize the situation manually.",
                "Detailed evaluation by a physician is required",
            )
        } else {
            (
                "自動要約の生成に失敗しました。手動での状況整理をお願いします。",
                "医師による詳細な評価が必要です",
            )
        };
        PatientSituation {
            summary: summary.to_string(),
            key_findings: Vec::new(),
            differential_diagnoses: Vec::new(),
            risk_factors: Vec::new(),
            recommendations: vec![recommendation.to_string()],
            confidence_score: 0.0,
            generated_at: Utc::now(),
        }
    }

    fn fallback_validation(&self) -> ClinicalValidation {
        let (description, suggestion, summary) = if self.en() {
            (
                "Validation system error",
                "Manual detailed review is recommended",
                "Automatic validation failed",
            )
        } else {
            ("検証システムエラー", "手動での詳細確認を推奨します", "自動検証に失敗しました")
        };
        ClinicalValidation {
            is_consistent: false,
            consistency_score: 0.0,
            inconsistencies: vec![Inconsistency {
                kind: "system_error".to_string(),
                description: description.to_string(),
                severity: String::new(),
                location: String::new(),
            }],
            suggestions: vec![suggestion.to_string()],
            missing_elements: Vec::new(),
            validation_summary: summary.to_string(),
        }
    }

    fn fallback_recommendations(&self) -> Vec<String> {
        let items: [&str; 3] = if self.en() {
            [
                "A detailed medical evaluation is required",
                "Consider consulting an appropriate specialist",
                "Monitor the patient's condition continuously",
            ]
        } else {
            [
                "詳細な医学的評価が必要です",
                "適切な専門医への相談を検討してください",
                "患者の状態を継続的にモニタリングしてください",
            ]
        };
        items.iter().map(|s| s.to_string()).collect()
    }
}

/// Non-empty lines of a bullet reply, headings (`#`) dropped.
fn bullet_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}
