use serde::{Deserialize, Serialize};

use crate::pipeline::llm::WithFallback;

use super::contextual::ContextualPiiDetector;
use super::masking::AdaptiveMasker;
use super::patterns::detect_patterns;
use super::types::{MaskingLevel, PiiDetection, PiiType, RiskLevel, SafetyError};

/// Longest context excerpt kept in a risk report.
const REPORT_CONTEXT_CHARS: usize = 50;

/// Summary entry for one detection in a risk report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiReportEntry {
    pub pii_type: PiiType,
    pub confidence: f64,
    pub context: String,
}

/// Additive, confidence-weighted PII exposure assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiRiskReport {
    pub overall_risk_score: f64,
    pub risk_level: RiskLevel,
    pub detected_count: usize,
    pub high_risk_pii: usize,
    pub medium_risk_pii: usize,
    pub detections: Vec<PiiReportEntry>,
    pub recommendations: Vec<String>,
}

/// Detection plus masking, with contextual detection when enabled.
pub struct PiiService {
    detector: ContextualPiiDetector,
    masker: AdaptiveMasker,
    use_contextual: bool,
    lang: String,
}

impl PiiService {
    pub fn new(detector: ContextualPiiDetector, masker: AdaptiveMasker, lang: &str) -> Self {
        Self {
            detector,
            masker,
            use_contextual: true,
            lang: lang.to_string(),
        }
    }

    /// Skip the backend and use the rule matcher only.
    pub fn rules_only(mut self) -> Self {
        self.use_contextual = false;
        self
    }

    pub fn masker(&self) -> &AdaptiveMasker {
        &self.masker
    }

    pub fn is_backend_configured(&self) -> bool {
        self.use_contextual && self.detector.is_backend_configured()
    }

    pub async fn detect(&self, text: &str) -> WithFallback<Vec<PiiDetection>> {
        if self.use_contextual {
            self.detector.detect(text, true).await
        } else {
            WithFallback::fresh(detect_patterns(text))
        }
    }

    /// Detect and mask at the requested level.
    pub async fn smart_mask(
        &self,
        text: &str,
        level: MaskingLevel,
    ) -> Result<(String, WithFallback<Vec<PiiDetection>>), SafetyError> {
        let detections = self.detect(text).await;
        let masked = self.masker.mask(text, &detections.value, level)?;
        Ok((masked, detections))
    }

    /// Detect, then assess exposure.
    pub async fn analyze_text_risk(&self, text: &str) -> WithFallback<PiiRiskReport> {
        self.detect(text).await.map(|d| self.analyze_risk(&d))
    }

    /// Assess exposure of a detection set.
    ///
    /// Unlike the risk classifier this is additive: name, patient ID, phone
    /// and address count `confidence × 0.8`, birth date and insurance number
    /// `confidence × 0.4`, capped at 1.0.
    pub fn analyze_risk(&self, detections: &[PiiDetection]) -> PiiRiskReport {
        let mut score: f64 = 0.0;
        let mut high = 0;
        let mut medium = 0;

        for d in detections {
            match d.pii_type {
                PiiType::Name | PiiType::PatientId | PiiType::Phone | PiiType::Address => {
                    score += d.confidence * 0.8;
                    high += 1;
                }
                PiiType::BirthDate | PiiType::InsuranceNumber => {
                    score += d.confidence * 0.4;
                    medium += 1;
                }
                PiiType::Email | PiiType::Other => {}
            }
        }
        let score = score.min(1.0);

        PiiRiskReport {
            overall_risk_score: score,
            risk_level: RiskLevel::from_score(score),
            detected_count: detections.len(),
            high_risk_pii: high,
            medium_risk_pii: medium,
            detections: detections
                .iter()
                .map(|d| PiiReportEntry {
                    pii_type: d.pii_type,
                    confidence: d.confidence,
                    context: excerpt(&d.context, REPORT_CONTEXT_CHARS),
                })
                .collect(),
            recommendations: recommendations(score, detections, &self.lang),
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn recommendations(score: f64, detections: &[PiiDetection], lang: &str) -> Vec<String> {
    let en = lang == "en";
    let mut out: Vec<&str> = Vec::new();

    if score >= 0.8 {
        out.push(if en { "Maximum-level masking is recommended" } else { "最大レベルのマスキングを推奨します" });
        out.push(if en {
            "Review the content before sharing it externally"
        } else {
            "外部共有前に必ず内容を確認してください"
        });
    } else if score >= 0.6 {
        out.push(if en { "Standard-level masking is recommended" } else { "標準レベルのマスキングを推奨します" });
        out.push(if en { "Consider restricting who it is shared with" } else { "共有先を制限することを検討してください" });
    } else if score >= 0.3 {
        out.push(if en { "Minimal masking is sufficient" } else { "最小限のマスキングで対応可能です" });
    }

    if detections.iter().any(|d| d.pii_type == PiiType::Name) {
        out.push(if en {
            "Contains a patient name: consider anonymizing"
        } else {
            "患者名が含まれています - 匿名化を検討してください"
        });
    }
    if detections.iter().any(|d| d.pii_type == PiiType::PatientId) {
        out.push(if en {
            "Contains a patient ID: restrict to internal use"
        } else {
            "患者IDが含まれています - 内部利用に限定してください"
        });
    }

    out.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::pipeline::llm::ScriptedGenerator;

    fn rules_service() -> PiiService {
        PiiService::new(
            ContextualPiiDetector::new(None, Duration::from_secs(1)),
            AdaptiveMasker::new("ja"),
            "ja",
        )
        .rules_only()
    }

    #[tokio::test]
    async fn smart_mask_rules_only() {
        let service = rules_service();
        let (masked, detections) = service
            .smart_mask("田中太郎 090-1234-5678", MaskingLevel::Maximum)
            .await
            .unwrap();
        assert_eq!(masked, "[患者名] [電話番号]");
        assert_eq!(detections.value.len(), 2);
        assert!(!detections.used_fallback());
    }

    #[tokio::test]
    async fn smart_mask_records_backend_fallback() {
        let service = PiiService::new(
            ContextualPiiDetector::new(
                Some(Arc::new(ScriptedGenerator::failing("m"))),
                Duration::from_secs(1),
            ),
            AdaptiveMasker::new("ja"),
            "ja",
        );
        let (masked, detections) = service
            .smart_mask("電話 090-1234-5678", MaskingLevel::Standard)
            .await
            .unwrap();
        assert!(detections.used_fallback());
        assert_eq!(masked, "電話 ***********78");
    }

    #[tokio::test]
    async fn risk_report_is_additive_and_capped() {
        let service = rules_service();
        let report = service
            .analyze_text_risk("患者番号：P123456 田中太郎 090-1234-5678")
            .await
            .value;
        assert_eq!(report.detected_count, 3);
        assert_eq!(report.high_risk_pii, 3);
        assert!((report.overall_risk_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert!(report.recommendations.iter().any(|r| r.contains("患者名")));
        assert!(report.recommendations.iter().any(|r| r.contains("患者ID")));
    }

    #[tokio::test]
    async fn medium_types_weigh_less() {
        let service = rules_service();
        let report = service.analyze_text_risk("生年月日 1985年4月12日").await.value;
        assert_eq!(report.medium_risk_pii, 1);
        // 0.9 * 0.4
        assert!((report.overall_risk_score - 0.36).abs() < 1e-9);
        assert_eq!(report.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn empty_report_is_low() {
        let report = rules_service().analyze_risk(&[]);
        assert_eq!(report.overall_risk_score, 0.0);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn excerpt_truncates_by_chars() {
        let long = "あ".repeat(60);
        let cut = excerpt(&long, 50);
        assert_eq!(cut.chars().count(), 53);
        assert!(cut.ends_with("..."));
        assert_eq!(excerpt("short", 50), "short");
    }
}
