use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::llm::DegradedReason;

// ═══════════════════════════════════════════════════════════
// PII vocabulary
// ═══════════════════════════════════════════════════════════

/// Category of personally identifiable information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Name,
    PatientId,
    Phone,
    Email,
    Address,
    BirthDate,
    InsuranceNumber,
    Other,
}

impl PiiType {
    pub const ALL: [PiiType; 8] = [
        PiiType::Name,
        PiiType::PatientId,
        PiiType::Phone,
        PiiType::Email,
        PiiType::Address,
        PiiType::BirthDate,
        PiiType::InsuranceNumber,
        PiiType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PiiType::Name => "name",
            PiiType::PatientId => "patient_id",
            PiiType::Phone => "phone",
            PiiType::Email => "email",
            PiiType::Address => "address",
            PiiType::BirthDate => "birth_date",
            PiiType::InsuranceNumber => "insurance_number",
            PiiType::Other => "other",
        }
    }

    /// Parse a backend-reported label. Unknown labels map to `Other`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        PiiType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .unwrap_or(PiiType::Other)
    }

    /// Severity used by the risk classifier and for overlap resolution.
    pub fn severity(self) -> f64 {
        match self {
            PiiType::PatientId | PiiType::InsuranceNumber => 0.8,
            PiiType::Name | PiiType::Phone | PiiType::Address => 0.6,
            PiiType::Email | PiiType::BirthDate | PiiType::Other => 0.4,
        }
    }
}

impl fmt::Display for PiiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected PII span.
///
/// Offsets are UTF-8 byte offsets into the text the detection was produced
/// from, always on char boundaries, with `start_pos < end_pos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiDetection {
    pub text: String,
    pub start_pos: usize,
    pub end_pos: usize,
    pub pii_type: PiiType,
    /// Clamped to [0, 1].
    pub confidence: f64,
    pub masked_text: String,
    /// Surrounding text (for human review, never logged).
    pub context: String,
    pub reasoning: String,
}

impl PiiDetection {
    pub fn span_len(&self) -> usize {
        self.end_pos - self.start_pos
    }

    pub fn overlaps(&self, other: &PiiDetection) -> bool {
        self.start_pos < other.end_pos && other.start_pos < self.end_pos
    }
}

/// Masking intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingLevel {
    Minimal,
    #[default]
    Standard,
    Maximum,
}

impl MaskingLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            MaskingLevel::Minimal => "minimal",
            MaskingLevel::Standard => "standard",
            MaskingLevel::Maximum => "maximum",
        }
    }
}

impl FromStr for MaskingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(MaskingLevel::Minimal),
            "standard" => Ok(MaskingLevel::Standard),
            "maximum" => Ok(MaskingLevel::Maximum),
            other => Err(format!("unknown masking level: {other}")),
        }
    }
}

impl fmt::Display for MaskingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Risk and action
// ═══════════════════════════════════════════════════════════

/// Ordinal risk level, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a combined risk score.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RiskLevel::Critical
        } else if score >= 0.6 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// The single action applied to a processed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyAction {
    Allow,
    Mask,
    Rewrite,
    Block,
}

impl SafetyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyAction::Allow => "allow",
            SafetyAction::Mask => "mask",
            SafetyAction::Rewrite => "rewrite",
            SafetyAction::Block => "block",
        }
    }
}

/// Progress of one `process_medical_text` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyStage {
    Received,
    PiiScanned,
    RiskClassified,
    ActionDetermined,
    Finalized,
}

impl SafetyStage {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => SafetyStage::Received,
            1 => SafetyStage::PiiScanned,
            2 => SafetyStage::RiskClassified,
            3 => SafetyStage::ActionDetermined,
            _ => SafetyStage::Finalized,
        }
    }
}

/// Backend-assisted step that may degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStep {
    PiiDetection,
    HallucinationScoring,
    Rewrite,
}

/// A backend-assisted step that returned its fallback value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub step: BackendStep,
    pub reason: DegradedReason,
}

// ═══════════════════════════════════════════════════════════
// Result
// ═══════════════════════════════════════════════════════════

/// One entry of a result's issue summary. Never carries raw PII values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectedIssue {
    PiiDetected {
        category: PiiType,
        confidence: f64,
        description: String,
    },
    HallucinationRisk {
        score: f64,
        description: String,
    },
    RewriteUnavailable {
        reason: DegradedReason,
    },
    SystemError {
        stage: SafetyStage,
        message: String,
    },
}

impl DetectedIssue {
    pub fn pii(detection: &PiiDetection, lang: &str) -> Self {
        let description = match lang {
            "en" => format!("{} detected", detection.pii_type),
            _ => format!("{}が検出されました", detection.pii_type),
        };
        DetectedIssue::PiiDetected {
            category: detection.pii_type,
            confidence: detection.confidence,
            description,
        }
    }

    pub fn hallucination(score: f64, lang: &str) -> Self {
        let description = match lang {
            "en" => "Medical facts in this text are questionable",
            _ => "医学的事実に疑問があります",
        };
        DetectedIssue::HallucinationRisk {
            score,
            description: description.to_string(),
        }
    }
}

/// Outcome of one `process_medical_text` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyResult {
    pub original_text: String,
    pub processed_text: String,
    pub risk_level: RiskLevel,
    pub action_taken: SafetyAction,
    pub confidence_score: f64,
    pub detected_issues: Vec<DetectedIssue>,
    pub processing_time_ms: u64,
    pub audit_hash: String,
    /// Backend-assisted steps that used their fallback.
    #[serde(default)]
    pub degradations: Vec<Degradation>,
    /// A REWRITE decision whose rewrite could not be applied.
    #[serde(default)]
    pub residual_risk: bool,
}

impl SafetyResult {
    pub fn is_blocked(&self) -> bool {
        self.action_taken == SafetyAction::Block
    }

    pub fn used_fallback(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Safety pipeline errors.
#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Detection span {start}..{end} is invalid for text of {len} bytes")]
    InvalidSpan { start: usize, end: usize, len: usize },

    #[error("Audit sink write failed: {0}")]
    AuditWrite(String),
}

// ═══════════════════════════════════════════════════════════
// Localized strings
// ═══════════════════════════════════════════════════════════

/// Marker shown in place of blocked content.
pub fn blocked_marker_i18n(lang: &str) -> &'static str {
    match lang {
        "en" => "[This content cannot be displayed for medical safety reasons]",
        _ => "[医療安全上の理由により、この内容は表示できません]",
    }
}

/// Marker shown when processing failed and the fail-safe result was used.
pub fn system_error_marker_i18n(lang: &str) -> &'static str {
    match lang {
        "en" => "[Unable to process due to a system error]",
        _ => "[システムエラーにより処理できません]",
    }
}

/// Placeholder for maximum-level masking. `None` means full-length asterisks.
pub fn pii_placeholder_i18n(pii_type: PiiType, lang: &str) -> Option<&'static str> {
    let label = match (lang, pii_type) {
        ("en", PiiType::Name) => "[patient name]",
        ("en", PiiType::PatientId) => "[patient ID]",
        ("en", PiiType::Phone) => "[phone number]",
        ("en", PiiType::Email) => "[email address]",
        ("en", PiiType::Address) => "[address]",
        ("en", PiiType::BirthDate) => "[date of birth]",
        ("en", PiiType::InsuranceNumber) => "[insurance number]",
        (_, PiiType::Name) => "[患者名]",
        (_, PiiType::PatientId) => "[患者ID]",
        (_, PiiType::Phone) => "[電話番号]",
        (_, PiiType::Email) => "[メールアドレス]",
        (_, PiiType::Address) => "[住所]",
        (_, PiiType::BirthDate) => "[生年月日]",
        (_, PiiType::InsuranceNumber) => "[保険証番号]",
        (_, PiiType::Other) => return None,
    };
    Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pii_type_labels_round_trip() {
        for t in PiiType::ALL {
            assert_eq!(PiiType::from_label(t.as_str()), t);
        }
        assert_eq!(PiiType::from_label("Patient-ID"), PiiType::PatientId);
        assert_eq!(PiiType::from_label("unknown"), PiiType::Other);
        assert_eq!(PiiType::from_label(""), PiiType::Other);
    }

    #[test]
    fn pii_type_serializes_snake_case() {
        let json = serde_json::to_string(&PiiType::InsuranceNumber).unwrap();
        assert_eq!(json, "\"insurance_number\"");
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Critical);
    }

    #[test]
    fn masking_level_parses() {
        assert_eq!("MAXIMUM".parse::<MaskingLevel>().unwrap(), MaskingLevel::Maximum);
        assert_eq!(" minimal ".parse::<MaskingLevel>().unwrap(), MaskingLevel::Minimal);
        assert!("partial".parse::<MaskingLevel>().is_err());
        assert_eq!(MaskingLevel::default(), MaskingLevel::Standard);
    }

    #[test]
    fn issues_serialize_with_type_tag() {
        let issue = DetectedIssue::HallucinationRisk {
            score: 0.8,
            description: "x".into(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "hallucination_risk");

        let issue = DetectedIssue::SystemError {
            stage: SafetyStage::PiiScanned,
            message: "boom".into(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "system_error");
        assert_eq!(json["stage"], "pii_scanned");
    }

    #[test]
    fn markers_default_to_japanese() {
        assert_eq!(blocked_marker_i18n("ja"), blocked_marker_i18n("xx"));
        assert_ne!(blocked_marker_i18n("en"), blocked_marker_i18n("ja"));
        assert!(system_error_marker_i18n("en").contains("system error"));
    }

    #[test]
    fn only_other_lacks_placeholder() {
        for t in PiiType::ALL {
            assert_eq!(pii_placeholder_i18n(t, "ja").is_none(), t == PiiType::Other);
            assert_eq!(pii_placeholder_i18n(t, "en").is_none(), t == PiiType::Other);
        }
    }

    #[test]
    fn detection_overlap() {
        let d = |s, e| PiiDetection {
            text: String::new(),
            start_pos: s,
            end_pos: e,
            pii_type: PiiType::Other,
            confidence: 0.5,
            masked_text: String::new(),
            context: String::new(),
            reasoning: String::new(),
        };
        assert!(d(0, 5).overlaps(&d(4, 8)));
        assert!(!d(0, 5).overlaps(&d(5, 8)));
        assert_eq!(d(2, 7).span_len(), 5);
    }
}
