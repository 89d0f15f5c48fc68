use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::pipeline::llm::{parse_array_lenient, Validate};
use crate::pipeline::safety::{AdaptiveMasker, MaskingLevel, SafetyError};

// ═══════════════════════════════════════════════════════════
// Clinical case input
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub medical_history: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub blood_pressure_systolic: Option<f64>,
    #[serde(default)]
    pub blood_pressure_diastolic: Option<f64>,
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub respiratory_rate: Option<f64>,
    #[serde(default)]
    pub oxygen_saturation: Option<f64>,
}

/// One structured clinical case: basic info, vitals, S and O of a SOAP
/// note and free-form prior encounters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalCase {
    #[serde(default)]
    pub basic_info: BasicInfo,
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default)]
    pub subjective: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub patient_history: Vec<serde_json::Value>,
}

impl ClinicalCase {
    /// Copy with every free-text field masked at `minimal` level.
    ///
    /// Strings nested anywhere inside `patient_history` are masked too.
    pub fn masked(&self, masker: &AdaptiveMasker) -> Result<ClinicalCase, SafetyError> {
        let mut case = self.clone();
        case.subjective = masker.redact(&self.subjective, MaskingLevel::Minimal)?;
        case.objective = masker.redact(&self.objective, MaskingLevel::Minimal)?;
        if let Some(history) = &self.basic_info.medical_history {
            case.basic_info.medical_history = Some(masker.redact(history, MaskingLevel::Minimal)?);
        }
        for entry in &mut case.patient_history {
            mask_json_strings(entry, masker)?;
        }
        Ok(case)
    }
}

/// Mask every string leaf of a JSON value in place.
pub fn mask_json_strings(value: &mut serde_json::Value, masker: &AdaptiveMasker) -> Result<(), SafetyError> {
    match value {
        serde_json::Value::String(s) => {
            *s = masker.redact(s, MaskingLevel::Minimal)?;
        }
        serde_json::Value::Array(items) => {
            for item in items {
                mask_json_strings(item, masker)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                mask_json_strings(item, masker)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Model output shapes
// ═══════════════════════════════════════════════════════════

/// One candidate diagnosis with its probability and evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialDiagnosis {
    pub diagnosis: String,
    #[serde(default)]
    pub probability: f64,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub additional_tests: Vec<String>,
    /// Models that proposed this diagnosis (synthesized results only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_agreement: Vec<String>,
}

/// Deserialize a differential list, skipping malformed entries.
pub(crate) fn lenient_differentials<'de, D>(deserializer: D) -> Result<Vec<DifferentialDiagnosis>, D::Error>
where
    D: Deserializer<'de>,
{
    let items: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    let mut parsed: Vec<DifferentialDiagnosis> = parse_array_lenient(&items.unwrap_or_default());
    for d in &mut parsed {
        d.probability = crate::pipeline::llm::clamp_unit(d.probability);
    }
    Ok(parsed)
}

/// Organized view of the current patient situation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSituation {
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
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
}

impl Validate for PatientSituation {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub location: String,
}

/// Consistency check of a physician's Assessment and Plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalValidation {
    pub is_consistent: bool,
    #[serde(default)]
    pub consistency_score: f64,
    #[serde(default)]
    pub inconsistencies: Vec<Inconsistency>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub missing_elements: Vec<String>,
    #[serde(default)]
    pub validation_summary: String,
}

impl Validate for ClinicalValidation {
    fn validate(&self) -> Result<(), String> {
        if self.consistency_score.is_finite() {
            Ok(())
        } else {
            Err("consistency_score is not a number".into())
        }
    }
}
