use crate::pipeline::llm::clamp_unit;

use super::types::{PiiDetection, RiskLevel, SafetyAction};

/// PII-derived risk: the most severe detection wins, 0.0 when none.
pub fn pii_risk(detections: &[PiiDetection]) -> f64 {
    detections
        .iter()
        .map(|d| d.pii_type.severity())
        .fold(0.0, f64::max)
}

/// Combine PII severity and hallucination score into one level.
///
/// Worst signal wins: `max(pii_risk, hallucination_score)`, bucketed at
/// 0.8 / 0.6 / 0.3.
pub fn classify(detections: &[PiiDetection], hallucination_score: f64) -> RiskLevel {
    RiskLevel::from_score(pii_risk(detections).max(clamp_unit(hallucination_score)))
}

/// Map a risk level to the single action applied to the text.
pub fn select_action(risk_level: RiskLevel, has_pii: bool) -> SafetyAction {
    match risk_level {
        RiskLevel::Critical => SafetyAction::Block,
        RiskLevel::High => SafetyAction::Rewrite,
        RiskLevel::Medium | RiskLevel::Low if has_pii => SafetyAction::Mask,
        RiskLevel::Medium | RiskLevel::Low => SafetyAction::Allow,
    }
}

/// Confidence of a non-error result:
/// `0.4 × mean(detection confidence, 1.0 if none) + 0.6 × (1 − hallucination)`.
pub fn confidence_score(detections: &[PiiDetection], hallucination_score: f64) -> f64 {
    let pii_confidence = if detections.is_empty() {
        1.0
    } else {
        detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64
    };
    clamp_unit(0.4 * pii_confidence + 0.6 * (1.0 - clamp_unit(hallucination_score)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::safety::patterns::detect_patterns;
    use crate::pipeline::safety::types::PiiType;

    fn det(pii_type: PiiType, confidence: f64) -> PiiDetection {
        PiiDetection {
            text: "x".into(),
            start_pos: 0,
            end_pos: 1,
            pii_type,
            confidence,
            masked_text: "*".into(),
            context: String::new(),
            reasoning: String::new(),
        }
    }

    #[test]
    fn severity_buckets() {
        assert_eq!(pii_risk(&[]), 0.0);
        assert_eq!(pii_risk(&[det(PiiType::Email, 0.9)]), 0.4);
        assert_eq!(pii_risk(&[det(PiiType::Phone, 0.9)]), 0.6);
        assert_eq!(pii_risk(&[det(PiiType::InsuranceNumber, 0.9)]), 0.8);
    }

    #[test]
    fn worst_signal_wins_not_sum() {
        let many_low = vec![det(PiiType::Email, 0.9); 10];
        assert_eq!(classify(&many_low, 0.0), RiskLevel::Medium);
        let mixed = vec![det(PiiType::Email, 0.9), det(PiiType::PatientId, 0.9)];
        assert_eq!(classify(&mixed, 0.0), RiskLevel::Critical);
    }

    #[test]
    fn hallucination_alone_drives_level() {
        assert_eq!(classify(&[], 0.0), RiskLevel::Low);
        assert_eq!(classify(&[], 0.35), RiskLevel::Medium);
        assert_eq!(classify(&[], 0.65), RiskLevel::High);
        assert_eq!(classify(&[], 0.95), RiskLevel::Critical);
    }

    #[test]
    fn classify_is_monotonic() {
        let sets: Vec<Vec<PiiDetection>> = vec![
            vec![],
            vec![det(PiiType::Other, 0.5)],
            vec![det(PiiType::Name, 0.5)],
            vec![det(PiiType::PatientId, 0.5)],
        ];
        let scores: Vec<f64> = (0..=20).map(|i| i as f64 / 20.0).collect();
        for (i, set) in sets.iter().enumerate() {
            for w in scores.windows(2) {
                assert!(classify(set, w[0]) <= classify(set, w[1]));
            }
            if let Some(next) = sets.get(i + 1) {
                for &h in &scores {
                    assert!(classify(set, h) <= classify(next, h));
                }
            }
        }
    }

    #[test]
    fn patient_id_is_at_least_medium() {
        let detections = detect_patterns("患者番号：P123456");
        assert_eq!(detections.len(), 1);
        assert!(classify(&detections, 0.0) >= RiskLevel::Medium);
    }

    #[test]
    fn action_mapping() {
        assert_eq!(select_action(RiskLevel::Critical, false), SafetyAction::Block);
        assert_eq!(select_action(RiskLevel::High, true), SafetyAction::Rewrite);
        assert_eq!(select_action(RiskLevel::Medium, true), SafetyAction::Mask);
        assert_eq!(select_action(RiskLevel::Low, true), SafetyAction::Mask);
        assert_eq!(select_action(RiskLevel::Medium, false), SafetyAction::Allow);
        assert_eq!(select_action(RiskLevel::Low, false), SafetyAction::Allow);
    }

    #[test]
    fn confidence_weighting() {
        assert!((confidence_score(&[], 0.0) - 1.0).abs() < 1e-9);
        assert!((confidence_score(&[], 1.0) - 0.4).abs() < 1e-9);
        let d = vec![det(PiiType::Name, 0.9), det(PiiType::Phone, 0.7)];
        // 0.4 * 0.8 + 0.6 * 0.5
        assert!((confidence_score(&d, 0.5) - 0.62).abs() < 1e-9);
    }
}
