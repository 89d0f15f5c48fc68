use crate::pipeline::clinical::prompt::{ACCURACY_RULES, DIAGNOSIS_JSON_SHAPE};
use crate::pipeline::clinical::{render_case, ClinicalCase};
use crate::pipeline::llm::GenerationRequest;

use super::types::DiagnosisResult;

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You are a senior specialist who reconciles the output of several clinical \
AI systems into the most medically sound final judgment.
Principles:
- Findings shared by several models are more reliable.
- Resolve contradictions on medical evidence.
- Do not drop an important finding raised by only one model.
- Patient safety comes first.
- State uncertainty explicitly.
Answer with a single JSON object and nothing else.";

const SYNTHESIS_JSON_SHAPE: &str = r#"{
  "final_summary": "reconciled summary of the patient's situation",
  "final_key_findings": ["finding 1", "finding 2"],
  "final_differential_diagnoses": [
    {
      "diagnosis": "final candidate 1",
      "probability": 0.8,
      "supporting_evidence": ["evidence 1", "evidence 2"],
      "additional_tests": ["test 1"],
      "model_agreement": ["model A", "model B"]
    }
  ],
  "final_risk_factors": ["risk 1"],
  "final_recommendations": ["recommendation 1", "recommendation 2"],
  "final_confidence_score": 0.85,
  "synthesis_reasoning": "how the models were weighed and why",
  "consensus_level": 0.8
}"#;

/// System prompt sent unchanged to every roster member.
pub fn diagnosis_system_prompt() -> String {
    format!(
        "You are an experienced clinician. Organize the patient's current situation \
         accurately and support sound medical judgment.\n\n\
         Analyze the information carefully and answer with a single JSON object of this shape:\n\
         {DIAGNOSIS_JSON_SHAPE}\n\n{ACCURACY_RULES}"
    )
}

/// Per-member diagnosis request. 2000 tokens, temperature 0.3.
pub fn build_diagnosis_request(case: &ClinicalCase) -> GenerationRequest {
    let user = format!(
        "Organize the current medical situation of the patient below and support clinical judgment.\n\n{}",
        render_case(case)
    );
    GenerationRequest::new(diagnosis_system_prompt(), user).with_limits(2000, 0.3)
}

fn render_result(index: usize, result: &DiagnosisResult) -> String {
    let body = serde_json::to_string_pretty(result).unwrap_or_default();
    format!(
        "=== Model {index}: {name} (confidence {confidence}) ===\n{body}\n",
        name = result.model_name,
        confidence = result.confidence_score,
    )
}

/// Reconciliation request over every individual result. 2500 tokens,
/// temperature 0.2.
pub fn build_synthesis_request(results: &[DiagnosisResult], case: &ClinicalCase) -> GenerationRequest {
    let rendered: String = results
        .iter()
        .enumerate()
        .map(|(i, r)| render_result(i + 1, r))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "Below are the analyses of {count} independent clinical AI models for the same patient. \
         Reconcile them into the most medically sound final diagnosis.\n\n\
         [Original case]\n{case}\n\
         [Model results]\n{rendered}\n\
         Tasks:\n\
         1. Critically evaluate each model's result.\n\
         2. Focus on findings and diagnoses the models share.\n\
         3. Resolve disagreements on medical evidence.\n\
         4. Produce the single most reliable final diagnosis.\n\
         5. Rate inter-model agreement as consensus_level between 0.0 and 1.0.\n\n\
         Answer with this JSON shape:\n{SYNTHESIS_JSON_SHAPE}",
        count = results.len(),
        case = render_case(case),
    );
    GenerationRequest::new(SYNTHESIS_SYSTEM_PROMPT, user).with_limits(2500, 0.2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(model: &str, summary: &str) -> DiagnosisResult {
        DiagnosisResult {
            model_name: model.into(),
            summary: summary.into(),
            key_findings: vec![],
            differential_diagnoses: vec![],
            risk_factors: vec![],
            recommendations: vec![],
            confidence_score: 0.7,
            reasoning: "r".into(),
        }
    }

    #[test]
    fn diagnosis_request_is_identical_for_every_member() {
        let case = ClinicalCase::default();
        let a = build_diagnosis_request(&case);
        let b = build_diagnosis_request(&case);
        assert_eq!(a, b);
        assert_eq!((a.max_output_tokens, a.temperature), (2000, 0.3));
    }

    #[test]
    fn synthesis_request_embeds_every_result() {
        let results = vec![result("llama3.1-8b", "肺炎疑い"), result("llama-3.3-70b", "気管支炎疑い")];
        let req = build_synthesis_request(&results, &ClinicalCase::default());
        assert!(req.user_prompt.contains("=== Model 1: llama3.1-8b"));
        assert!(req.user_prompt.contains("=== Model 2: llama-3.3-70b"));
        assert!(req.user_prompt.contains("気管支炎疑い"));
        assert_eq!((req.max_output_tokens, req.temperature), (2500, 0.2));
    }
}
