//! Prompts for the clinical assistant and the ensemble diagnosis calls.

use crate::pipeline::llm::GenerationRequest;

use super::types::ClinicalCase;

pub const SITUATION_SYSTEM_PROMPT: &str = "\
You are an experienced clinician. Organize the patient's current situation \
accurately and support sound medical judgment. Answer in the language of \
the case notes.";

pub const VALIDATION_SYSTEM_PROMPT: &str = "\
You are a clinical quality-assurance specialist. Evaluate the consistency \
of clinical reasoning rigorously. Answer with a single JSON object and \
nothing else.";

pub const RECOMMENDATION_SYSTEM_PROMPT: &str = "\
You are a general medicine specialist. Answer with a short bullet list.";

/// JSON shape shared by the situation summary and per-model diagnosis.
pub const DIAGNOSIS_JSON_SHAPE: &str = r#"{
  "summary": "concise summary of the current situation (200 characters max)",
  "key_findings": ["finding 1", "finding 2", "finding 3"],
  "differential_diagnoses": [
    {
      "diagnosis": "candidate 1",
      "probability": 0.7,
      "supporting_evidence": ["evidence 1", "evidence 2"],
      "additional_tests": ["test 1", "test 2"]
    }
  ],
  "risk_factors": ["risk 1", "risk 2"],
  "recommendations": ["recommendation 1", "recommendation 2"],
  "confidence_score": 0.8,
  "reasoning": "the medical reasoning behind the assessment"
}"#;

pub const ACCURACY_RULES: &str = "\
Rules:
- Provide medically accurate information only.
- Do not guess. Write \"needs confirmation\" for anything unclear.
- If the situation is urgent, say so in recommendations.";

fn or_dash(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Render a case as the plain-text block every case prompt embeds.
pub fn render_case(case: &ClinicalCase) -> String {
    let info = &case.basic_info;
    let v = &case.vitals;

    let mut out = format!(
        "[Basic information]\n\
         Age: {age}\n\
         Gender: {gender}\n\
         Medical history: {history}\n\n\
         [Vital signs]\n\
         Temperature: {temp} °C\n\
         Blood pressure: {sys}/{dia} mmHg\n\
         Heart rate: {hr} bpm\n\
         Respiratory rate: {rr} /min\n\
         SpO2: {spo2} %\n\n\
         [Subjective]\n{subjective}\n\n\
         [Objective]\n{objective}\n",
        age = info.age.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string()),
        gender = info.gender.as_deref().unwrap_or("unknown"),
        history = info.medical_history.as_deref().unwrap_or("none reported"),
        temp = or_dash(v.temperature),
        sys = or_dash(v.blood_pressure_systolic),
        dia = or_dash(v.blood_pressure_diastolic),
        hr = or_dash(v.heart_rate),
        rr = or_dash(v.respiratory_rate),
        spo2 = or_dash(v.oxygen_saturation),
        subjective = case.subjective,
        objective = case.objective,
    );

    if !case.patient_history.is_empty() {
        let history = serde_json::to_string_pretty(&case.patient_history).unwrap_or_default();
        out.push_str("\n[Prior encounters]\n");
        out.push_str(&history);
        out.push('\n');
    }

    out
}

/// Situation summary request. 1200 tokens, temperature 0.2.
pub fn build_situation_request(case: &ClinicalCase) -> GenerationRequest {
    let user = format!(
        "Organize the current medical situation of the patient below.\n\n\
         {case}\n\
         Answer with a single JSON object of this shape:\n{DIAGNOSIS_JSON_SHAPE}\n\n\
         {ACCURACY_RULES}",
        case = render_case(case),
    );
    GenerationRequest::new(SITUATION_SYSTEM_PROMPT, user).with_limits(1200, 0.2)
}

/// Assessment-and-plan consistency request. 1000 tokens, temperature 0.1.
pub fn build_validation_request(
    summary: &str,
    assessment: &str,
    plan: &str,
    diagnosis_codes: &[String],
) -> GenerationRequest {
    let codes = if diagnosis_codes.is_empty() {
        String::new()
    } else {
        format!("Diagnosis codes: {}\n", diagnosis_codes.join(", "))
    };
    let user = format!(
        "Evaluate the consistency of the clinical information below.\n\n\
         [Situation summary]\n{summary}\n\n\
         [Assessment]\n{assessment}\n\n\
         [Plan]\n{plan}\n\n\
         {codes}\n\
         Check:\n\
         1. summary vs. assessment\n\
         2. assessment vs. plan\n\
         3. diagnosis codes vs. assessment\n\
         4. medical soundness of the plan\n\
         5. important omissions\n\n\
         Answer with this JSON shape:\n\
         {{\n\
           \"is_consistent\": true,\n\
           \"consistency_score\": 0.0,\n\
           \"inconsistencies\": [\n\
             {{\"type\": \"diagnosis_mismatch|treatment_inappropriate|missing_consideration\",\n\
              \"description\": \"...\", \"severity\": \"low|medium|high|critical\",\n\
              \"location\": \"assessment|plan|diagnosis_code\"}}\n\
           ],\n\
           \"suggestions\": [\"...\"],\n\
           \"missing_elements\": [\"...\"],\n\
           \"validation_summary\": \"...\"\n\
         }}\n\n\
         Ignore minor wording differences. Always report inconsistencies that affect patient safety."
    );
    GenerationRequest::new(VALIDATION_SYSTEM_PROMPT, user).with_limits(1000, 0.1)
}

/// Treatment recommendation request. 800 tokens, temperature 0.3.
pub fn build_recommendation_request(patient_data: &serde_json::Value, diagnosis: &str) -> GenerationRequest {
    let data = serde_json::to_string_pretty(patient_data).unwrap_or_default();
    let user = format!(
        "Suggest a treatment approach and precautions for the patient and diagnosis below.\n\n\
         [Patient]\n{data}\n\n\
         [Diagnosis]\n{diagnosis}\n\n\
         Cover: treatment approach, tests and monitoring, patient education, \
         follow-up plan, complications to watch for.\n\
         Answer as a concise bullet list, one item per line."
    );
    GenerationRequest::new(RECOMMENDATION_SYSTEM_PROMPT, user).with_limits(800, 0.3)
}
