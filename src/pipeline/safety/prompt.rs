//! Prompts for the backend-assisted safety steps.
//!
//! Each system prompt pins the backend to one JSON shape (or plain text for
//! rewrites). Replies are still decoded strictly by the caller.

use crate::pipeline::llm::GenerationRequest;

pub const PII_SYSTEM_PROMPT: &str = "\
You are a privacy protection specialist for medical records. \
You identify personally identifiable information in clinical text and \
answer with a single JSON object and nothing else.";

pub const HALLUCINATION_SYSTEM_PROMPT: &str = "\
You are a medical AI safety reviewer who fact-checks clinical text for \
medically inaccurate or doubtful statements. Answer with a single JSON \
object and nothing else.";

pub const REWRITE_SYSTEM_PROMPT: &str = "\
You are a clinical documentation editor who rewrites medical text so it is \
safe to show. Answer with the rewritten text only.";

const MEDICAL_CONTEXT_NOTE: &str = "\
Medical context:
- Disease names and medical terms are not PII.
- Drug names and lab values are usually not PII.
- Rare diseases or unusual circumstances may still identify a person.
";

/// PII enumeration request.
pub fn build_pii_detection_request(text: &str, medical_context: bool) -> GenerationRequest {
    let context_note = if medical_context { MEDICAL_CONTEXT_NOTE } else { "" };
    let user = format!(
        "Find every piece of personally identifiable information (PII) in the text below.\n\n\
         {context_note}\n\
         Look for:\n\
         - patient names (full name, family name only, given name only)\n\
         - patient numbers and IDs\n\
         - phone numbers\n\
         - email addresses\n\
         - addresses (including postal codes)\n\
         - dates of birth\n\
         - insurance card numbers\n\
         - any other identifying information\n\n\
         <text>\n{text}\n</text>\n\n\
         Respond with this JSON shape:\n\
         {{\n\
           \"detected_pii\": [\n\
             {{\n\
               \"text\": \"exact substring from the text\",\n\
               \"start_pos\": 0,\n\
               \"end_pos\": 0,\n\
               \"type\": \"name|patient_id|phone|email|address|birth_date|insurance_number|other\",\n\
               \"confidence\": 0.0,\n\
               \"masked_text\": \"masked form of the substring\",\n\
               \"context\": \"surrounding words\",\n\
               \"reasoning\": \"why this is PII\"\n\
             }}\n\
           ],\n\
           \"analysis_summary\": \"overall assessment\"\n\
         }}"
    );
    GenerationRequest::new(PII_SYSTEM_PROMPT, user).with_limits(1000, 0.1)
}

/// Fact-check request. The text is already masked.
pub fn build_hallucination_request(text: &str) -> GenerationRequest {
    let user = format!(
        "Assess the medical accuracy of the statements in the clinical text below. \
         Point out inaccurate or doubtful information and give a risk score between 0.0 and 1.0.\n\n\
         <text>\n{text}\n</text>\n\n\
         Scoring:\n\
         - 0.0-0.3: medically accurate\n\
         - 0.4-0.6: some doubtful points\n\
         - 0.7-0.9: likely inaccurate\n\
         - 1.0: clearly wrong\n\n\
         Respond with this JSON shape:\n\
         {{\"risk_score\": 0.0, \"issues\": [\"issue 1\", \"issue 2\"], \"reasoning\": \"basis for the score\"}}"
    );
    GenerationRequest::new(HALLUCINATION_SYSTEM_PROMPT, user).with_limits(500, 0.1)
}

/// Safety rewrite request. `context` is caller metadata, rendered as JSON.
pub fn build_rewrite_request(text: &str, context: Option<&serde_json::Value>) -> GenerationRequest {
    let context_block = match context {
        Some(ctx) if !ctx.is_null() => format!("Context: {ctx}\n\n"),
        _ => String::new(),
    };
    let user = format!(
        "Rewrite the clinical text below into safer, more appropriate wording \
         while keeping it medically accurate.\n\n\
         {context_block}\
         <text>\n{text}\n</text>\n\n\
         Requirements:\n\
         - keep medical facts exactly as stated\n\
         - soften or qualify uncertain statements\n\
         - put patient safety first\n\
         - keep the original language and natural phrasing\n\
         - keep masked placeholders and asterisks as they are\n\n\
         Respond with the rewritten text only."
    );
    GenerationRequest::new(REWRITE_SYSTEM_PROMPT, user).with_limits(800, 0.2)
}
