use std::sync::LazyLock;

use regex::Regex;

use super::masking::standard_mask;
use super::types::{PiiDetection, PiiType};

/// Characters of surrounding text kept on each side of a match.
pub const CONTEXT_WINDOW_CHARS: usize = 20;

const PATTERN_REASONING: &str = "Rule-based pattern match";

/// A compiled rule with the PII type it reports.
struct PiiRule {
    pii_type: PiiType,
    regex: Regex,
}

/// Rule table, scanned in this order. Each rule reports every
/// non-overlapping occurrence independently of the others.
static PII_RULES: LazyLock<Vec<PiiRule>> = LazyLock::new(|| {
    vec![
        rule(PiiType::PatientId, r"患者番号[：:\s]*([0-9A-Za-z\-]{6,20})"),
        rule(
            PiiType::Phone,
            r"(0[0-9]{1,4}-[0-9]{1,4}-[0-9]{3,4}|0[0-9]{9,11})",
        ),
        rule(
            PiiType::Email,
            r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
        ),
        rule(PiiType::Address, r"〒?[0-9]{3}-?[0-9]{4}.+?(市|区|町|村)"),
        rule(
            PiiType::Name,
            r"(田中|佐藤|高橋|山田|渡辺|伊藤|中村|小林|山本|加藤)[　\s]*[一二三四五六七八九十太郎次郎花子美子愛子][一二三四五六七八九十郎子美愛]*",
        ),
        rule(PiiType::BirthDate, r"(19|20)[0-9]{2}年[0-9]{1,2}月[0-9]{1,2}日"),
        rule(PiiType::InsuranceNumber, r"保険証番号[：:\s]*[0-9]{8,10}"),
    ]
});

fn rule(pii_type: PiiType, regex_str: &str) -> PiiRule {
    PiiRule {
        pii_type,
        regex: Regex::new(regex_str).expect("Invalid PII regex pattern"),
    }
}

/// Scan text with the rule table.
///
/// Pure and total: never fails, same input gives the same output.
/// Different rule types may report overlapping spans.
pub fn detect_patterns(text: &str) -> Vec<PiiDetection> {
    let mut detections = Vec::new();

    for rule in PII_RULES.iter() {
        for m in rule.regex.find_iter(text) {
            let value = m.as_str();
            let confidence = if value.chars().count() > 5 { 0.9 } else { 0.7 };
            detections.push(PiiDetection {
                text: value.to_string(),
                start_pos: m.start(),
                end_pos: m.end(),
                pii_type: rule.pii_type,
                confidence,
                masked_text: standard_mask(value, rule.pii_type),
                context: context_window(text, m.start(), m.end(), CONTEXT_WINDOW_CHARS),
                reasoning: PATTERN_REASONING.to_string(),
            });
        }
    }

    detections
}

/// Text around `start..end`, extended by up to `chars` characters each side.
pub fn context_window(text: &str, start: usize, end: usize, chars: usize) -> String {
    let before = text[..start]
        .char_indices()
        .rev()
        .nth(chars.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let after = text[end..]
        .char_indices()
        .nth(chars)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[before..after].to_string()
}
