use super::patterns::detect_patterns;
use super::types::{pii_placeholder_i18n, MaskingLevel, PiiDetection, PiiType, SafetyError};

/// Rewrites text given detected spans and a masking level.
#[derive(Debug, Clone)]
pub struct AdaptiveMasker {
    lang: String,
    preserve_birth_date_minimal: bool,
}

impl AdaptiveMasker {
    pub fn new(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
            preserve_birth_date_minimal: true,
        }
    }

    /// Keep birth dates verbatim at `minimal` level.
    pub fn with_birth_date_preserved(mut self, preserve: bool) -> Self {
        self.preserve_birth_date_minimal = preserve;
        self
    }

    /// Replacement value for one PII value at the given level.
    pub fn mask_value(&self, value: &str, pii_type: PiiType, level: MaskingLevel) -> String {
        match level {
            MaskingLevel::Minimal => match pii_type {
                PiiType::Name => match value.chars().next() {
                    Some(first) => format!("{first}***"),
                    None => "***".to_string(),
                },
                PiiType::PatientId | PiiType::Phone => {
                    let n = value.chars().count();
                    if n > 2 {
                        format!("***{}", last_chars(value, 2))
                    } else {
                        "***".to_string()
                    }
                }
                PiiType::BirthDate if self.preserve_birth_date_minimal => value.to_string(),
                _ => standard_mask(value, pii_type),
            },
            MaskingLevel::Standard => standard_mask(value, pii_type),
            MaskingLevel::Maximum => match pii_placeholder_i18n(pii_type, &self.lang) {
                Some(label) => label.to_string(),
                None => stars(value.chars().count()),
            },
        }
    }

    /// Mask every detected span in `text`.
    ///
    /// Overlapping spans are merged first; each merged span takes the type
    /// of its most severe member (longest on ties). Spans are replaced from
    /// the end of the text backwards so earlier offsets stay valid.
    pub fn mask(
        &self,
        text: &str,
        detections: &[PiiDetection],
        level: MaskingLevel,
    ) -> Result<String, SafetyError> {
        for d in detections {
            validate_span(text, d.start_pos, d.end_pos)?;
        }

        let mut masked = text.to_string();
        for span in merge_overlapping(detections).iter().rev() {
            let value = &text[span.start..span.end];
            let replacement = self.mask_value(value, span.pii_type, level);
            masked.replace_range(span.start..span.end, &replacement);
        }
        Ok(masked)
    }

    /// Detect with the rule matcher and mask in one step.
    pub fn redact(&self, text: &str, level: MaskingLevel) -> Result<String, SafetyError> {
        let detections = detect_patterns(text);
        if detections.is_empty() {
            return Ok(text.to_string());
        }
        self.mask(text, &detections, level)
    }
}

/// Category-specific partial mask used at `standard` level.
pub fn standard_mask(value: &str, pii_type: PiiType) -> String {
    let n = value.chars().count();
    match pii_type {
        PiiType::PatientId | PiiType::Phone | PiiType::Email => {
            if n > 2 {
                format!("{}{}", stars(n - 2), last_chars(value, 2))
            } else {
                stars(n)
            }
        }
        PiiType::Name => match value.chars().next() {
            Some(first) if n > 1 => format!("{first}{}", stars(n - 1)),
            _ => "*".to_string(),
        },
        _ => stars(n),
    }
}

fn stars(n: usize) -> String {
    "*".repeat(n)
}

fn last_chars(value: &str, n: usize) -> String {
    let count = value.chars().count();
    value.chars().skip(count.saturating_sub(n)).collect()
}

fn validate_span(text: &str, start: usize, end: usize) -> Result<(), SafetyError> {
    if start < end
        && end <= text.len()
        && text.is_char_boundary(start)
        && text.is_char_boundary(end)
    {
        Ok(())
    } else {
        Err(SafetyError::InvalidSpan {
            start,
            end,
            len: text.len(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MergedSpan {
    start: usize,
    end: usize,
    pii_type: PiiType,
    /// Length of the member that decided `pii_type`.
    type_len: usize,
}

/// Merge overlapping spans, ascending by start.
fn merge_overlapping(detections: &[PiiDetection]) -> Vec<MergedSpan> {
    let mut sorted: Vec<&PiiDetection> = detections.iter().collect();
    sorted.sort_by_key(|d| (d.start_pos, d.end_pos));

    let mut merged: Vec<MergedSpan> = Vec::new();
    for d in sorted {
        match merged.last_mut() {
            Some(last) if d.start_pos < last.end => {
                last.end = last.end.max(d.end_pos);
                let stronger = d.pii_type.severity() > last.pii_type.severity()
                    || (d.pii_type.severity() == last.pii_type.severity()
                        && d.span_len() > last.type_len);
                if stronger {
                    last.pii_type = d.pii_type;
                    last.type_len = d.span_len();
                }
            }
            _ => merged.push(MergedSpan {
                start: d.start_pos,
                end: d.end_pos,
                pii_type: d.pii_type,
                type_len: d.span_len(),
            }),
        }
    }
    merged
}
