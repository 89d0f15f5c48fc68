//! Strict decoding of backend replies.
//!
//! Backends are asked for a single JSON object, but replies arrive wrapped in
//! prose, fenced as ```json blocks, or not at all. Every call site decodes
//! through here into its own schema type and then runs that type's
//! `Validate` impl; any failure is a `DecodeError` the caller treats as
//! "use the fallback".

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("No JSON object found in reply")]
    NoJsonObject,

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Reply failed schema validation: {0}")]
    Invalid(String),
}

/// Post-deserialization checks for a reply schema.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Decode a reply into `T` and run its validation.
pub fn decode_validated<T>(reply: &str) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Validate,
{
    let json_str = extract_json_object(reply).ok_or(DecodeError::NoJsonObject)?;
    let value: T =
        serde_json::from_str(json_str).map_err(|e| DecodeError::JsonParsing(e.to_string()))?;
    value.validate().map_err(DecodeError::Invalid)?;
    Ok(value)
}

/// Locate the JSON object inside a reply.
///
/// Accepts a bare object, a ```json fenced block, or the outermost `{...}`
/// span of surrounding prose.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(fence_start) = trimmed.find("```json") {
        let content_start = fence_start + 7;
        if let Some(fence_len) = trimmed[content_start..].find("```") {
            let inner = trimmed[content_start..content_start + fence_len].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse an array leniently, skipping items that fail to deserialize.
pub fn parse_array_lenient<T: for<'de> Deserialize<'de>>(items: &[serde_json::Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

/// Clamp a backend-reported score into `[0, 1]`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
