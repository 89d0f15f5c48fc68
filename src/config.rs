//! Immutable settings for the safety layer and the ensemble pipeline.
//!
//! Settings are built once (from defaults, builders, or the environment) and
//! handed to service constructors. Nothing here is read lazily at call time.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::safety::types::MaskingLevel;

/// Application-level constants
pub const APP_NAME: &str = "ehr-safety";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Azure OpenAI API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";
/// Default Azure OpenAI deployment used by the safety layer.
pub const DEFAULT_AZURE_DEPLOYMENT: &str = "gpt-4.1-mini";
/// OpenAI-compatible endpoint used for the ensemble roster.
pub const CEREBRAS_BASE_URL: &str = "https://api.cerebras.ai/v1";
/// Default ensemble roster.
pub const DEFAULT_ENSEMBLE_MODELS: &[&str] = &["llama3.1-8b", "llama3.1-70b", "llama-3.3-70b"];
/// Default model used to reconcile ensemble members.
pub const DEFAULT_SYNTHESIS_MODEL: &str = "llama3.1-70b";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "ehr_safety=info"
}

/// Conventional directory for JSONL audit logs (`~/.ehr-safety/audit`).
pub fn default_audit_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(format!(".{APP_NAME}")).join("audit"))
}

/// File name used when the audit log is placed in `default_audit_dir()`.
pub const DEFAULT_AUDIT_FILE: &str = "safety-audit.jsonl";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// Local Ollama `/api/generate`.
    Ollama,
    /// OpenAI-compatible `/chat/completions` with bearer auth (OpenAI, Cerebras, vLLM).
    OpenAi,
    /// Azure OpenAI deployment endpoint with `api-key` header.
    AzureOpenAi { api_version: String },
}

/// Connection details for one text-generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub base_url: String,
    /// Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Model name, or deployment name for Azure.
    pub model: String,
}

impl BackendSettings {
    pub fn ollama(base_url: &str, model: &str) -> Self {
        Self {
            kind: BackendKind::Ollama,
            base_url: base_url.to_string(),
            api_key: None,
            model: model.to_string(),
        }
    }

    pub fn open_ai(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            kind: BackendKind::OpenAi,
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()),
            model: model.to_string(),
        }
    }

    pub fn azure(endpoint: &str, api_key: &str, deployment: &str, api_version: &str) -> Self {
        Self {
            kind: BackendKind::AzureOpenAi {
                api_version: api_version.to_string(),
            },
            base_url: endpoint.to_string(),
            api_key: Some(api_key.to_string()),
            model: deployment.to_string(),
        }
    }

    /// Same connection, different model (used to build the ensemble roster).
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

/// Safety layer policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySettings {
    /// Hallucination scores at or above this are reported as an issue.
    pub hallucination_threshold: f64,
    /// Apply the backend rewrite for REWRITE decisions.
    pub enable_auto_rewrite: bool,
    /// Ask the backend for contextual PII detection before the rule matcher.
    pub use_contextual_detection: bool,
    /// Masking level applied to every processed text.
    pub masking_level: MaskingLevel,
    /// Keep birth dates verbatim at `minimal` level (clinically necessary).
    pub preserve_birth_date_minimal: bool,
    /// Language for markers and placeholders ("ja", "en").
    pub language: String,
    /// Per-call deadline for every backend request.
    #[serde(with = "duration_secs")]
    pub backend_timeout: Duration,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            hallucination_threshold: 0.7,
            enable_auto_rewrite: true,
            use_contextual_detection: true,
            masking_level: MaskingLevel::Standard,
            preserve_birth_date_minimal: true,
            language: "ja".to_string(),
            backend_timeout: Duration::from_secs(30),
        }
    }
}

/// Ensemble roster and synthesis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSettings {
    pub backend: Option<BackendSettings>,
    pub roster: Vec<String>,
    pub synthesis_model: String,
    /// Mask free-text case fields before they leave the process.
    pub mask_case_pii: bool,
    #[serde(with = "duration_secs")]
    pub member_timeout: Duration,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            backend: None,
            roster: DEFAULT_ENSEMBLE_MODELS.iter().map(|m| m.to_string()).collect(),
            synthesis_model: DEFAULT_SYNTHESIS_MODEL.to_string(),
            mask_case_pii: true,
            member_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Append audit records as JSON Lines here, in addition to the log line.
    pub jsonl_path: Option<PathBuf>,
}

/// Top-level settings object passed to constructors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub safety: SafetySettings,
    pub safety_backend: Option<BackendSettings>,
    pub ensemble: EnsembleSettings,
    pub audit: AuditSettings,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl Settings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup (tests, config files).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty() && v != "your-api-key-here");

        let mut settings = Settings::default();

        // Safety backend: Azure OpenAI takes precedence, then a local Ollama.
        settings.safety_backend = match (get("AZURE_OPENAI_ENDPOINT"), get("AZURE_OPENAI_KEY")) {
            (Some(endpoint), Some(key)) => Some(BackendSettings::azure(
                &endpoint,
                &key,
                &get("AZURE_OPENAI_DEPLOYMENT_NAME").unwrap_or_else(|| DEFAULT_AZURE_DEPLOYMENT.into()),
                &get("AZURE_OPENAI_VERSION").unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.into()),
            )),
            _ => match (get("EHR_SAFETY_OLLAMA_URL"), get("EHR_SAFETY_OLLAMA_MODEL")) {
                (Some(url), Some(model)) => Some(BackendSettings::ollama(&url, &model)),
                _ => None,
            },
        };

        if let Some(v) = get("EHR_SAFETY_HALLUCINATION_THRESHOLD") {
            settings.safety.hallucination_threshold = parse_unit_interval("EHR_SAFETY_HALLUCINATION_THRESHOLD", &v)?;
        }
        if let Some(v) = get("EHR_SAFETY_AUTO_REWRITE") {
            settings.safety.enable_auto_rewrite = parse_bool("EHR_SAFETY_AUTO_REWRITE", &v)?;
        }
        if let Some(v) = get("EHR_SAFETY_CONTEXTUAL_PII") {
            settings.safety.use_contextual_detection = parse_bool("EHR_SAFETY_CONTEXTUAL_PII", &v)?;
        }
        if let Some(v) = get("EHR_SAFETY_MASKING_LEVEL") {
            settings.safety.masking_level = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "EHR_SAFETY_MASKING_LEVEL".into(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("EHR_SAFETY_LANGUAGE") {
            settings.safety.language = v;
        }
        if let Some(v) = get("EHR_SAFETY_BACKEND_TIMEOUT_SECS") {
            settings.safety.backend_timeout = parse_secs("EHR_SAFETY_BACKEND_TIMEOUT_SECS", &v)?;
        }

        if let Some(key) = get("CEREBRAS_API_KEY") {
            settings.ensemble.backend = Some(BackendSettings::open_ai(
                CEREBRAS_BASE_URL,
                &key,
                DEFAULT_SYNTHESIS_MODEL,
            ));
        }
        if let Some(v) = get("EHR_SAFETY_ENSEMBLE_MODELS") {
            let roster: Vec<String> = v
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if roster.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "EHR_SAFETY_ENSEMBLE_MODELS".into(),
                    value: v,
                });
            }
            settings.ensemble.roster = roster;
        }
        if let Some(v) = get("EHR_SAFETY_SYNTHESIS_MODEL") {
            settings.ensemble.synthesis_model = v;
        }
        if let Some(v) = get("EHR_SAFETY_MASK_CASE_PII") {
            settings.ensemble.mask_case_pii = parse_bool("EHR_SAFETY_MASK_CASE_PII", &v)?;
        }
        if let Some(v) = get("EHR_SAFETY_MEMBER_TIMEOUT_SECS") {
            settings.ensemble.member_timeout = parse_secs("EHR_SAFETY_MEMBER_TIMEOUT_SECS", &v)?;
        }

        // "default" puts the log under the home directory.
        settings.audit.jsonl_path = match get("EHR_SAFETY_AUDIT_LOG") {
            Some(v) if v == "default" => default_audit_dir().map(|dir| dir.join(DEFAULT_AUDIT_FILE)),
            Some(v) => Some(PathBuf::from(v)),
            None => None,
        };

        Ok(settings)
    }

    pub fn with_safety_backend(mut self, backend: BackendSettings) -> Self {
        self.safety_backend = Some(backend);
        self
    }

    pub fn with_ensemble_backend(mut self, backend: BackendSettings) -> Self {
        self.ensemble.backend = Some(backend);
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_unit_interval(key: &str, value: &str) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(v) if (0.0..=1.0).contains(&v) => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Serialize durations as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
