//! Medical-text safety layer.
//!
//! Detects PII (rules plus optional backend), masks it at the requested
//! level, scores hallucination risk on the masked text, classifies the
//! combined risk, applies one action and records an audit entry.

pub mod types;
pub mod patterns;
pub mod masking;
pub mod prompt;
pub mod contextual;
pub mod pii;
pub mod hallucination;
pub mod risk;
pub mod rewrite;
pub mod audit;
pub mod orchestrator;

pub use types::*;
pub use audit::{AuditRecord, AuditRecorder, AuditSink, JsonlAuditSink, MemoryAuditSink, TracingAuditSink};
pub use contextual::ContextualPiiDetector;
pub use hallucination::{HallucinationAssessment, HallucinationScorer};
pub use masking::AdaptiveMasker;
pub use orchestrator::{SafetyOrchestrator, SafetyStatus};
pub use patterns::detect_patterns;
pub use pii::{PiiReportEntry, PiiRiskReport, PiiService};
pub use rewrite::AutoRewriter;
pub use risk::{classify, confidence_score, select_action};
