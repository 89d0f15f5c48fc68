//! Multi-model ensemble diagnosis.
//!
//! One clinical case goes to a roster of independent models in parallel;
//! the valid replies are reconciled by a synthesis call with a consensus
//! level, or by the deterministic best-member fallback.

pub mod types;
pub mod prompt;
pub mod synthesis;
pub mod orchestrator;
pub mod screen;

pub use types::*;
pub use orchestrator::EnsembleOrchestrator;
pub use screen::{diagnose_and_screen, ScreenedDiagnosis};
pub use synthesis::{best_result, SynthesisEngine};
