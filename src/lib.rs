pub mod config;
pub mod pipeline;

#[cfg(test)]
mod phi_audit; // Static scan: no clinical text in tracing calls

pub use config::Settings;
pub use pipeline::clinical::{ClinicalAssistant, ClinicalCase};
pub use pipeline::ensemble::{diagnose_and_screen, EnsembleDiagnosisResult, EnsembleOrchestrator};
pub use pipeline::safety::{SafetyOrchestrator, SafetyResult};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// Honors `RUST_LOG`, falling back to `config::default_log_filter()`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
