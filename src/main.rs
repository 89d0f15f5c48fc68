use std::io::Read;
use std::process::ExitCode;

use ehr_safety::pipeline::ensemble::diagnose_and_screen;
use ehr_safety::{ClinicalCase, EnsembleOrchestrator, SafetyOrchestrator, Settings};

const USAGE: &str = "usage: ehr-safety <safety|ensemble|status>
  safety    read clinical text on stdin, print the SafetyResult as JSON
  ensemble  read a ClinicalCase JSON on stdin, print the screened ensemble diagnosis
  status    print the safety layer configuration";

#[tokio::main]
async fn main() -> ExitCode {
    ehr_safety::init_tracing();
    install_quiet_panic_hook();
    tracing::debug!(version = ehr_safety::config::APP_VERSION, "ehr-safety starting");

    let Some(mode) = std::env::args().nth(1) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let safety = match SafetyOrchestrator::from_settings(&settings) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Safety backend setup failed");
            return ExitCode::FAILURE;
        }
    };

    let output = match mode.as_str() {
        "status" => serde_json::to_string_pretty(&safety.status()),
        "safety" => {
            let Some(input) = read_stdin() else {
                return ExitCode::FAILURE;
            };
            let result = safety.process_medical_text(input.trim_end(), None).await;
            serde_json::to_string_pretty(&result)
        }
        "ensemble" => {
            let Some(input) = read_stdin() else {
                return ExitCode::FAILURE;
            };
            let case: ClinicalCase = match serde_json::from_str(&input) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("invalid clinical case JSON: {e}");
                    return ExitCode::from(2);
                }
            };
            let ensemble = match EnsembleOrchestrator::from_settings(&settings.ensemble, &settings.safety.language) {
                Ok(e) => e,
                Err(e) => {
                    tracing::error!(error = %e, "Ensemble setup failed");
                    return ExitCode::FAILURE;
                }
            };
            match diagnose_and_screen(&ensemble, &safety, &case).await {
                Ok(screened) => serde_json::to_string_pretty(&screened),
                Err(e) => {
                    tracing::error!(error = %e, "Ensemble diagnosis failed");
                    return ExitCode::FAILURE;
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match output {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Output serialization failed");
            ExitCode::FAILURE
        }
    }
}

fn read_stdin() -> Option<String> {
    let mut input = String::new();
    match std::io::stdin().read_to_string(&mut input) {
        Ok(_) => Some(input),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read stdin");
            None
        }
    }
}

/// Replace the default hook, which prints the panic message to stderr.
/// Slicing panics quote the string being sliced, which may be patient text,
/// so only the location is logged.
fn install_quiet_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(location = %location, "Panic caught, message suppressed");
    }));
}
