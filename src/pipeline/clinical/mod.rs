//! Clinical case model and backend-assisted encounter support.

pub mod types;
pub mod prompt;
pub mod assistant;

pub use types::*;
pub use assistant::ClinicalAssistant;
pub use prompt::render_case;
