//! Accepting generation requests.

mod orchestrator;
mod request;

pub use orchestrator::{SubmissionOrchestrator, SubmissionSettings, SubmitError, SubmitOutcome};
pub use request::{SubmitRequest, ValidationError};
