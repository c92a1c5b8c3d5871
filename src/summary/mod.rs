//! Outcomes, failure taxonomy and the run summary printed by the CLI

mod failure;
mod instance;
mod run_summary;

pub use failure::{ExitCode, FailureKind, OutcomeAggregator, RunOutcome};
pub use instance::InstanceOutcome;
pub use run_summary::{RunSummary, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION};
