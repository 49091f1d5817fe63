pub mod add;
pub mod install;
pub mod list;
pub mod remove;
pub mod update;

use bramble_core::InstallOutcome;
use miette::{IntoDiagnostic, Result};
use tracing::debug;

/// Build the tokio runtime commands block on.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().into_diagnostic()
}

/// Progress hook handed to the reifier.
pub fn report_progress(phase: &str, processed: usize, total: usize) {
    debug!(phase, processed, total, "progress");
}

/// Print the shared one-line install summary.
pub fn print_outcome(outcome: &InstallOutcome) {
    if outcome.up_to_date {
        println!("up to date, {} packages", outcome.package_count);
        return;
    }
    let report = &outcome.report;
    println!(
        "added {}, updated {}, removed {} ({} packages in tree)",
        report.added, report.updated, report.removed, outcome.package_count
    );
}
