//! `bramble add`.

use super::{print_outcome, report_progress, runtime};
use bramble_core::Config;
use miette::{miette, Result};
use tracing::info;

pub fn run(config: &Config, specs: &[String]) -> Result<()> {
    info!(cwd = %config.cwd.display(), count = specs.len(), "add");

    let runtime = runtime()?;
    let outcome = runtime
        .block_on(bramble_core::add(config, specs, &report_progress))
        .map_err(|e| miette!("{e}"))?;

    print_outcome(&outcome);
    Ok(())
}
