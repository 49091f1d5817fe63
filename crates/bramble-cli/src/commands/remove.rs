//! `bramble remove`.

use super::{print_outcome, report_progress, runtime};
use bramble_core::Config;
use miette::{miette, Result};
use tracing::info;

pub fn run(config: &Config, names: &[String]) -> Result<()> {
    info!(cwd = %config.cwd.display(), count = names.len(), "remove");

    let runtime = runtime()?;
    let outcome = runtime
        .block_on(bramble_core::remove(config, names, &report_progress))
        .map_err(|e| miette!("{e}"))?;

    print_outcome(&outcome);
    Ok(())
}
