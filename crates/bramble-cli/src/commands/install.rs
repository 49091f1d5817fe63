//! `bramble install` / `bramble ci`.

use super::{print_outcome, report_progress, runtime};
use bramble_core::Config;
use miette::{miette, Result};
use tracing::info;

pub fn run(config: &Config, clean: bool) -> Result<()> {
    info!(cwd = %config.cwd.display(), clean, "install");

    let runtime = runtime()?;
    let outcome = runtime
        .block_on(async {
            if clean {
                bramble_core::clean_install(config, &report_progress).await
            } else {
                bramble_core::install(config, &report_progress).await
            }
        })
        .map_err(|e| miette!("{e}"))?;

    print_outcome(&outcome);
    Ok(())
}
