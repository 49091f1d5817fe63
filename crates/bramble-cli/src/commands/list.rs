//! `bramble list`.

use bramble_core::Config;
use miette::Result;

pub fn run(config: &Config) -> Result<()> {
    let packages = bramble_core::list(config);
    if packages.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    for pkg in &packages {
        let indent = "  ".repeat(pkg.depth);
        println!("{indent}{}@{}", pkg.name, pkg.version);
    }
    println!("{} packages", packages.len());
    Ok(())
}
