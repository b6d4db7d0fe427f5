//! The `check-config` command.

use std::path::Path;

use anyhow::{Context, Result, bail};

use eventing_config::{ConfigLoader, ConfigValidator};

pub(crate) fn handle_check_config(path: &Path) -> Result<()> {
    let config =
        ConfigLoader::load(path).with_context(|| format!("loading {}", path.display()))?;
    let result = ConfigValidator::validate(&config)?;

    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &result.errors {
        println!("error: {}", error);
    }

    if !result.is_valid() {
        bail!("{} has {} error(s)", path.display(), result.errors.len());
    }
    println!(
        "{} is valid ({} queue(s), {} warning(s))",
        path.display(),
        config.queues.len(),
        result.warnings.len()
    );
    Ok(())
}
