/// `scriptgen init` command implementation
use anyhow::{bail, Context, Result};
use std::fs;

use super::ExitCode;
use crate::cli::InitArgs;
use crate::config::EXAMPLE_CONFIG;
use crate::config_discovery::CONFIG_FILE_NAME;

pub fn run(args: InitArgs) -> Result<ExitCode> {
    let directory = match args.directory {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let path = directory.join(CONFIG_FILE_NAME);

    if path.exists() && !args.force {
        bail!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        );
    }

    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create {}", directory.display()))?;
    fs::write(&path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Point [runtime] at your script interpreter (default: the script's shebang, then sh)");
    println!("  2. Generate:");
    println!("     scriptgen generate path/to/Project.csproj");

    Ok(ExitCode::Normal)
}
