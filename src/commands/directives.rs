/// `scriptgen directives` command implementation
///
/// Prints the `#load` and `#r` directives found in a script's header.
use anyhow::{Context, Result};

use super::ExitCode;
use crate::cli::DirectivesArgs;
use crate::paths::absolutize;
use crate::script::parse_directives;

pub fn run(args: DirectivesArgs) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let script = absolutize(&args.script, &cwd);
    let directives = parse_directives(&script)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&directives)?);
        return Ok(ExitCode::Normal);
    }

    if directives.is_empty() {
        eprintln!("No directives in {}", script.display());
    }
    for directive in &directives {
        println!(
            "{}:{}\t{}\t{}",
            directive.line_number + 1,
            directive.column + 1,
            directive.kind.keyword(),
            directive.reference
        );
    }

    Ok(ExitCode::Normal)
}
