/// `scriptgen extract` command implementation
///
/// Shows how a class file is split into standalone units when a script loads it.
use anyhow::{Context, Result};

use super::ExitCode;
use crate::cli::ExtractArgs;
use crate::paths::absolutize;
use crate::resolver::ClassFileRewriter;

pub fn run(args: ExtractArgs) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let file = absolutize(&args.file, &cwd);
    let extraction = ClassFileRewriter::default().extract_compilation_unit(&file);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&extraction)?);
    } else if extraction.is_success() {
        for unit in &extraction.compilation_units {
            match &unit.namespace {
                Some(namespace) => println!("// {} ({})", unit.type_name, namespace),
                None => println!("// {}", unit.type_name),
            }
            println!("{}", unit.text);
        }
        println!("// namespaces: {}", extraction.namespaces.join(", "));
    }

    for error in &extraction.errors {
        eprintln!("{}: error: {}", file.display(), error);
    }

    Ok(if extraction.is_success() {
        ExitCode::Normal
    } else {
        ExitCode::EvaluationError
    })
}
