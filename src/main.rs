use clap::Parser;

use scriptgen::cli::{Cli, Commands};
use scriptgen::commands::{self, ExitCode};
use scriptgen::logging;

#[tokio::main]
async fn main() {
    // Parse CLI arguments; clap exits with code 2 on usage errors
    let cli = Cli::parse();

    // Initialize structured logging
    logging::init(if cli.verbose { "debug" } else { "info" });

    // Dispatch to appropriate command handler
    let result = match cli.command {
        Commands::Generate(args) => commands::generate::run(args).await,
        Commands::Directives(args) => commands::directives::run(args),
        Commands::Extract(args) => commands::extract::run(args),
        Commands::Init(args) => commands::init::run(args),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::UnhandledError
        }
    };

    std::process::exit(code.code());
}
