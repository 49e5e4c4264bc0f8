// ABOUTME: Entry point for the kahua CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use kahua::config::{self, CONFIG_FILENAME, Config};
use kahua::error::Result;
use kahua::output::{Output, OutputMode};
use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = output_mode(&cli);
    let result = run(cli, mode).await;

    if let Err(e) = result {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

fn output_mode(cli: &Cli) -> OutputMode {
    if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    }
}

async fn run(cli: Cli, mode: OutputMode) -> Result<()> {
    let output = Output::new(mode);
    let dir = match cli.dir {
        Some(dir) => dir,
        None => env::current_dir()?,
    };

    match cli.command {
        Commands::Init { kind, force } => {
            config::init_config(&dir, &kind, force)?;
            output.success(&format!(
                "Created {}",
                dir.join(CONFIG_FILENAME).display()
            ));
            Ok(())
        }
        Commands::Check => {
            let config = Config::discover(&dir)?;
            commands::check(&config, &dir, &output)
        }
        Commands::Status => {
            let config = Config::discover(&dir)?;
            commands::status(&config, &dir, &output)
        }
        Commands::Acquire { all, wait } => {
            let config = Config::discover(&dir)?;
            commands::acquire(&config, &dir, all, wait.map(Duration::from_secs), output).await
        }
    }
}
