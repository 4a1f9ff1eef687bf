//! mcbridge CLI — the main entry point.
//!
//! Commands:
//! - `run`     — Start the orchestrator (default)
//! - `doctor`  — Check configuration, instruction files and commands
//! - `status`  — Show the resolved configuration
//! - `prompt`  — Print the composed system instructions
//! - `init`    — Write a configuration template
//! - `parse`   — Parse feed lines from stdin and print events as JSON

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

#[derive(Parser)]
#[command(
    name = "mcbridge",
    about = "mcbridge — keeps a reasoning engine in the loop of a live Minecraft session",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: config/agent.toml)
    #[arg(short, long, global = true, env = "MCBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log to stdout as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator
    Run,

    /// Diagnose configuration and environment
    Doctor,

    /// Show the resolved configuration
    Status,

    /// Print the system instructions sent to the engine
    Prompt {
        /// List the files that were loaded
        #[arg(long)]
        files: bool,
    },

    /// Write a configuration template
    Init,

    /// Parse server log lines from stdin and print the events as JSON lines
    Parse {
        /// Names whose chat counts as self-authored (default: from config)
        #[arg(short, long)]
        name: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    logging::init(&logging::LogOptions::resolve(
        config_path,
        cli.verbose,
        cli.log_file.clone(),
        cli.log_json,
    ))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::run(config_path).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
        Commands::Status => commands::status::run(config_path).await?,
        Commands::Prompt { files } => commands::prompt::run(config_path, files).await?,
        Commands::Init => commands::init::run(config_path).await?,
        Commands::Parse { name } => commands::parse::run(config_path, name).await?,
    }

    Ok(())
}
