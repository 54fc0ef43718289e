// Copyright 2026 Lookout Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lookout_runtime::cli;

#[derive(Parser)]
#[command(
    name = "lookout",
    about = "Lookout — budget-constrained page observation runtime",
    version,
    after_help = "Run 'lookout <command> --help' for details on each command."
)]
struct Cli {
    /// Path to the config file (defaults to ~/.lookout/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one iteration of the observation schedule
    Run {
        /// Iteration slot index (0..total_slots-1)
        #[arg(long)]
        slot: usize,
        /// Only observe variants with this name (e.g. a geography)
        #[arg(long)]
        geo: Option<String>,
        /// Write results to this JSONL file instead of the default sink
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compute and print the day's slot map
    Slots,
    /// Show the timing plan an iteration would derive
    Plan {
        /// Number of active pages in the iteration
        #[arg(long)]
        pages: usize,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("LOOKOUT_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("LOOKOUT_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("LOOKOUT_VERBOSE", "1");
    }

    let default_filter = if cli.verbose {
        "lookout_runtime=debug"
    } else {
        "lookout_runtime=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run { slot, geo, out } => {
            cli::run_cmd::run(config_path, slot, geo.as_deref(), out.as_deref()).await
        }
        Commands::Slots => cli::slots_cmd::run(config_path).await,
        Commands::Plan { pages } => cli::plan_cmd::run(config_path, pages).await,
        Commands::Doctor => cli::doctor::run(config_path).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "lookout", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_quiet() && !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    result
}
