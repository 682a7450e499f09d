// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Gauntlet entry point: flags, signal handling, and the run loop.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gauntlet::arbitrator::format_patch_result;
use gauntlet::{Config, Orchestrator};

/// Race AI coding agents and let the tests pick the winning patch.
#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Task prompt for the agents
    #[arg(short, long)]
    prompt: String,

    /// Path to the git repository
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    gauntlet::telemetry::init(cli.verbose);

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error loading configuration:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let repo = match cli.repo.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            eprintln!(
                "{} {}: {}",
                "error resolving repository path".red(),
                cli.repo.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C cancels the whole run; every subprocess hangs off this
    // token and shuts down with it.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nreceived interrupt, shutting down...");
            signal_token.cancel();
        }
    });

    let orchestrator = Orchestrator::new(config, repo);
    match orchestrator.run(cancel, &cli.prompt).await {
        Ok(winner) => {
            info!(agent_id = %winner.agent_id, score = winner.score, "run complete");
            println!("\n{}", "=== Best Patch Selected ===".green().bold());
            print!("{}", format_patch_result(&winner));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            ExitCode::FAILURE
        }
    }
}
