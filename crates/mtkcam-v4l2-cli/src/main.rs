// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod capture;
mod cycle;
mod error;
mod formats;
mod metrics;
mod simulate;
mod topology;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::process::ExitCode;

/// MTK camera V4L2 CLI - media topologies, request cycles and capture
#[derive(Parser)]
#[command(name = "mtkcam-v4l2")]
#[command(version)]
#[command(about = "MTK camera V4L2 CLI - media topologies, request cycles and capture")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=debug for more)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print entities and links of a media-device configuration
    Topology(topology::Args),

    /// Print the pixel format and color profile tables
    Formats(formats::Args),

    /// Run request cycles against the simulated backend
    Simulate(simulate::Args),

    /// Capture frames from the ISP hardware
    Capture(capture::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Topology(args) => topology::execute(args, cli.json),
        Commands::Formats(args) => formats::execute(args, cli.json),
        Commands::Simulate(args) => simulate::execute(args, cli.json),
        Commands::Capture(args) => capture::execute(args, cli.json),
    };

    result_to_exit_code(result)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("Logging initialized");
}
