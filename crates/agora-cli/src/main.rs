//! Agora CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use agora_cli::cli::Cli;
use agora_cli::commands;

fn main() {
    agora_core::paths::load_env();

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = commands::execute(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
