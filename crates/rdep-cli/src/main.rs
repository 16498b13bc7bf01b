//! rdep - runtime dependency resolver CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rdep_cli::cmd;
use rdep_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries reports and the session protocol.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve {
            coords,
            overrides,
            json,
        } => cmd::resolve::resolve(&cli.session, &coords, &overrides, json).await,
        Commands::Session => cmd::session::session(&cli.session).await,
        Commands::Repos => cmd::repos::repos(&cli.session),
    }
}
