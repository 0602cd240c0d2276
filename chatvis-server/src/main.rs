#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Main entry point for the Chatvis server CLI.

use chatvis_server::server;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;
use std::error::Error;
use std::path::PathBuf;

/// Main CLI structure for the Chatvis server
#[derive(Parser, Debug)]
#[command(name = "chatvis-server")]
#[command(about = "Group chat server with live fan-out and AI agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the Chatvis CLI
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind, overriding the file and environment.
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a configuration file (yaml or json).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Handles the serve command by loading configuration and starting the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved_config = Config::load_config(config, port)?;
    server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}
