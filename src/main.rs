mod cli;
mod server;

use anyhow::Result;
use chatvault::config::VaultConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatvault", version, about = "Encrypted conversation memory for chat bots")]
struct Cli {
    /// Config file (defaults to ~/.chatvault/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the memory service, reading conversation events from stdin
    Serve,
    /// List stored conversation keys
    Keys,
    /// Print the history of one conversation
    Inspect {
        /// Memory key (`42:dm`, `group:-100123`) or a bare subject id
        key: String,
    },
    /// Delete one conversation from memory
    Forget { key: String },
    /// Import a legacy memory file
    Import { file: PathBuf },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => VaultConfig::load_from(path)?,
        None => VaultConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output and event acks.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => server::serve(config).await?,
        Command::Keys => cli::keys::keys(&config)?,
        Command::Inspect { key } => cli::inspect::inspect(&config, &key)?,
        Command::Forget { key } => cli::forget::forget(&config, &key)?,
        Command::Import { file } => cli::import::import(&config, &file)?,
        Command::Stats => cli::stats::stats(&config)?,
    }

    Ok(())
}
