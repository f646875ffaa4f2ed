use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unixsock_core::AppConfig;

mod commands;

#[derive(Parser)]
#[command(name = "unixsock")]
#[command(author, version, about = "Single-message IPC over Unix domain sockets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/unixsock/config.toml)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Socket path (overrides the config file)
    #[arg(short = 's', long = "socket", global = true)]
    socket: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a server that logs each message and replies to it
    Serve {
        /// Fixed reply text; echoes the message when omitted
        #[arg(short = 'r', long)]
        reply: Option<String>,
    },
    /// Send one message and print the reply
    Send {
        /// Message to send
        message: String,
    },
    /// Report what currently occupies the socket path
    Check {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(socket) = cli.socket {
        config.server.socket_path = socket;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Serve { reply } => commands::serve::run(&config, reply).await,
        Commands::Send { message } => commands::send::run(&config, &message).await,
        Commands::Check { json } => commands::check::run(&config, json).await,
    }
}
