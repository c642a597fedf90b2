//! # chat-cli
//!
//! CLI tool for exercising the Talk2Me chat sync layer.
//!
//! Every run starts from a freshly seeded in-memory ledger, so commands show
//! the session's behavior end to end without a chain or a wallet.
//!
//! ## Commands
//!
//! - `init`: Bring a session up (join, messages, room list)
//! - `send`: Broadcast a message to the global room
//! - `register`: Register an identity with a profile image
//! - `network`: Check and repair the wallet's network
//!
//! ## Example
//!
//! ```bash
//! # Initialize as a newcomer (joins the global room)
//! chat-cli init
//!
//! # Broadcast
//! chat-cli send "gm everyone"
//!
//! # Register with a profile picture
//! chat-cli register --name alice --image avatar.png
//!
//! # Wallet on Ethereum mainnet, switch to the target chain
//! chat-cli network --current-chain 1
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use talk2me_chat_types::Address;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{init, network, register, send};

/// CLI tool for exercising the Talk2Me chat sync layer.
#[derive(Parser, Debug)]
#[command(name = "chat-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Session configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Account acting in the session
    #[arg(long, global = true, default_value = "0x00000000000000000000000000000000000a11ce")]
    actor: Address,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a chat session
    Init,

    /// Broadcast a message to the global room
    Send {
        /// Message text
        text: String,
    },

    /// Register an identity
    Register {
        /// Name to register (the registry suffix is appended)
        #[arg(long, short)]
        name: String,

        /// Profile image file
        #[arg(long, short)]
        image: PathBuf,

        /// Short bio
        #[arg(long, default_value = "")]
        bio: String,
    },

    /// Check the wallet network and switch it if needed
    Network {
        /// Chain the wallet starts on
        #[arg(long)]
        current_chain: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    debug!(actor = %cli.actor, command = ?cli.command, "Starting chat-cli");

    match cli.command {
        Commands::Init => init::run(config, cli.actor).await?,
        Commands::Send { text } => send::run(config, cli.actor, &text).await?,
        Commands::Register { name, image, bio } => {
            register::run(config, cli.actor, &name, &image, &bio).await?
        }
        Commands::Network { current_chain } => {
            network::run(config, cli.actor, current_chain).await?
        }
    }

    Ok(())
}
