//! VoxChat CLI — the main entry point.
//!
//! Commands:
//! - `onboard`     — Write the default config
//! - `chat`        — Talk to a character, interactively or one message at a time
//! - `gateway`     — Start the HTTP API server
//! - `history`     — Print a conversation
//! - `characters`  — List characters
//! - `status`      — Show configuration status; `--check` probes the LLM backend

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "voxchat",
    about = "VoxChat — voice role-play chat with AI characters",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of ~/.voxchat/config.toml
    #[arg(short, long, global = true, env = "VOXCHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Onboard,

    /// Chat with a character
    Chat {
        /// Character id
        #[arg(short = 'C', long, default_value = "1")]
        character: String,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an anonymous conversation
        #[arg(short, long)]
        session: Option<String>,

        /// Bearer token from the [auth] table; chats as that user
        #[arg(short, long, env = "VOXCHAT_TOKEN")]
        token: Option<String>,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the turns of a conversation
    History {
        /// Character id
        #[arg(short = 'C', long)]
        character: String,

        /// Anonymous session token
        #[arg(short, long)]
        session: Option<String>,

        /// Bearer token from the [auth] table
        #[arg(short, long, env = "VOXCHAT_TOKEN")]
        token: Option<String>,
    },

    /// List characters
    Characters {
        /// Case-insensitive name filter
        #[arg(short, long)]
        search: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },

    /// Show configuration status
    Status {
        /// Also probe the LLM backend
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Onboard => commands::onboard::run(config_path).await?,
        Commands::Chat {
            character,
            message,
            session,
            token,
        } => {
            let config = commands::load_config(config_path)?;
            commands::chat::run(config, character, message, session, token).await?
        }
        Commands::Gateway { port } => {
            let config = commands::load_config(config_path)?;
            commands::gateway::run(config, port).await?
        }
        Commands::History {
            character,
            session,
            token,
        } => {
            let config = commands::load_config(config_path)?;
            commands::history::run(config, character, session, token).await?
        }
        Commands::Characters {
            search,
            page,
            page_size,
        } => {
            let config = commands::load_config(config_path)?;
            commands::characters::run(config, search, page, page_size).await?
        }
        Commands::Status { check } => commands::status::run(config_path, check).await?,
    }

    Ok(())
}
