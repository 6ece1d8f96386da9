mod cli;

use std::path::PathBuf;

use anyhow::Result;
use apex::config::ApexConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apex", version, about = "Personal assistant with long-term memory")]
struct Cli {
    /// Config file (default: ~/.apex/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat on stdin/stdout
    Chat {
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Send one message and print the reply
    Ask {
        message: String,
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Search stored facts
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete a stored fact
    Forget { fact_id: String },
    /// Show conversation history
    History {
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Keyword search across all conversations instead
        #[arg(long)]
        search: Option<String>,
        /// List conversations with their turn counts
        #[arg(long)]
        list: bool,
    },
    /// Show store statistics
    Stats,
    /// Run database diagnostics
    Doctor,
    /// Re-embed facts created with a different embedding model
    ReEmbed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ApexConfig::load_from(path)?,
        None => ApexConfig::load()?,
    };

    // stdout carries replies; logs go to stderr
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let default_conversation = config.server.default_conversation.clone();

    match cli.command {
        Command::Chat { conversation } => {
            let id = conversation.unwrap_or(default_conversation);
            cli::chat::chat(config, &id).await?;
        }
        Command::Ask { message, conversation } => {
            let id = conversation.unwrap_or(default_conversation);
            cli::chat::ask(config, &id, &message).await?;
        }
        Command::Search { query, limit } => {
            cli::search::search(&config, &query, limit).await?;
        }
        Command::Forget { fact_id } => {
            cli::forget::forget(&config, &fact_id).await?;
        }
        Command::History {
            conversation,
            limit,
            search,
            list,
        } => {
            let id = conversation.unwrap_or(default_conversation);
            let mode = if list {
                cli::history::HistoryMode::List
            } else if let Some(q) = search {
                cli::history::HistoryMode::Search(q)
            } else {
                cli::history::HistoryMode::Recent(id)
            };
            cli::history::history(&config, mode, limit).await?;
        }
        Command::Stats => cli::stats::stats(&config)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::ReEmbed => cli::re_embed::re_embed(&config).await?,
    }

    Ok(())
}
