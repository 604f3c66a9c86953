use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use eiken_rag::commands::{ask, chat, ingest, list_namespaces, show_status};
use eiken_rag::config::{Config, get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "eiken-rag")]
#[command(about = "Retrieval-augmented answers over Eiken study material")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure models, vector store and ingestion settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed CSV rows and store them in the vector index
    Ingest {
        /// CSV files to ingest; defaults to the sources in the config file
        files: Vec<PathBuf>,
        /// Exam level of the given files, e.g. 5級 or pre2
        #[arg(long)]
        level: Option<String>,
        /// Study mode of the given files, e.g. 語彙 or vocab
        #[arg(long)]
        mode: Option<String>,
    },
    /// Answer one question
    Ask {
        #[arg(long)]
        level: String,
        #[arg(long)]
        mode: String,
        query: String,
    },
    /// Interactive question session
    Chat,
    /// List the level/mode partitions
    Namespaces,
    /// Show how many entries each partition holds
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Namespaces = cli.command {
        list_namespaces();
        return Ok(ExitCode::SUCCESS);
    }

    let config_dir = get_config_dir()?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load(&config_dir)?);
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest { files, level, mode } => {
            ingest(&Config::load(&config_dir)?, files, level, mode).await?;
        }
        Commands::Ask { level, mode, query } => {
            if !ask(&Config::load(&config_dir)?, &level, &mode, &query).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Chat => {
            chat(&Config::load(&config_dir)?).await?;
        }
        Commands::Status => {
            show_status(&Config::load(&config_dir)?).await?;
        }
        Commands::Namespaces => list_namespaces(),
    }

    Ok(ExitCode::SUCCESS)
}
