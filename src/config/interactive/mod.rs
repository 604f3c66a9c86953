
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Backend, Config, ConfigError, Credentials, OnEmbedError, OpenAiConfig, settings};
use crate::database::Metric;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Eiken RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("OpenAI").bold().yellow());
    eprintln!("Models used for embeddings and answers. The API key is read from OPENAI_API_KEY.");
    eprintln!();
    configure_openai(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Vector store").bold().yellow());
    configure_vector_store(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Ingestion and retrieval").bold().yellow());
    configure_pipeline(&mut config)?;

    eprintln!();
    match Credentials::from_env(config.vector_store.backend) {
        Ok(_) => eprintln!("{}", style("✓ Required environment variables are set").green()),
        Err(e) => {
            eprintln!("{} {}", style("⚠ Warning:").yellow(), e);
            eprintln!("Set them in the environment or a .env file before ingesting.");
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("OpenAI Settings:").bold().yellow());
    match config.openai_url() {
        Ok(url) => eprintln!("  Base URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Base URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!(
        "  Embedding Model: {} ({} dims)",
        style(&config.openai.embedding_model).cyan(),
        config.openai.embedding_dimension
    );
    eprintln!("  Chat Model: {}", style(&config.openai.chat_model).cyan());
    eprintln!(
        "  Retry Attempts: {}",
        style(config.openai.retry_attempts).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!(
        "  Backend: {}",
        style(backend_label(config.vector_store.backend)).cyan()
    );
    eprintln!("  Metric: {}", style(config.vector_store.metric).cyan());
    match config.vector_store.backend {
        Backend::Pinecone => {
            eprintln!(
                "  Control URL: {}",
                style(&config.vector_store.control_url).cyan()
            );
            eprintln!("  Cloud: {}", style(&config.vector_store.cloud).cyan());
        }
        Backend::Lancedb => eprintln!(
            "  Data Directory: {}",
            style(config.vector_database_path().display()).cyan()
        ),
    }

    eprintln!();
    eprintln!("{}", style("Pipeline:").bold().yellow());
    eprintln!("  Batch Size: {}", style(config.ingest.batch_size).cyan());
    eprintln!(
        "  On Embed Error: {}",
        style(on_embed_error_label(config.ingest.on_embed_error)).cyan()
    );
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    for source in &config.ingest.sources {
        eprintln!(
            "  Source: {} -> {} / {}",
            style(source.path.display()).cyan(),
            source.level,
            source.mode
        );
    }

    eprintln!();
    eprintln!("{}", style("Environment:").bold().yellow());
    for name in [
        settings::OPENAI_API_KEY_VAR,
        settings::PINECONE_INDEX_VAR,
        settings::PINECONE_API_KEY_VAR,
        settings::PINECONE_ENV_VAR,
    ] {
        eprintln!("  {}: {}", name, env_status(name));
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

fn load_existing_config(config_dir: &Path) -> Config {
    match Config::load(config_dir) {
        Ok(config) => {
            if config.config_file_path().exists() {
                eprintln!("{}", style("Found existing configuration.").green());
            } else {
                eprintln!(
                    "{}",
                    style("No existing configuration found. Using defaults.").yellow()
                );
            }
            config
        }
        Err(e) => {
            eprintln!(
                "{} {:#}",
                style("Existing configuration is invalid, starting from defaults:").yellow(),
                e
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        }
    }
}

fn configure_openai(config: &mut Config) -> Result<()> {
    let openai = &mut config.openai;

    let base_url: String = Input::new()
        .with_prompt("OpenAI base URL")
        .default(openai.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OpenAiConfig::default().set_base_url(input.clone())
        })
        .interact_text()?;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(openai.embedding_model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(openai.chat_model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let retry_attempts: u32 = Input::new()
        .with_prompt("Attempts per OpenAI request")
        .default(openai.retry_attempts)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=10).contains(input) {
                Ok(())
            } else {
                Err("Attempts must be between 1 and 10")
            }
        })
        .interact_text()?;

    openai.set_base_url(base_url)?;
    openai.set_embedding_model(embedding_model)?;
    openai.set_chat_model(chat_model)?;
    openai.set_retry_attempts(retry_attempts)?;

    Ok(())
}

fn configure_vector_store(config: &mut Config) -> Result<()> {
    let backends = [Backend::Pinecone, Backend::Lancedb];
    let labels: Vec<&str> = backends.iter().map(|b| backend_label(*b)).collect();
    let default_index = backends
        .iter()
        .position(|b| *b == config.vector_store.backend)
        .unwrap_or(0);

    let backend_index = Select::new()
        .with_prompt("Vector store backend")
        .default(default_index)
        .items(&labels)
        .interact()?;
    config.vector_store.backend = backends[backend_index];

    let metrics = [Metric::Cosine, Metric::Euclidean, Metric::DotProduct];
    let metric_labels: Vec<&str> = metrics.iter().map(|m| m.as_str()).collect();
    let default_metric = metrics
        .iter()
        .position(|m| *m == config.vector_store.metric)
        .unwrap_or(0);

    let metric_index = Select::new()
        .with_prompt("Similarity metric (used when the index is created)")
        .default(default_metric)
        .items(&metric_labels)
        .interact()?;
    config.vector_store.metric = metrics[metric_index];

    if config.vector_store.backend == Backend::Pinecone {
        let cloud: String = Input::new()
            .with_prompt("Serverless cloud for new indexes")
            .default(config.vector_store.cloud.clone())
            .validate_with(|input: &String| -> Result<(), &str> {
                if input.trim().is_empty() {
                    Err("Cloud cannot be empty")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;
        config.vector_store.cloud = cloud;
    }

    Ok(())
}

fn configure_pipeline(config: &mut Config) -> Result<()> {
    let batch_size: usize = Input::new()
        .with_prompt("Upsert batch size")
        .default(config.ingest.batch_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let policies = [OnEmbedError::Abort, OnEmbedError::Skip];
    let labels: Vec<&str> = policies.iter().map(|p| on_embed_error_label(*p)).collect();
    let default_policy = policies
        .iter()
        .position(|p| *p == config.ingest.on_embed_error)
        .unwrap_or(0);
    let policy_index = Select::new()
        .with_prompt("When a row cannot be embedded")
        .default(default_policy)
        .items(&labels)
        .interact()?;

    let top_k: usize = Input::new()
        .with_prompt("Passages retrieved per question")
        .default(config.retrieval.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=100).contains(input) {
                Ok(())
            } else {
                Err("top_k must be between 1 and 100")
            }
        })
        .interact_text()?;

    config.ingest.set_batch_size(batch_size)?;
    config.ingest.on_embed_error = policies[policy_index];
    config.retrieval.set_top_k(top_k)?;

    Ok(())
}

fn backend_label(backend: Backend) -> &'static str {
    match backend {
        Backend::Pinecone => "pinecone",
        Backend::Lancedb => "lancedb",
    }
}

fn on_embed_error_label(policy: OnEmbedError) -> &'static str {
    match policy {
        OnEmbedError::Abort => "abort",
        OnEmbedError::Skip => "skip",
    }
}

fn env_status(name: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            if name == settings::PINECONE_INDEX_VAR || name == settings::PINECONE_ENV_VAR {
                style(value).cyan().to_string()
            } else {
                style("set").green().to_string()
            }
        }
        _ => style("not set").red().to_string(),
    }
}
