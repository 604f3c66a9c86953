use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Select};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::answer::{Answer, FlowFailure, History};
use crate::config::{Config, Credentials, IngestSource};
use crate::handles::Handles;
use crate::namespace::{ExamLevel, Namespace, StudyMode};

/// Number of characters of each retrieved passage shown under an answer
const SOURCE_PREVIEW_CHARS: usize = 80;

async fn open_handles(config: &Config) -> Result<Handles> {
    let credentials = Credentials::from_env(config.vector_store.backend)
        .context("Credentials are read from the environment or a .env file")?;
    Handles::init(config, &credentials)
        .await
        .context("Failed to initialize services")
}

/// Sources for one `ingest` run: the given files under one selection, or the
/// configured sources when no files are given.
fn selected_sources(
    config: &Config,
    files: Vec<PathBuf>,
    level: Option<String>,
    mode: Option<String>,
) -> Result<Vec<IngestSource>> {
    if files.is_empty() {
        if level.is_some() || mode.is_some() {
            anyhow::bail!("--level and --mode apply only to files given on the command line");
        }
        return Ok(config.ingest.sources.clone());
    }

    let (Some(level), Some(mode)) = (level, mode) else {
        anyhow::bail!("--level and --mode are required when files are given");
    };
    Ok(files
        .into_iter()
        .map(|path| IngestSource {
            path,
            level: level.clone(),
            mode: mode.clone(),
        })
        .collect())
}

/// Ingest the given files, or every source listed in the configuration
#[inline]
pub async fn ingest(
    config: &Config,
    files: Vec<PathBuf>,
    level: Option<String>,
    mode: Option<String>,
) -> Result<()> {
    let sources = selected_sources(config, files, level, mode)?;

    if sources.is_empty() {
        println!("No sources to ingest.");
        println!(
            "Pass files with --level and --mode, or add [[ingest.sources]] to {}",
            config.config_file_path().display()
        );
        return Ok(());
    }

    let handles = open_handles(config).await?;
    let summary = handles.ingestion_pipeline().ingest_sources(&sources).await;
    handles.shutdown();

    for report in &summary.files {
        println!(
            "{} {} -> {} ({})",
            style("✓").green(),
            report.path.display(),
            style(&report.namespace).cyan(),
            report.encoding.name()
        );
        println!(
            "    rows read: {}, stored: {}, skipped: {}, failed: {}, upserts: {}",
            report.rows_read, report.stored, report.skipped, report.failed, report.upsert_calls
        );
    }
    for path in &summary.missing {
        println!("{} {} (not found)", style("-").yellow(), path.display());
    }
    for failure in &summary.failures {
        println!(
            "{} {}: {}",
            style("✗").red(),
            failure.path.display(),
            failure.message
        );
    }

    println!();
    println!(
        "Stored {} entries from {} of {} sources",
        summary.total_stored(),
        summary.files.len(),
        sources.len()
    );

    if !summary.failures.is_empty() {
        anyhow::bail!("{} source(s) failed to ingest", summary.failures.len());
    }
    Ok(())
}

/// Answer a single question. Returns `false` when the failure was already
/// rendered and the process should exit non-zero.
#[inline]
pub async fn ask(config: &Config, level: &str, mode: &str, query: &str) -> Result<bool> {
    let handles = open_handles(config).await?;
    let answered = answer_once(&handles, level, mode, query).await;
    handles.shutdown();
    Ok(answered)
}

async fn answer_once(handles: &Handles, level: &str, mode: &str, query: &str) -> bool {
    match handles.answer_flow().run(level, mode, query).await {
        Ok(answer) => {
            render_answer(&answer);
            true
        }
        Err(failure) => {
            render_failure(&failure);
            false
        }
    }
}

/// Interactive question loop with a per-session history
#[inline]
pub async fn chat(config: &Config) -> Result<()> {
    let handles = open_handles(config).await?;
    let mut session = handles.session();

    println!("{}", style("英検 RAG チャット").bold().cyan());
    println!("Pick a level and mode, then ask. Choose 終了 to quit.");

    let mut levels: Vec<&str> = ExamLevel::ALL.iter().map(|level| level.label()).collect();
    levels.push("終了");
    let modes: Vec<&str> = StudyMode::ALL.iter().map(|mode| mode.label()).collect();
    let mut level_index = 0;
    let mut mode_index = 0;

    loop {
        println!();
        level_index = Select::new()
            .with_prompt("級")
            .default(level_index)
            .items(&levels)
            .interact()?;
        let Some(level) = ExamLevel::ALL.get(level_index) else {
            break;
        };

        mode_index = Select::new()
            .with_prompt("モード")
            .default(mode_index)
            .items(&modes)
            .interact()?;
        let Some(mode) = StudyMode::ALL.get(mode_index) else {
            break;
        };

        let query: String = Input::new()
            .with_prompt("質問")
            .allow_empty(true)
            .interact_text()?;

        match session.submit(level.label(), mode.label(), &query).await {
            Ok(answer) => render_answer(&answer),
            Err(failure) => render_failure(&failure),
        }
        render_history(session.history());
    }

    info!(
        "Chat session ended after {} answered questions",
        session.history().len()
    );
    handles.shutdown();
    Ok(())
}

/// List every partition and the selection that maps to it
#[inline]
pub fn list_namespaces() {
    println!("{:<8} {:<12} Namespace", "Level", "Mode");
    for (level, mode, namespace) in Namespace::all() {
        println!(
            "{:<8} {:<12} {}",
            level.label(),
            mode.label(),
            style(namespace).cyan()
        );
    }
}

/// Entry counts per partition
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    let handles = open_handles(config).await?;

    println!("{}", style("📊 Vector Store Status").bold().cyan());
    println!();

    let mut total = 0;
    for (level, mode, namespace) in Namespace::all() {
        match handles.index.count(&namespace).await {
            Ok(count) => {
                total += count;
                let count = if count == 0 {
                    style(count.to_string()).dim()
                } else {
                    style(count.to_string()).green()
                };
                println!(
                    "  {:<18} {:<8} {:<12} {}",
                    namespace.as_str(),
                    level.label(),
                    mode.label(),
                    count
                );
            }
            Err(e) => {
                warn!("Failed to count {}: {}", namespace, e);
                println!("  {:<18} {}", namespace.as_str(), style(e).red());
            }
        }
    }

    println!();
    println!("Total entries: {}", style(total).bold());
    handles.shutdown();
    Ok(())
}

fn render_answer(answer: &Answer) {
    println!();
    println!("{}", style("回答").bold().green());
    println!("{}", answer.text);

    if !answer.matches.is_empty() {
        println!();
        println!(
            "{}",
            style(format!("参照 ({})", answer.namespace)).dim()
        );
        for m in &answer.matches {
            let preview: String = m
                .text()
                .unwrap_or_default()
                .chars()
                .take(SOURCE_PREVIEW_CHARS)
                .collect();
            println!("  {} {}", style(format!("{:.3}", m.score)).dim(), preview);
        }
    }
}

fn render_failure(failure: &FlowFailure) {
    println!();
    println!(
        "{} {} ({:?} while {})",
        style("エラー:").bold().red(),
        failure.detail,
        failure.kind,
        failure.state
    );
}

fn render_history(history: &History) {
    if history.is_empty() {
        return;
    }
    println!();
    println!("{}", style("履歴").bold().yellow());
    for exchange in history.recent() {
        println!(
            "  {} [{}] {}",
            style("Q").cyan(),
            exchange.namespace,
            exchange.query
        );
        println!("  {} {}", style("A").green(), exchange.answer);
    }
}
