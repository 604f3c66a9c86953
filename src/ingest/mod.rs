// Ingestion pipeline
// CSV rows -> text -> embeddings -> batched upserts into one namespace per file

pub mod reader;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::config::{IngestConfig, IngestSource, OnEmbedError};
use crate::database::{Metadata, VectorEntry, VectorIndex};
use crate::embeddings::Embedder;
use crate::namespace::Namespace;
use crate::{ErrorKind, RagError, Result};

pub use reader::{CsvSource, Record, SourceEncoding, extract_text};

/// Hex characters kept from the SHA-256 digest of an entry key
const ENTRY_KEY_LEN: usize = 32;

/// Identity of a source file in entry keys: its canonical path, or the
/// path as given when it cannot be resolved.
#[inline]
pub fn source_key(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Stable id for row `row` of the file identified by `source`.
///
/// Re-ingesting a file overwrites its own entries. Distinct files, including
/// same-named files in different directories, get distinct keys.
#[inline]
pub fn entry_key(source: &str, row: usize) -> String {
    let digest = Sha256::digest(format!("{source}\u{1f}{row}").as_bytes());
    hex::encode(&digest[..ENTRY_KEY_LEN / 2])
}

/// Outcome of ingesting one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub namespace: Namespace,
    pub encoding: SourceEncoding,
    pub rows_read: usize,
    pub stored: usize,
    /// Rows with no usable text
    pub skipped: usize,
    /// Rows whose embedding failed under [`OnEmbedError::Skip`]
    pub failed: usize,
    pub upsert_calls: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: Vec<FileReport>,
    pub missing: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
}

impl IngestSummary {
    #[inline]
    pub fn total_stored(&self) -> usize {
        self.files.iter().map(|f| f.stored).sum()
    }

    #[inline]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.failures.is_empty()
    }
}

pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    on_embed_error: OnEmbedError,
}

impl IngestionPipeline {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        let defaults = IngestConfig::default();
        Self {
            embedder,
            index,
            batch_size: defaults.batch_size,
            on_embed_error: defaults.on_embed_error,
        }
    }

    #[inline]
    pub fn from_config(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &IngestConfig,
    ) -> Self {
        Self::new(embedder, index)
            .with_batch_size(config.batch_size)
            .with_on_embed_error(config.on_embed_error)
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_on_embed_error(mut self, policy: OnEmbedError) -> Self {
        self.on_embed_error = policy;
        self
    }

    /// Ingest every configured source in order.
    ///
    /// Missing files and per-file failures are logged and recorded; the
    /// remaining sources are still processed.
    #[inline]
    pub async fn ingest_sources(&self, sources: &[IngestSource]) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for source in sources {
            let result = match source.namespace() {
                Ok(namespace) => self.ingest_file(&source.path, &namespace).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(report) => summary.files.push(report),
                Err(RagError::SourceMissing(path)) => {
                    warn!("Skipping missing source file: {}", path.display());
                    summary.missing.push(path);
                }
                Err(e) => {
                    error!("Failed to ingest {}: {}", source.path.display(), e);
                    summary.failures.push(FileFailure {
                        path: source.path.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Ingestion finished: {} files, {} entries stored, {} missing, {} failed",
            summary.files.len(),
            summary.total_stored(),
            summary.missing.len(),
            summary.failures.len()
        );
        summary
    }

    /// Ingest one CSV file into `namespace`.
    #[inline]
    pub async fn ingest_file(&self, path: &Path, namespace: &Namespace) -> Result<FileReport> {
        if !path.is_file() {
            return Err(RagError::SourceMissing(path.to_path_buf()));
        }

        let source = CsvSource::open(path)?;
        let file_name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        let key_source = source_key(path);
        let ingested_at = Utc::now().to_rfc3339();

        let mut report = FileReport {
            path: path.to_path_buf(),
            namespace: namespace.clone(),
            encoding: source.encoding(),
            rows_read: 0,
            stored: 0,
            skipped: 0,
            failed: 0,
            upsert_calls: 0,
        };

        let bar = progress_bar(&file_name);
        let mut batch = Vec::with_capacity(self.batch_size);

        for record in source.records() {
            let record = record?;
            report.rows_read += 1;
            bar.inc(1);

            let Some(text) = extract_text(&record).filter(|text| !text.trim().is_empty()) else {
                debug!("Row {} of {} has no text, skipping", record.index(), file_name);
                report.skipped += 1;
                continue;
            };

            let values = match self.embedder.embed(&text).await {
                Ok(values) => values,
                Err(e) => match self.on_embed_error {
                    OnEmbedError::Abort => {
                        bar.finish_and_clear();
                        error!(
                            "Embedding row {} of {} failed, abandoning file ({} pending entries dropped): {}",
                            record.index(),
                            file_name,
                            batch.len(),
                            e
                        );
                        return Err(e);
                    }
                    OnEmbedError::Skip => {
                        warn!("Embedding row {} of {} failed: {}", record.index(), file_name, e);
                        report.failed += 1;
                        continue;
                    }
                },
            };

            batch.push(VectorEntry {
                id: entry_key(&key_source, record.index()),
                values,
                metadata: entry_metadata(&record, &text, &file_name, &ingested_at),
            });

            if batch.len() >= self.batch_size {
                if let Err(e) = self.flush(namespace, &mut batch, &mut report).await {
                    bar.finish_and_clear();
                    return Err(e);
                }
            }
        }

        if !batch.is_empty() {
            if let Err(e) = self.flush(namespace, &mut batch, &mut report).await {
                bar.finish_and_clear();
                return Err(e);
            }
        }
        bar.finish_and_clear();

        info!(
            "Ingested {} into {} ({}): {} rows read, {} stored, {} skipped, {} failed, {} upserts",
            file_name,
            namespace,
            report.encoding.name(),
            report.rows_read,
            report.stored,
            report.skipped,
            report.failed,
            report.upsert_calls
        );

        Ok(report)
    }

    async fn flush(
        &self,
        namespace: &Namespace,
        batch: &mut Vec<VectorEntry>,
        report: &mut FileReport,
    ) -> Result<()> {
        let entries = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        debug!("Upserting batch of {} entries into {}", entries.len(), namespace);

        let written = self.index.upsert(namespace, entries).await?;
        report.stored += written;
        report.upsert_calls += 1;
        Ok(())
    }
}

fn entry_metadata(record: &Record, text: &str, source: &str, ingested_at: &str) -> Metadata {
    let mut metadata: Metadata = record
        .fields()
        .iter()
        .filter(|(column, _)| !column.is_empty())
        .map(|(column, value)| (column.clone(), Value::String(value.clone())))
        .collect();

    metadata.insert("text".to_string(), Value::String(text.to_string()));
    metadata.insert("source".to_string(), Value::String(source.to_string()));
    metadata.insert("row".to_string(), Value::from(record.index()));
    metadata.insert(
        "ingested_at".to_string(),
        Value::String(ingested_at.to_string()),
    );
    metadata
}

fn progress_bar(file_name: &str) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let style = ProgressStyle::with_template("{spinner} [{pos} rows] Ingesting {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner().with_style(style);
    bar.set_message(file_name.to_string());
    bar
}
