use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Missing required settings: {}", .0.join(", "))]
    ConfigMissing(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not decode `{}` with any supported encoding", .path.display())]
    EncodingExhausted { path: PathBuf },

    #[error("Source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Unknown {field} selection: {value:?}")]
    UnknownSelection { field: &'static str, value: String },

    #[error("Query is empty")]
    EmptyQuery,

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Completion service error: {0}")]
    CompletionService(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`RagError`], used by callers that render
/// failures instead of branching on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigMissing,
    Config,
    Encoding,
    SourceMissing,
    UnknownSelection,
    EmptyQuery,
    EmbeddingService,
    VectorStore,
    CompletionService,
    Io,
    Other,
}

impl RagError {
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigMissing(_) => ErrorKind::ConfigMissing,
            Self::Config(_) => ErrorKind::Config,
            Self::EncodingExhausted { .. } | Self::Csv(_) => ErrorKind::Encoding,
            Self::SourceMissing(_) => ErrorKind::SourceMissing,
            Self::UnknownSelection { .. } => ErrorKind::UnknownSelection,
            Self::EmptyQuery => ErrorKind::EmptyQuery,
            Self::EmbeddingService(_) => ErrorKind::EmbeddingService,
            Self::VectorStore(_) => ErrorKind::VectorStore,
            Self::CompletionService(_) => ErrorKind::CompletionService,
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}

pub mod answer;
pub mod commands;
pub mod completion;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod handles;
mod http;
pub mod ingest;
pub mod namespace;

#[cfg(test)]
pub(crate) mod test_support;
