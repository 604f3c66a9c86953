// Vector store gateway
// A namespaced nearest-neighbour index behind one trait, with a hosted Pinecone
// backend and a local LanceDB backend.

pub mod lancedb;
pub mod pinecone;


use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::namespace::Namespace;
use crate::{RagError, Result};

pub use self::lancedb::LanceIndex;
pub use self::pinecone::PineconeIndex;

/// Arbitrary per-entry fields kept alongside the vector for display.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Similarity metric an index is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    #[serde(rename = "dotproduct")]
    DotProduct,
}

impl Metric {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::DotProduct => "dotproduct",
        }
    }
}

impl fmt::Display for Metric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "dotproduct" => Ok(Self::DotProduct),
            other => Err(RagError::Config(format!("unknown metric `{other}`"))),
        }
    }
}

/// Shape of the index to create when it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
}

/// One stored vector and the fields shown when it is retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A retrieved entry. Higher scores are more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl QueryMatch {
    /// The `text` metadata field, if present and a string
    #[inline]
    pub fn text(&self) -> Option<&str> {
        self.metadata.get("text").and_then(serde_json::Value::as_str)
    }
}

/// Namespaced vector index.
///
/// Every operation is scoped to one namespace; entries of other namespaces
/// are never read or written. Failures surface as [`RagError::VectorStore`]
/// and are not retried here.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the index described by `spec` unless it already exists.
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<()>;

    /// Insert or overwrite `entries` by id. Returns the number written.
    async fn upsert(&self, namespace: &Namespace, entries: Vec<VectorEntry>) -> Result<usize>;

    /// Up to `top_k` nearest entries, most similar first.
    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>>;

    /// Number of entries stored in `namespace`.
    async fn count(&self, namespace: &Namespace) -> Result<u64>;
}
