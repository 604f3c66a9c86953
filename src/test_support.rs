// In-memory stand-ins for the hosted services

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::completion::ChatModel;
use crate::database::{IndexSpec, Metadata, QueryMatch, VectorEntry, VectorIndex};
use crate::embeddings::{Embedder, Embedding};
use crate::namespace::Namespace;
use crate::{RagError, Result};

pub(crate) const FAKE_DIMENSION: usize = 8;

/// Deterministic embedder; identical text always maps to the same vector.
#[derive(Default)]
pub(crate) struct FakeEmbedder {
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    /// Fail for any text containing `marker`.
    pub(crate) fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn fake_vector(text: &str) -> Embedding {
    Sha256::digest(text.as_bytes())
        .iter()
        .take(FAKE_DIMENSION)
        .map(|byte| f32::from(*byte) / 255.0 + 0.01)
        .collect()
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.trim().is_empty() {
            return Err(RagError::EmbeddingService("blank text".to_string()));
        }
        if self.fail_on.as_deref().is_some_and(|marker| text.contains(marker)) {
            return Err(RagError::EmbeddingService(format!("refused {text:?}")));
        }
        Ok(fake_vector(text))
    }

    fn dimension(&self) -> usize {
        FAKE_DIMENSION
    }
}

/// Chat model that echoes the prompt it was given.
#[derive(Default)]
pub(crate) struct FakeChat {
    fail: bool,
    prompts: Mutex<Vec<(String, String)>>,
}

impl FakeChat {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push((system.to_string(), user.to_string()));
        if self.fail {
            return Err(RagError::CompletionService("model unavailable".to_string()));
        }
        Ok(format!("answer to: {}", user.lines().last().unwrap_or_default()))
    }
}

/// Vector index kept in memory, recording the size of every upsert call.
#[derive(Default)]
pub(crate) struct MemoryIndex {
    entries: Mutex<HashMap<String, Vec<VectorEntry>>>,
    upsert_sizes: Mutex<Vec<usize>>,
    fail_queries: bool,
}

impl MemoryIndex {
    pub(crate) fn failing_queries() -> Self {
        Self {
            fail_queries: true,
            ..Self::default()
        }
    }

    pub(crate) fn upsert_sizes(&self) -> Vec<usize> {
        self.upsert_sizes.lock().expect("sizes lock").clone()
    }

    pub(crate) fn entries(&self, namespace: &Namespace) -> Vec<VectorEntry> {
        self.entries
            .lock()
            .expect("entries lock")
            .get(namespace.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 { 0.0 } else { dot / denominator }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_index(&self, _spec: &IndexSpec) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, namespace: &Namespace, entries: Vec<VectorEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let count = entries.len();
        self.upsert_sizes.lock().expect("sizes lock").push(count);

        let mut store = self.entries.lock().expect("entries lock");
        let partition = store.entry(namespace.as_str().to_string()).or_default();
        for entry in entries {
            match partition.iter_mut().find(|existing| existing.id == entry.id) {
                Some(existing) => *existing = entry,
                None => partition.push(entry),
            }
        }
        Ok(count)
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        if self.fail_queries {
            return Err(RagError::VectorStore("index unreachable".to_string()));
        }
        let mut matches: Vec<QueryMatch> = self
            .entries(namespace)
            .into_iter()
            .map(|entry| QueryMatch {
                score: cosine(&entry.values, vector),
                id: entry.id,
                metadata: if include_metadata {
                    entry.metadata
                } else {
                    Metadata::new()
                },
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn count(&self, namespace: &Namespace) -> Result<u64> {
        Ok(self.entries(namespace).len() as u64)
    }
}
