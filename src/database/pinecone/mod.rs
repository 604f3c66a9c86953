// Pinecone REST backend
// Control plane creates and describes the index; the data plane host it
// reports serves upsert, query and stats.

#[cfg(test)]
mod tests;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::{IndexSpec, Metadata, QueryMatch, VectorEntry, VectorIndex};
use crate::namespace::Namespace;
use crate::{RagError, Result, http};

pub const API_VERSION: &str = "2024-07";
/// Largest upsert request the service accepts for 1536-dimension vectors
pub const UPSERT_CHUNK_SIZE: usize = 100;

#[derive(Clone)]
pub struct PineconeIndex {
    control_url: Url,
    api_key: String,
    cloud: String,
    region: String,
    agent: ureq::Agent,
    data_url: Arc<OnceLock<Url>>,
}

impl std::fmt::Debug for PineconeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeIndex")
            .field("control_url", &self.control_url.as_str())
            .field("cloud", &self.cloud)
            .field("region", &self.region)
            .field("data_url", &self.data_url.get().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
    #[serde(default)]
    dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorEntry],
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    namespaces: std::collections::HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    vector_count: u64,
}

fn store_error(e: anyhow::Error) -> RagError {
    RagError::VectorStore(format!("{e:#}"))
}

impl PineconeIndex {
    #[inline]
    pub fn new(
        control_url: Url,
        api_key: impl Into<String>,
        cloud: impl Into<String>,
        region: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            control_url,
            api_key: api_key.into(),
            cloud: cloud.into(),
            region: region.into(),
            agent: http::agent(timeout),
            data_url: Arc::new(OnceLock::new()),
        }
    }

    /// Pin the data plane URL instead of discovering it from the control plane.
    #[inline]
    pub fn with_data_url(self, data_url: Url) -> Self {
        let _ = self.data_url.set(data_url);
        self
    }

    fn headers(&self) -> [(&str, &str); 2] {
        [
            ("Api-Key", self.api_key.as_str()),
            ("X-Pinecone-API-Version", API_VERSION),
        ]
    }

    fn data_url(&self) -> Result<&Url> {
        self.data_url.get().ok_or_else(|| {
            RagError::VectorStore("index host unknown; call ensure_index first".to_string())
        })
    }

    /// Describe the index, `None` when it does not exist.
    fn describe(&self, name: &str) -> anyhow::Result<Option<IndexDescription>> {
        let url = http::endpoint(&self.control_url, &format!("indexes/{name}"))?;
        match http::get(&self.agent, &url, &self.headers()) {
            Ok(body) => http::parse(&body, "describe index").map(Some),
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("describe index request to {url} failed: {e}")),
        }
    }

    fn create(&self, spec: &IndexSpec) -> anyhow::Result<IndexDescription> {
        let url = http::endpoint(&self.control_url, "indexes")?;
        let request = CreateIndexRequest {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric.as_str(),
            spec: json!({ "serverless": { "cloud": self.cloud, "region": self.region } }),
        };
        let body = http::to_json(&request, "create index")?;
        let response = http::post_json(&self.agent, &url, &self.headers(), &body)
            .with_context(|| format!("create index request to {url} failed"))?;
        http::parse(&response, "create index")
    }

    fn ensure_index_blocking(&self, spec: &IndexSpec) -> Result<()> {
        let description = match self.describe(&spec.name).map_err(store_error)? {
            Some(description) => {
                debug!("Index {} already exists at {}", spec.name, description.host);
                description
            }
            None => {
                let description = self.create(spec).map_err(store_error)?;
                info!(
                    "Created index {} ({} dims, {}) in {}/{}",
                    spec.name, spec.dimension, spec.metric, self.cloud, self.region
                );
                description
            }
        };

        if let Some(dimension) = description.dimension {
            if dimension != spec.dimension {
                return Err(RagError::VectorStore(format!(
                    "index {} has {} dimensions, expected {}",
                    spec.name, dimension, spec.dimension
                )));
            }
        }

        if self.data_url.get().is_none() {
            let url = host_url(&description.host).map_err(store_error)?;
            let _ = self.data_url.set(url);
        }
        Ok(())
    }

    fn post_data<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T> {
        let url = http::endpoint(self.data_url()?, path).map_err(store_error)?;
        let body = http::to_json(body, what).map_err(store_error)?;
        let response = http::post_json(&self.agent, &url, &self.headers(), &body)
            .map_err(|e| RagError::VectorStore(format!("{what} request to {url} failed: {e}")))?;
        http::parse(&response, what).map_err(store_error)
    }

    fn upsert_blocking(&self, namespace: &Namespace, entries: &[VectorEntry]) -> Result<usize> {
        let mut written = 0;
        for chunk in entries.chunks(UPSERT_CHUNK_SIZE) {
            let request = UpsertRequest {
                vectors: chunk,
                namespace: namespace.as_str(),
            };
            let response: UpsertResponse = self.post_data("vectors/upsert", &request, "upsert")?;
            written += response.upserted_count;
        }
        debug!("Upserted {} entries into {}", written, namespace);
        Ok(written)
    }

    fn query_blocking(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        let request = QueryRequest {
            namespace: namespace.as_str(),
            vector,
            top_k,
            include_metadata,
            include_values: false,
        };
        let response: QueryResponse = self.post_data("query", &request, "query")?;

        let mut matches = response.matches;
        if !include_metadata {
            for m in &mut matches {
                m.metadata = Metadata::new();
            }
        }
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    fn count_blocking(&self, namespace: &Namespace) -> Result<u64> {
        let response: StatsResponse =
            self.post_data("describe_index_stats", &json!({}), "describe index stats")?;
        Ok(response
            .namespaces
            .get(namespace.as_str())
            .map_or(0, |stats| stats.vector_count))
    }
}

/// The control plane reports bare hostnames; tests and proxies may report full URLs.
fn host_url(host: &str) -> anyhow::Result<Url> {
    let raw = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    Url::parse(&raw).with_context(|| format!("invalid index host {host:?}"))
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<()> {
        let index = self.clone();
        let spec = spec.clone();
        http::blocking(move || index.ensure_index_blocking(&spec)).await
    }

    async fn upsert(&self, namespace: &Namespace, entries: Vec<VectorEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let index = self.clone();
        let namespace = namespace.clone();
        http::blocking(move || index.upsert_blocking(&namespace, &entries)).await
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        let index = self.clone();
        let namespace = namespace.clone();
        let vector = vector.to_vec();
        http::blocking(move || index.query_blocking(&namespace, &vector, top_k, include_metadata))
            .await
    }

    async fn count(&self, namespace: &Namespace) -> Result<u64> {
        let index = self.clone();
        let namespace = namespace.clone();
        http::blocking(move || index.count_blocking(&namespace)).await
    }
}
