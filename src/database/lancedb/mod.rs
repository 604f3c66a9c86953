// LanceDB vector database module
// Local, file-backed backend: one table per index, namespaces as a filtered column


use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::lancedb::query::{ExecutableQuery, QueryBase};
use ::lancedb::{Connection, DistanceType, Table};
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{IndexSpec, Metadata, Metric, QueryMatch, VectorEntry, VectorIndex};
use crate::namespace::Namespace;
use crate::{RagError, Result};

/// Vector index stored in a local LanceDB directory
pub struct LanceIndex {
    connection: Connection,
    db_path: PathBuf,
    spec: RwLock<Option<IndexSpec>>,
}

impl std::fmt::Debug for LanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceIndex")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

fn store_error(action: &str, e: impl std::fmt::Display) -> RagError {
    RagError::VectorStore(format!("{action}: {e}"))
}

impl LanceIndex {
    /// Open (creating if needed) the LanceDB directory at `db_path`.
    ///
    /// No table is touched until [`VectorIndex::ensure_index`] runs.
    #[inline]
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(&db_path)
            .map_err(|e| store_error("Failed to create vector database directory", e))?;

        let uri = format!("file://{}", db_path.display());
        let connection = ::lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| store_error("Failed to connect to LanceDB", e))?;

        Ok(Self {
            connection,
            db_path,
            spec: RwLock::new(None),
        })
    }

    #[inline]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("namespace", DataType::Utf8, false),
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, true),
            Field::new("metadata", DataType::Utf8, false),
        ]))
    }

    async fn current_spec(&self) -> Result<IndexSpec> {
        self.spec.read().await.clone().ok_or_else(|| {
            RagError::VectorStore("index has not been initialised with ensure_index".to_string())
        })
    }

    async fn open_table(&self, spec: &IndexSpec) -> Result<Table> {
        self.connection
            .open_table(&spec.name)
            .execute()
            .await
            .map_err(|e| store_error("Failed to open table", e))
    }

    /// Dimension of the `vector` column of an existing table
    async fn detect_existing_vector_dimension(&self, table_name: &str) -> Result<usize> {
        let table = self
            .connection
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| store_error("Failed to open existing table", e))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| store_error("Failed to get table schema", e))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(RagError::VectorStore(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn create_record_batch(
        namespace: &Namespace,
        entries: &[VectorEntry],
        vector_dim: usize,
    ) -> Result<RecordBatch> {
        let len = entries.len();

        let mut namespaces = Vec::with_capacity(len);
        let mut ids = Vec::with_capacity(len);
        let mut texts = Vec::with_capacity(len);
        let mut metadata = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);

        for entry in entries {
            if entry.values.len() != vector_dim {
                return Err(RagError::VectorStore(format!(
                    "entry {} has {} dimensions, index expects {}",
                    entry.id,
                    entry.values.len(),
                    vector_dim
                )));
            }
            namespaces.push(namespace.as_str());
            ids.push(entry.id.as_str());
            texts.push(
                entry
                    .metadata
                    .get("text")
                    .and_then(serde_json::Value::as_str),
            );
            metadata.push(
                serde_json::to_string(&entry.metadata)
                    .map_err(|e| store_error("Failed to serialize metadata", e))?,
            );
            flat_values.extend_from_slice(&entry.values);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| store_error("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(namespaces)),
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(metadata)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| store_error("Failed to create record batch", e))
    }

    fn parse_search_batch(
        batch: &RecordBatch,
        metric: Metric,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        let ids = string_column(batch, "id")?;
        let metadata = string_column(batch, "metadata")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut matches = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            let metadata = if include_metadata {
                serde_json::from_str::<Metadata>(metadata.value(row))
                    .map_err(|e| store_error("Failed to parse stored metadata", e))?
            } else {
                Metadata::new()
            };

            matches.push(QueryMatch {
                id: ids.value(row).to_string(),
                score: similarity(metric, distance),
                metadata,
            });
        }

        Ok(matches)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::VectorStore(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::VectorStore(format!("Invalid {name} column type")))
}

fn distance_type(metric: Metric) -> DistanceType {
    match metric {
        Metric::Cosine => DistanceType::Cosine,
        Metric::Euclidean => DistanceType::L2,
        Metric::DotProduct => DistanceType::Dot,
    }
}

/// Convert a LanceDB distance into a score where higher is more similar.
fn similarity(metric: Metric, distance: f32) -> f32 {
    match metric {
        Metric::Cosine | Metric::DotProduct => 1.0 - distance,
        Metric::Euclidean => 1.0 / (1.0 + distance),
    }
}

fn namespace_filter(namespace: &Namespace) -> String {
    format!("namespace = '{}'", namespace.as_str().replace('\'', "''"))
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_error("Failed to list tables", e))?;

        if table_names.contains(&spec.name) {
            let existing = self.detect_existing_vector_dimension(&spec.name).await?;
            if existing != spec.dimension {
                return Err(RagError::VectorStore(format!(
                    "table {} has {} dimensions, expected {}",
                    spec.name, existing, spec.dimension
                )));
            }
            debug!("Table {} already exists with {} dimensions", spec.name, existing);
        } else {
            self.connection
                .create_empty_table(&spec.name, Self::create_schema(spec.dimension))
                .execute()
                .await
                .map_err(|e| store_error("Failed to create table", e))?;
            info!(
                "Created table {} with {} dimensions ({})",
                spec.name, spec.dimension, spec.metric
            );
        }

        *self.spec.write().await = Some(spec.clone());
        Ok(())
    }

    async fn upsert(&self, namespace: &Namespace, entries: Vec<VectorEntry>) -> Result<usize> {
        if entries.is_empty() {
            debug!("No entries to upsert");
            return Ok(0);
        }

        let spec = self.current_spec().await?;
        let record_batch = Self::create_record_batch(namespace, &entries, spec.dimension)?;
        let table = self.open_table(&spec).await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = table.merge_insert(&["namespace", "id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| store_error("Failed to upsert entries", e))?;

        debug!("Upserted {} entries into {}", entries.len(), namespace);
        Ok(entries.len())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        let spec = self.current_spec().await?;
        let table = self.open_table(&spec).await?;

        debug!("Searching {} for {} nearest entries", namespace, top_k);

        let mut results = table
            .vector_search(vector)
            .map_err(|e| store_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(distance_type(spec.metric))
            .only_if(namespace_filter(namespace))
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| store_error("Failed to execute search", e))?;

        let mut matches = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| store_error("Failed to read result stream", e))?
        {
            matches.extend(Self::parse_search_batch(
                &batch,
                spec.metric,
                include_metadata,
            )?);
        }

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn count(&self, namespace: &Namespace) -> Result<u64> {
        let spec = self.current_spec().await?;
        let table = self.open_table(&spec).await?;

        let count = table
            .count_rows(Some(namespace_filter(namespace)))
            .await
            .map_err(|e| store_error("Failed to count rows", e))?;

        Ok(count as u64)
    }
}
