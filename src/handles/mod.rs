// Service handles shared by the ingest and answer paths

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::answer::{AnswerFlow, Session};
use crate::completion::ChatModel;
use crate::config::{Backend, Config, Credentials};
use crate::database::{IndexSpec, LanceIndex, PineconeIndex, VectorIndex};
use crate::embeddings::{Embedder, OpenAiClient};
use crate::ingest::IngestionPipeline;
use crate::{RagError, Result};

/// The embedder, chat model, and vector index built from one configuration
pub struct Handles {
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub index: Arc<dyn VectorIndex>,
    pub config: Config,
}

impl Handles {
    /// Build the clients and make sure the index exists.
    #[inline]
    pub async fn init(config: &Config, credentials: &Credentials) -> Result<Self> {
        let client = OpenAiClient::new(&config.openai, credentials.openai_api_key.clone())?;
        let client = Arc::new(client);

        let index: Arc<dyn VectorIndex> = match config.vector_store.backend {
            Backend::Pinecone => Arc::new(pinecone_index(config, credentials)?),
            Backend::Lancedb => Arc::new(LanceIndex::connect(config.vector_database_path()).await?),
        };

        let spec = IndexSpec {
            name: credentials.index_name.clone(),
            dimension: config.openai.embedding_dimension as usize,
            metric: config.vector_store.metric,
        };
        let embedder: Arc<dyn Embedder> = Arc::clone(&client) as Arc<dyn Embedder>;
        Self::from_parts(embedder, client, index, config.clone(), &spec).await
    }

    /// Assemble handles from existing components, ensuring `spec` on the index.
    #[inline]
    pub async fn from_parts(
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        index: Arc<dyn VectorIndex>,
        config: Config,
        spec: &IndexSpec,
    ) -> Result<Self> {
        if embedder.dimension() != spec.dimension {
            return Err(RagError::Config(format!(
                "embedder produces {} dimensions but index {} expects {}",
                embedder.dimension(),
                spec.name,
                spec.dimension
            )));
        }

        index.ensure_index(spec).await?;
        info!(
            "Vector index {} ready ({} dims, {})",
            spec.name, spec.dimension, spec.metric
        );

        Ok(Self {
            embedder,
            chat,
            index,
            config,
        })
    }

    #[inline]
    pub fn ingestion_pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::from_config(
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
            &self.config.ingest,
        )
    }

    #[inline]
    pub fn answer_flow(&self) -> AnswerFlow {
        AnswerFlow::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
            Arc::clone(&self.chat),
            self.config.retrieval.top_k,
        )
    }

    #[inline]
    pub fn session(&self) -> Session {
        Session::new(self.answer_flow())
    }

    /// Release the clients. Blocking HTTP agents and the LanceDB connection
    /// close when their last handle drops.
    #[inline]
    pub fn shutdown(self) {
        debug!(
            "Releasing handles (index references: {})",
            Arc::strong_count(&self.index)
        );
        drop(self);
        info!("Handles released");
    }
}

fn pinecone_index(config: &Config, credentials: &Credentials) -> Result<PineconeIndex> {
    let api_key = credentials.pinecone_api_key.clone().ok_or_else(|| {
        RagError::ConfigMissing(vec![crate::config::settings::PINECONE_API_KEY_VAR.to_string()])
    })?;
    let region = credentials.pinecone_environment.clone().ok_or_else(|| {
        RagError::ConfigMissing(vec![crate::config::settings::PINECONE_ENV_VAR.to_string()])
    })?;
    let control_url = config
        .vector_store
        .control_url()
        .map_err(|e| RagError::Config(e.to_string()))?;

    Ok(PineconeIndex::new(
        control_url,
        api_key,
        config.vector_store.cloud.clone(),
        region,
        Duration::from_secs(config.vector_store.timeout_secs),
    ))
}
