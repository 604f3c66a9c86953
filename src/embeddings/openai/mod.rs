
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::{Embedder, Embedding};
use crate::config::OpenAiConfig;
use crate::{RagError, Result, http};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const EMBEDDINGS_PATH: &str = "v1/embeddings";

/// Client for an OpenAI-compatible API, shared by embedding and chat completion.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: String,
    embedding_model: String,
    chat_model: String,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url.as_str())
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .field("dimension", &self.dimension)
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &OpenAiConfig, api_key: impl Into<String>) -> Result<Self> {
        let base_url = config
            .base_url()
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            api_key: api_key.into(),
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            dimension: config.embedding_dimension as usize,
            agent: http::agent(Duration::from_secs(config.timeout_secs)),
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = http::agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    #[inline]
    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Blocking embedding call; [`Embedder::embed`] runs this off the executor.
    #[inline]
    pub fn embed_blocking(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(RagError::EmbeddingService(
                "cannot embed blank text".to_string(),
            ));
        }

        debug!(
            "Generating embedding with {} for text (length: {})",
            self.embedding_model,
            text.len()
        );

        let request = EmbedRequest {
            model: &self.embedding_model,
            input: [text],
        };

        let response: EmbedResponse = self
            .post(EMBEDDINGS_PATH, &request, "embedding")
            .map_err(|e| RagError::EmbeddingService(format!("{e:#}")))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| {
                RagError::EmbeddingService("response contained no embeddings".to_string())
            })?;

        if embedding.len() != self.dimension {
            return Err(RagError::EmbeddingService(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    /// POST a JSON body to `path` under the base URL and decode the reply.
    pub(crate) fn post<B, T>(&self, path: &str, body: &B, what: &str) -> anyhow::Result<T>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = http::endpoint(&self.base_url, path)
            .with_context(|| format!("Failed to build {what} URL"))?;
        let body = http::to_json(body, what)?;
        let authorization = format!("Bearer {}", self.api_key);

        let response_text = self
            .make_request_with_retry(|| {
                http::post_json(
                    &self.agent,
                    &url,
                    &[("Authorization", authorization.as_str())],
                    &body,
                )
            })
            .with_context(|| format!("{what} request to {url} failed"))?;

        http::parse(&response_text, what)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> anyhow::Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let client = self.clone();
        let text = text.to_string();
        http::blocking(move || client.embed_blocking(&text)).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
