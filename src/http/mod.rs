// Blocking JSON-over-HTTP plumbing shared by the hosted service clients.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

/// Agent with a global timeout covering connect, send and receive.
pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Join `path` onto `base`, keeping any path prefix `base` already carries.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let mut joined = base.clone();
    {
        let mut segments = joined
            .path_segments_mut()
            .map_err(|()| anyhow::anyhow!("{} cannot be a base URL", base))?;
        segments.pop_if_empty();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            segments.push(segment);
        }
    }
    Ok(joined)
}

/// Serialize a request body, naming the request in the error.
pub(crate) fn to_json<B: Serialize>(body: &B, what: &str) -> Result<String> {
    serde_json::to_string(body).with_context(|| format!("Failed to serialize {what} request"))
}

pub(crate) fn post_json(
    agent: &ureq::Agent,
    url: &Url,
    headers: &[(&str, &str)],
    body: &str,
) -> Result<String, ureq::Error> {
    debug!("POST {} ({} bytes)", url, body.len());

    let mut request = agent
        .post(url.as_str())
        .header("Content-Type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    request
        .send(body)
        .and_then(|mut resp| resp.body_mut().read_to_string())
}

pub(crate) fn get(
    agent: &ureq::Agent,
    url: &Url,
    headers: &[(&str, &str)],
) -> Result<String, ureq::Error> {
    debug!("GET {}", url);

    let mut request = agent.get(url.as_str());
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    request
        .call()
        .and_then(|mut resp| resp.body_mut().read_to_string())
}

pub(crate) fn parse<T: DeserializeOwned>(body: &str, what: &str) -> Result<T> {
    serde_json::from_str(body).with_context(|| format!("Failed to parse {what} response"))
}

/// Run blocking client work off the async executor.
pub(crate) async fn blocking<T, F>(task: F) -> crate::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| crate::RagError::Other(anyhow::anyhow!("Blocking task failed: {e}")))?
}
