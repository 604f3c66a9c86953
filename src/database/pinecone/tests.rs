use super::*;
use crate::ErrorKind;
use crate::database::Metric;
use crate::namespace::resolve_namespace;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn spec() -> IndexSpec {
    IndexSpec {
        name: "eiken".to_string(),
        dimension: 3,
        metric: Metric::Cosine,
    }
}

fn index_for(server: &MockServer) -> PineconeIndex {
    let url = Url::parse(&server.uri()).expect("mock server uri");
    PineconeIndex::new(url, "pc-test", "aws", "us-east-1", Duration::from_secs(5))
}

fn data_index_for(server: &MockServer) -> PineconeIndex {
    let url = Url::parse(&server.uri()).expect("mock server uri");
    index_for(server).with_data_url(url)
}

fn entries(count: usize) -> Vec<VectorEntry> {
    (0..count)
        .map(|i| VectorEntry {
            id: format!("id-{i}"),
            values: vec![0.1, 0.2, 0.3],
            metadata: Metadata::new(),
        })
        .collect()
}

#[tokio::test]
async fn existing_index_is_not_recreated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/eiken"))
        .and(header("Api-Key", "pc-test"))
        .and(header("X-Pinecone-API-Version", API_VERSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "eiken",
            "dimension": 3,
            "host": server.uri(),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let index = index_for(&server);
    index.ensure_index(&spec()).await.expect("should describe");
    assert_eq!(
        index.data_url.get().map(Url::as_str),
        Some(format!("{}/", server.uri()).as_str())
    );
}

#[tokio::test]
async fn missing_index_is_created_as_serverless() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/eiken"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .and(body_partial_json(json!({
            "name": "eiken",
            "dimension": 3,
            "metric": "cosine",
            "spec": { "serverless": { "cloud": "aws", "region": "us-east-1" } },
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "eiken",
            "dimension": 3,
            "host": server.uri(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    index_for(&server)
        .ensure_index(&spec())
        .await
        .expect("should create");
}

#[tokio::test]
async fn dimension_mismatch_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/eiken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "dimension": 768,
            "host": "eiken-abc.svc.pinecone.io",
        })))
        .mount(&server)
        .await;

    let err = index_for(&server)
        .ensure_index(&spec())
        .await
        .expect_err("should fail");
    assert_eq!(err.kind(), ErrorKind::VectorStore);
}

#[tokio::test]
async fn control_plane_failure_is_a_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = index_for(&server)
        .ensure_index(&spec())
        .await
        .expect_err("should fail");
    assert_eq!(err.kind(), ErrorKind::VectorStore);
}

#[tokio::test]
async fn upsert_is_chunked_and_namespaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .and(body_partial_json(json!({ "namespace": "vocab-5" })))
        .respond_with(|request: &Request| {
            let body: serde_json::Value =
                serde_json::from_slice(&request.body).expect("json body");
            let count = body["vectors"].as_array().map_or(0, Vec::len);
            ResponseTemplate::new(200).set_body_json(json!({ "upsertedCount": count }))
        })
        .expect(3)
        .mount(&server)
        .await;

    let ns = resolve_namespace("5級", "語彙").expect("known selection");
    let written = data_index_for(&server)
        .upsert(&ns, entries(250))
        .await
        .expect("should upsert");
    assert_eq!(written, 250);
}

#[tokio::test]
async fn empty_upsert_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ns = resolve_namespace("5級", "語彙").expect("known selection");
    let written = data_index_for(&server)
        .upsert(&ns, Vec::new())
        .await
        .expect("no-op");
    assert_eq!(written, 0);
}

#[tokio::test]
async fn data_plane_requires_a_known_host() {
    let server = MockServer::start().await;
    let ns = resolve_namespace("5級", "語彙").expect("known selection");
    let err = index_for(&server)
        .upsert(&ns, entries(1))
        .await
        .expect_err("host unknown");
    assert_eq!(err.kind(), ErrorKind::VectorStore);
}

#[tokio::test]
async fn query_returns_sorted_matches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_partial_json(json!({
            "namespace": "passages-pre2",
            "topK": 2,
            "includeMetadata": true,
            "includeValues": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [
                { "id": "b", "score": 0.5, "metadata": { "text": "second" } },
                { "id": "a", "score": 0.9, "metadata": { "text": "first" } },
            ],
            "namespace": "passages-pre2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ns = resolve_namespace("準2級", "長文").expect("known selection");
    let matches = data_index_for(&server)
        .query(&ns, &[0.1, 0.2, 0.3], 2, true)
        .await
        .expect("should query");

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].id, "a");
    assert_eq!(matches[0].text(), Some("first"));
    assert_eq!(matches[1].text(), Some("second"));
}

#[tokio::test]
async fn query_failure_is_a_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let ns = resolve_namespace("3級", "リスニング").expect("known selection");
    let err = data_index_for(&server)
        .query(&ns, &[0.1, 0.2, 0.3], 3, true)
        .await
        .expect_err("should fail");
    assert_eq!(err.kind(), ErrorKind::VectorStore);
}

#[tokio::test]
async fn count_reads_namespace_stats() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/describe_index_stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "namespaces": { "listening-3": { "vectorCount": 42 } },
            "dimension": 3,
            "totalVectorCount": 42,
        })))
        .mount(&server)
        .await;

    let index = data_index_for(&server);
    let listening = resolve_namespace("3級", "リスニング").expect("known selection");
    let vocab = resolve_namespace("3級", "語彙").expect("known selection");
    assert_eq!(index.count(&listening).await.expect("count"), 42);
    assert_eq!(index.count(&vocab).await.expect("count"), 0);
}

#[test]
fn bare_hosts_get_https() {
    let url = host_url("eiken-abc.svc.aped-4627.pinecone.io").expect("valid host");
    assert_eq!(url.as_str(), "https://eiken-abc.svc.aped-4627.pinecone.io/");
    let url = host_url("http://127.0.0.1:8080").expect("valid url");
    assert_eq!(url.scheme(), "http");
}
