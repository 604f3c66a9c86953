use super::*;
use crate::ErrorKind;
use crate::database::Metric;
use crate::namespace::resolve_namespace;
use crate::test_support::{FAKE_DIMENSION, FakeChat, FakeEmbedder, MemoryIndex};
use tempfile::TempDir;

fn lancedb_config(temp_dir: &TempDir) -> Config {
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.vector_store.backend = Backend::Lancedb;
    config
}

fn credentials(pinecone: bool) -> Credentials {
    Credentials {
        openai_api_key: "sk-test".to_string(),
        index_name: "eiken-local".to_string(),
        pinecone_api_key: pinecone.then(|| "pc-test".to_string()),
        pinecone_environment: pinecone.then(|| "us-east-1".to_string()),
    }
}

fn fake_spec() -> IndexSpec {
    IndexSpec {
        name: "fake".to_string(),
        dimension: FAKE_DIMENSION,
        metric: Metric::Cosine,
    }
}

#[tokio::test]
async fn init_creates_local_table() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = lancedb_config(&temp_dir);

    let handles = Handles::init(&config, &credentials(false))
        .await
        .expect("should init");

    let ns = resolve_namespace("5級", "語彙").expect("known selection");
    assert_eq!(handles.index.count(&ns).await.expect("count"), 0);
    assert_eq!(handles.embedder.dimension(), 1536);
    assert!(config.vector_database_path().exists());

    handles.shutdown();
}

#[tokio::test]
async fn pinecone_backend_needs_its_key() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = lancedb_config(&temp_dir);
    config.vector_store.backend = Backend::Pinecone;

    let err = Handles::init(&config, &credentials(false))
        .await
        .err()
        .expect("should fail without a pinecone key");
    assert_eq!(err.kind(), ErrorKind::ConfigMissing);
}

#[tokio::test]
async fn from_parts_rejects_mismatched_dimensions() {
    let spec = IndexSpec {
        dimension: FAKE_DIMENSION * 2,
        ..fake_spec()
    };
    let err = Handles::from_parts(
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeChat::default()),
        Arc::new(MemoryIndex::default()),
        Config::default(),
        &spec,
    )
    .await
    .err()
    .expect("should fail");
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn components_follow_config() {
    let mut config = Config::default();
    config.retrieval.top_k = 5;
    config.ingest.batch_size = 10;

    let handles = Handles::from_parts(
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeChat::default()),
        Arc::new(MemoryIndex::default()),
        config,
        &fake_spec(),
    )
    .await
    .expect("should assemble");

    assert_eq!(handles.answer_flow().top_k(), 5);
    assert!(handles.session().history().is_empty());
    handles.shutdown();
}
