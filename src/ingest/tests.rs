use super::*;
use crate::namespace::resolve_namespace;
use crate::test_support::{FakeEmbedder, MemoryIndex};
use std::fmt::Write as _;
use std::fs;
use tempfile::TempDir;

fn write_csv(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("should write csv");
    path
}

fn numbered_rows(count: usize) -> String {
    let mut csv = String::from("id,text\n");
    for i in 0..count {
        writeln!(csv, "{i},sentence number {i}").expect("writing to a String cannot fail");
    }
    csv
}

fn pipeline(
    embedder: &Arc<FakeEmbedder>,
    index: &Arc<MemoryIndex>,
    batch_size: usize,
) -> IngestionPipeline {
    IngestionPipeline::new(embedder.clone(), index.clone()).with_batch_size(batch_size)
}

fn vocab_5() -> Namespace {
    resolve_namespace("5級", "語彙").expect("known selection")
}

#[test]
fn entry_keys_are_stable_and_distinct() {
    let key = entry_key("vocab_eiken_MVP.csv", 0);
    assert_eq!(key.len(), 32);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(key, entry_key("vocab_eiken_MVP.csv", 0));
    assert_ne!(key, entry_key("vocab_eiken_MVP.csv", 1));
    assert_ne!(key, entry_key("passages_eiken_MVP.csv", 0));
    assert_ne!(entry_key("a1", 1), entry_key("a", 11));
}

#[tokio::test]
async fn blank_rows_are_skipped_and_never_embedded() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_csv(&temp_dir, "rows.csv", "id,text\n1,hello\n2,\n3,   \n4,world\n");
    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(MemoryIndex::default());

    let report = pipeline(&embedder, &index, 100)
        .ingest_file(&path, &vocab_5())
        .await
        .expect("should ingest");

    assert_eq!(report.rows_read, 4);
    assert_eq!(report.stored, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.upsert_calls, 1);
    assert_eq!(embedder.calls(), 2);
    assert_eq!(index.entries(&vocab_5()).len(), 2);
}

#[tokio::test]
async fn batches_flush_at_size_and_at_end() {
    for (rows, batch_size, expected) in [
        (7, 3, vec![3, 3, 1]),
        (6, 3, vec![3, 3]),
        (2, 100, vec![2]),
        (1, 1, vec![1]),
    ] {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = write_csv(&temp_dir, "rows.csv", &numbered_rows(rows));
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(MemoryIndex::default());

        let report = pipeline(&embedder, &index, batch_size)
            .ingest_file(&path, &vocab_5())
            .await
            .expect("should ingest");

        assert_eq!(index.upsert_sizes(), expected, "{rows} rows, batch {batch_size}");
        assert_eq!(report.upsert_calls, rows.div_ceil(batch_size));
        assert_eq!(report.stored, rows);
    }
}

#[tokio::test]
async fn header_only_file_upserts_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_csv(&temp_dir, "empty.csv", "id,text\n");
    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(MemoryIndex::default());

    let report = pipeline(&embedder, &index, 100)
        .ingest_file(&path, &vocab_5())
        .await
        .expect("should ingest");

    assert_eq!(report.rows_read, 0);
    assert_eq!(report.upsert_calls, 0);
    assert!(index.upsert_sizes().is_empty());
}

#[tokio::test]
async fn abort_policy_drops_pending_batch() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_csv(&temp_dir, "rows.csv", &numbered_rows(7));
    let embedder = Arc::new(FakeEmbedder::failing_on("number 4"));
    let index = Arc::new(MemoryIndex::default());

    let err = pipeline(&embedder, &index, 3)
        .ingest_file(&path, &vocab_5())
        .await
        .expect_err("should abort");

    assert_eq!(err.kind(), ErrorKind::EmbeddingService);
    assert_eq!(index.upsert_sizes(), vec![3]);
    assert_eq!(embedder.calls(), 5);
}

#[tokio::test]
async fn skip_policy_continues_past_failures() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_csv(&temp_dir, "rows.csv", &numbered_rows(7));
    let embedder = Arc::new(FakeEmbedder::failing_on("number 4"));
    let index = Arc::new(MemoryIndex::default());

    let report = pipeline(&embedder, &index, 3)
        .with_on_embed_error(OnEmbedError::Skip)
        .ingest_file(&path, &vocab_5())
        .await
        .expect("should continue");

    assert_eq!(report.failed, 1);
    assert_eq!(report.stored, 6);
    assert_eq!(index.upsert_sizes(), vec![3, 3]);
}

#[tokio::test]
async fn missing_file_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(MemoryIndex::default());

    let err = pipeline(&embedder, &index, 100)
        .ingest_file(&temp_dir.path().join("absent.csv"), &vocab_5())
        .await
        .expect_err("should fail");

    assert_eq!(err.kind(), ErrorKind::SourceMissing);
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn reingesting_overwrites_the_same_entries() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_csv(&temp_dir, "rows.csv", &numbered_rows(4));
    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(MemoryIndex::default());
    let pipeline = pipeline(&embedder, &index, 100);

    pipeline.ingest_file(&path, &vocab_5()).await.expect("first run");
    pipeline.ingest_file(&path, &vocab_5()).await.expect("second run");

    assert_eq!(index.entries(&vocab_5()).len(), 4);
}

#[tokio::test]
async fn same_named_files_in_different_directories_keep_their_entries() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let first_dir = temp_dir.path().join("a");
    let second_dir = temp_dir.path().join("b");
    fs::create_dir_all(&first_dir).expect("should create dir");
    fs::create_dir_all(&second_dir).expect("should create dir");
    let first = first_dir.join("vocab.csv");
    let second = second_dir.join("vocab.csv");
    fs::write(&first, "text\nalpha\n").expect("should write csv");
    fs::write(&second, "text\nbeta\n").expect("should write csv");

    assert_ne!(source_key(&first), source_key(&second));

    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(MemoryIndex::default());
    let pipeline = pipeline(&embedder, &index, 100);
    pipeline.ingest_file(&first, &vocab_5()).await.expect("first file");
    pipeline.ingest_file(&second, &vocab_5()).await.expect("second file");

    let mut texts: Vec<String> = index
        .entries(&vocab_5())
        .iter()
        .filter_map(|entry| entry.metadata["text"].as_str().map(str::to_string))
        .collect();
    texts.sort();
    assert_eq!(texts, vec!["alpha".to_string(), "beta".to_string()]);
}

#[test]
fn source_key_falls_back_to_the_given_path() {
    let path = Path::new("no/such/dir/vocab.csv");
    assert_eq!(source_key(path), path.display().to_string());
}

#[tokio::test]
async fn metadata_carries_fields_and_provenance() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_csv(
        &temp_dir,
        "vocab_eiken_MVP.csv",
        "word,meaning_ja,example\napple,りんご,I eat an apple.\n",
    );
    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(MemoryIndex::default());

    pipeline(&embedder, &index, 100)
        .ingest_file(&path, &vocab_5())
        .await
        .expect("should ingest");

    let entries = index.entries(&vocab_5());
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.id, entry_key(&source_key(&path), 0));
    assert_eq!(
        entry.metadata["text"],
        "apple : りんご : I eat an apple."
    );
    assert_eq!(entry.metadata["word"], "apple");
    assert_eq!(entry.metadata["source"], "vocab_eiken_MVP.csv");
    assert_eq!(entry.metadata["row"], 0);
    assert!(entry.metadata.contains_key("ingested_at"));
}

#[tokio::test]
async fn sources_continue_after_missing_and_failed_files() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let good = write_csv(&temp_dir, "good.csv", &numbered_rows(2));
    let utf16: Vec<u8> = [0xFF, 0xFE]
        .into_iter()
        .chain("text\nhi\n".encode_utf16().flat_map(u16::to_le_bytes))
        .collect();
    let bad = temp_dir.path().join("utf16.csv");
    fs::write(&bad, utf16).expect("should write");

    let source = |path: PathBuf, mode: &str| IngestSource {
        path,
        level: "3級".to_string(),
        mode: mode.to_string(),
    };
    let sources = vec![
        source(temp_dir.path().join("absent.csv"), "語彙"),
        source(bad.clone(), "長文"),
        source(good.clone(), "文法"),
        source(good.clone(), "リスニング"),
    ];

    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(MemoryIndex::default());
    let summary = pipeline(&embedder, &index, 100)
        .ingest_sources(&sources)
        .await;

    assert_eq!(summary.missing, vec![temp_dir.path().join("absent.csv")]);
    assert_eq!(summary.failures.len(), 2);
    assert_eq!(summary.failures[0].kind, ErrorKind::Encoding);
    assert_eq!(summary.failures[1].kind, ErrorKind::UnknownSelection);
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.total_stored(), 2);
    assert!(!summary.is_clean());

    let listening = resolve_namespace("3級", "リスニング").expect("known selection");
    assert_eq!(index.entries(&listening).len(), 2);
}

#[test]
fn from_config_applies_settings() {
    let config = IngestConfig {
        batch_size: 7,
        on_embed_error: OnEmbedError::Skip,
        sources: Vec::new(),
    };
    let pipeline = IngestionPipeline::from_config(
        Arc::new(FakeEmbedder::default()),
        Arc::new(MemoryIndex::default()),
        &config,
    );
    assert_eq!(pipeline.batch_size, 7);
    assert_eq!(pipeline.on_embed_error, OnEmbedError::Skip);
}
