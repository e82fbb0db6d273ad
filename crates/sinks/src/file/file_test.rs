//! Tests for the file sink

use serde_json::json;
use tempfile::TempDir;

use super::*;

fn record(n: u64) -> Record<Event> {
    Record::new(Event::from_value("log", json!({"n": n})).unwrap())
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_config_from_plugin() {
    let config = PluginConfig::new("file")
        .with_option("path", "out/events.jsonl")
        .with_option("create_dirs", false);

    let config = FileSinkConfig::try_from(&config).unwrap();
    assert_eq!(config.path, PathBuf::from("out/events.jsonl"));
    assert!(!config.create_dirs);
}

#[test]
fn test_config_requires_path() {
    let err = FileSinkConfig::try_from(&PluginConfig::new("file")).unwrap_err();
    assert!(err.contains("path"));
}

#[tokio::test]
async fn test_output_before_initialize_fails() {
    let dir = TempDir::new().unwrap();
    let sink = FileSink::new(FileSinkConfig::new(dir.path().join("out.jsonl")));

    assert!(!sink.is_ready());
    let err = sink.output(&[record(1)]).await.unwrap_err();
    assert!(matches!(err, SinkError::NotReady(_)));
}

#[tokio::test]
async fn test_initialize_creates_parent_dirs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a/b/out.jsonl");
    let sink = FileSink::new(FileSinkConfig::new(&path));

    sink.initialize().await.unwrap();

    assert!(sink.is_ready());
    assert!(path.exists());
}

#[tokio::test]
async fn test_initialize_without_dirs_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing/out.jsonl");
    let sink = FileSink::new(FileSinkConfig::new(&path).with_create_dirs(false));

    let err = sink.initialize().await.unwrap_err();
    assert!(matches!(err, SinkError::Init(_)));
    assert!(!sink.is_ready());
}

#[tokio::test]
async fn test_appends_json_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.jsonl");
    let sink = FileSink::new(FileSinkConfig::new(&path));
    sink.initialize().await.unwrap();

    sink.output(&[record(1), record(2)]).await.unwrap();
    sink.output(&[record(3)]).await.unwrap();
    sink.shutdown().await.unwrap();

    assert_eq!(read_lines(&path), vec![r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#]);

    let snapshot = sink.metrics();
    assert_eq!(snapshot.batches_written, 2);
    assert_eq!(snapshot.records_written, 3);
}

#[tokio::test]
async fn test_existing_file_is_appended() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.jsonl");
    std::fs::write(&path, "{\"n\":0}\n").unwrap();

    let sink = FileSink::new(FileSinkConfig::new(&path));
    sink.initialize().await.unwrap();
    sink.output(&[record(1)]).await.unwrap();
    sink.shutdown().await.unwrap();

    assert_eq!(read_lines(&path).len(), 2);
    assert!(!sink.is_ready());
}
