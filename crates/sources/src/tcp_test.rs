//! TCP source tests

use super::*;
use sluice_buffer::{BoundedBuffer, Buffer, BufferConfig, GatedWriter};
use sluice_resilience::FlagBreaker;
use tokio::io::AsyncWriteExt;

// ============================================================================
// Helper Functions
// ============================================================================

fn context(buffer: &Arc<BoundedBuffer<Event>>) -> SourceContext {
    let breaker = Arc::new(FlagBreaker::new("test"));
    SourceContext::new("test", GatedWriter::new(buffer.clone(), breaker))
        .with_write_timeout(Duration::from_millis(50))
}

fn local_config() -> TcpSourceConfig {
    TcpSourceConfig {
        flush_interval: Duration::from_millis(20),
        ..TcpSourceConfig::with_address("127.0.0.1:0")
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn started_source(buffer: &Arc<BoundedBuffer<Event>>) -> (TcpSource, SocketAddr) {
    let source = TcpSource::new(local_config()).unwrap();
    source.start(context(buffer)).await.unwrap();
    let addr = source.local_addr().unwrap();
    (source, addr)
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_config_default() {
    let config = TcpSourceConfig::default();

    assert_eq!(config.address, "0.0.0.0:5170");
    assert_eq!(config.batch_size, 500);
    assert_eq!(config.flush_interval, Duration::from_millis(100));
    assert!(config.keepalive);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_plugin() {
    let plugin = PluginConfig::new("tcp")
        .with_option("address", "127.0.0.1:9000")
        .with_option("batch_size", 10)
        .with_option("flush_interval_ms", 5)
        .with_option("keepalive", false);

    let config = TcpSourceConfig::try_from(&plugin).unwrap();
    assert_eq!(config.address, "127.0.0.1:9000");
    assert_eq!(config.batch_size, 10);
    assert_eq!(config.flush_interval, Duration::from_millis(5));
    assert!(!config.keepalive);
}

#[test]
fn test_config_rejects_invalid() {
    let zero = PluginConfig::new("tcp").with_option("batch_size", 0);
    assert!(TcpSourceConfig::try_from(&zero).is_err());

    let negative = PluginConfig::new("tcp").with_option("max_line_bytes", -1);
    assert!(
        TcpSourceConfig::try_from(&negative)
            .unwrap_err()
            .contains("negative")
    );
}

// ============================================================================
// Parsing Tests
// ============================================================================

#[test]
fn test_parse_line_object() {
    let event = parse_line(br#"{"message":"hi","n":1}"#, "log").unwrap();
    assert_eq!(event.event_type(), "log");
    assert_eq!(event.get("message").unwrap(), "hi");
}

#[test]
fn test_parse_line_rejects_non_objects() {
    assert!(parse_line(b"[1,2]", "log").unwrap_err().contains("an array"));
    assert!(parse_line(b"42", "log").unwrap_err().contains("a number"));
    assert!(parse_line(b"{not json", "log").is_err());
}

#[test]
fn test_trim_line() {
    assert_eq!(trim_line(b"  {}\r"), b"{}");
    assert!(trim_line(b" \t").is_empty());
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_receives_lines() {
    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(100)));
    let (source, addr) = started_source(&buffer).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"{\"n\":1}\n{\"n\":2}\r\n\n{\"n\":3}\n")
        .await
        .unwrap();

    wait_for(|| buffer.len() == 3).await;

    let (records, _) = buffer.read(10, Duration::from_millis(10)).await.unwrap();
    let ns: Vec<u64> = records
        .iter()
        .map(|r| r.data().get("n").unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(ns, vec![1, 2, 3]);

    let snapshot = source.metrics();
    assert_eq!(snapshot.records_received, 3);
    assert_eq!(snapshot.connections_total, 1);

    source.stop().await;
}

#[tokio::test]
async fn test_invalid_lines_skipped() {
    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(100)));
    let (source, addr) = started_source(&buffer).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"garbage\n[1]\n{\"ok\":true}\n")
        .await
        .unwrap();

    wait_for(|| buffer.len() == 1).await;
    assert_eq!(source.metrics().invalid_records, 2);

    source.stop().await;
}

#[tokio::test]
async fn test_line_split_across_writes() {
    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(100)));
    let (source, addr) = started_source(&buffer).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"{\"message\":\"par").await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    client.write_all(b"tial\"}\n").await.unwrap();

    wait_for(|| buffer.len() == 1).await;
    let (records, _) = buffer.read(1, Duration::from_millis(10)).await.unwrap();
    assert_eq!(records[0].data().get("message").unwrap(), "partial");

    source.stop().await;
}

#[tokio::test]
async fn test_final_line_without_newline() {
    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(100)));
    let (source, addr) = started_source(&buffer).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"{\"last\":1}").await.unwrap();
    client.shutdown().await.unwrap();

    wait_for(|| buffer.len() == 1).await;
    source.stop().await;
}

#[tokio::test]
async fn test_oversized_line_discarded() {
    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(100)));
    let source = TcpSource::new(TcpSourceConfig {
        max_line_bytes: 16,
        ..local_config()
    })
    .unwrap();
    source.start(context(&buffer)).await.unwrap();
    let addr = source.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let long = format!("{{\"pad\":\"{}\"}}\n{{\"n\":1}}\n", "x".repeat(100));
    client.write_all(long.as_bytes()).await.unwrap();

    wait_for(|| buffer.len() == 1).await;
    assert_eq!(source.metrics().invalid_records, 1);

    source.stop().await;
}

#[tokio::test]
async fn test_bind_error() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(10)));
    let source = TcpSource::new(TcpSourceConfig::with_address(addr.to_string())).unwrap();

    let err = source.start(context(&buffer)).await.unwrap_err();
    assert!(matches!(err, SourceError::Bind { .. }));
    assert!(source.local_addr().is_none());
}

#[tokio::test]
async fn test_stop_closes_connections() {
    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(100)));
    let (source, addr) = started_source(&buffer).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_for(|| source.metrics().connections_active == 1).await;

    tokio::time::timeout(Duration::from_secs(2), source.stop())
        .await
        .unwrap();

    let mut buf = [0u8; 8];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(source.metrics().connections_active, 0);

    // idempotent
    source.stop().await;
}
