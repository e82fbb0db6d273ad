//! Tests for the generator source

use super::*;
use sluice_buffer::{BoundedBuffer, Buffer, BufferConfig, GatedWriter};
use sluice_protocol::AcknowledgementManager;
use sluice_resilience::FlagBreaker;

struct Harness {
    buffer: Arc<BoundedBuffer<Event>>,
    breaker: Arc<FlagBreaker>,
    context: SourceContext,
}

fn harness(capacity: usize) -> Harness {
    let buffer = Arc::new(BoundedBuffer::new("test", BufferConfig::new(capacity)));
    let breaker = Arc::new(FlagBreaker::new("test"));
    let writer = GatedWriter::new(buffer.clone(), breaker.clone());
    let context = SourceContext::new("test", writer)
        .with_write_timeout(Duration::from_millis(50))
        .with_backoff(sluice_resilience::Backoff::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        ));
    Harness {
        buffer,
        breaker,
        context,
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

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = GeneratorConfig::default();
    assert_eq!(config.rate_per_sec, 100);
    assert_eq!(config.count, None);
    assert_eq!(config.batch_size, 100);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_plugin() {
    let plugin = PluginConfig::new("generator")
        .with_option("rate_per_sec", 0)
        .with_option("count", 50)
        .with_option("key_field", "trace_id")
        .with_option("key_space", 4);

    let config = GeneratorConfig::try_from(&plugin).unwrap();
    assert_eq!(config.rate_per_sec, 0);
    assert_eq!(config.count, Some(50));
    assert_eq!(config.key_field, "trace_id");
    assert_eq!(config.key_space, 4);
}

#[test]
fn test_config_rejects_invalid() {
    let negative = PluginConfig::new("generator").with_option("count", -1);
    assert!(GeneratorConfig::try_from(&negative).unwrap_err().contains("negative"));

    let zero_batch = PluginConfig::new("generator").with_option("batch_size", 0);
    assert!(GeneratorConfig::try_from(&zero_batch).is_err());

    assert!(GeneratorSource::new(GeneratorConfig::default().with_keys("k", 0)).is_err());
}

#[test]
fn test_event_shape() {
    let config = GeneratorConfig::default().with_keys("trace_id", 4);
    let event = config.event(6);

    assert_eq!(event.event_type(), "log");
    assert_eq!(event.get("sequence").unwrap(), &json!(6));
    assert_eq!(event.get("trace_id").unwrap(), "key-2");
    assert_eq!(event.get("message").unwrap(), "generated event 6");
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_emits_count_then_finishes() {
    let h = harness(100);
    let source = GeneratorSource::new(
        GeneratorConfig::default()
            .with_rate(0)
            .with_count(10)
            .with_batch_size(4),
    )
    .unwrap();

    source.start(h.context.clone()).await.unwrap();
    wait_for(|| h.buffer.len() == 10).await;
    wait_for(|| !source.is_running()).await;

    let (records, _) = h.buffer.read(100, Duration::from_millis(10)).await.unwrap();
    let sequences: Vec<u64> = records
        .iter()
        .map(|r| r.data().get("sequence").unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(sequences, (0..10).collect::<Vec<_>>());

    let snapshot = source.metrics();
    assert_eq!(snapshot.records_written, 10);
    assert_eq!(snapshot.batches_written, 3);

    source.stop().await;
    source.stop().await;
}

#[tokio::test]
async fn test_start_twice_fails() {
    let h = harness(100);
    let source = GeneratorSource::new(GeneratorConfig::default().with_rate(10)).unwrap();

    source.start(h.context.clone()).await.unwrap();
    let err = source.start(h.context.clone()).await.unwrap_err();
    assert!(matches!(err, SourceError::AlreadyRunning(_)));

    source.stop().await;
    assert!(!source.is_running());
}

#[tokio::test]
async fn test_open_breaker_pauses_generation() {
    let h = harness(100);
    h.breaker.open();

    let source = GeneratorSource::new(
        GeneratorConfig::default()
            .with_rate(0)
            .with_count(5)
            .with_batch_size(5),
    )
    .unwrap();
    source.start(h.context.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.buffer.len(), 0);

    h.breaker.close();
    wait_for(|| h.buffer.len() == 5).await;

    source.stop().await;
}

#[tokio::test]
async fn test_acknowledgement_sets_per_batch() {
    let h = harness(100);
    let manager = AcknowledgementManager::new(Duration::from_secs(60));
    let context = h.context.clone().with_acknowledgements(manager.clone());

    let source = GeneratorSource::new(
        GeneratorConfig::default()
            .with_rate(0)
            .with_count(6)
            .with_batch_size(3),
    )
    .unwrap();
    source.start(context).await.unwrap();
    wait_for(|| h.buffer.len() == 6).await;

    let (records, state) = h.buffer.read(6, Duration::from_millis(10)).await.unwrap();
    // first batch delivered, second failed downstream
    for (i, record) in records.iter().enumerate() {
        record.data().handle().unwrap().release(i < 3);
    }
    h.buffer.checkpoint(&state).unwrap();

    let snapshot = source.metrics();
    assert_eq!(snapshot.acknowledged_sets, 1);
    assert_eq!(snapshot.failed_sets, 1);
    assert_eq!(manager.metrics().created(), 2);

    source.stop().await;
}

#[tokio::test]
async fn test_stop_while_blocked_on_full_buffer() {
    let h = harness(2);
    let source = GeneratorSource::new(
        GeneratorConfig::default()
            .with_rate(0)
            .with_batch_size(2),
    )
    .unwrap();

    source.start(h.context.clone()).await.unwrap();
    wait_for(|| h.buffer.len() == 2).await;

    tokio::time::timeout(Duration::from_secs(2), source.stop())
        .await
        .unwrap();
    assert!(!source.is_running());
    assert!(source.metrics().write_errors >= 1);
}

#[test]
fn test_factory() {
    let source = GeneratorFactory
        .create(&PluginConfig::new("generator"))
        .unwrap();
    assert_eq!(source.name(), "generator");
}
