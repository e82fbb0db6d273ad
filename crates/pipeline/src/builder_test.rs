//! Tests for the pipeline builder

use super::*;
use crate::state::PipelineState;
use sluice_config::PeerForwarderConfig;
use sluice_protocol::KeyPath;
use sluice_resilience::FlagBreaker;
use sluice_sinks::NullSink;
use sluice_sources::{GeneratorConfig, GeneratorSource};
use sluice_transform::{AggregateConfig, AggregateProcessor, NoopProcessor};
use std::str::FromStr;

fn source() -> Box<dyn Source> {
    Box::new(GeneratorSource::new(GeneratorConfig::default().with_count(10)).unwrap())
}

fn aggregate() -> Box<dyn Processor> {
    let config = AggregateConfig::new(vec![KeyPath::parse("trace_id").unwrap()]);
    Box::new(AggregateProcessor::new(config).unwrap())
}

fn assert_config_error(result: Result<Pipeline>, needle: &str) {
    match result {
        Err(PipelineError::Config(msg)) => assert!(msg.contains(needle), "{msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_build_requires_source() {
    let result = PipelineBuilder::new("traces")
        .with_sink(Arc::new(NullSink::new()))
        .build();
    assert_config_error(result, "no source");
}

#[test]
fn test_build_requires_sink() {
    let result = PipelineBuilder::new("traces").with_source(source()).build();
    assert_config_error(result, "no sinks");
}

#[test]
fn test_build_rejects_zero_sizes() {
    let result = PipelineBuilder::new("traces")
        .with_source(source())
        .with_sink(Arc::new(NullSink::new()))
        .with_workers(0)
        .build();
    assert_config_error(result, "workers");

    let result = PipelineBuilder::new("traces")
        .with_source(source())
        .with_sink(Arc::new(NullSink::new()))
        .with_batch_size(0)
        .build();
    assert_config_error(result, "batch_size");
}

#[test]
fn test_batch_size_bounded_by_buffer() {
    let result = PipelineBuilder::new("traces")
        .with_source(source())
        .with_sink(Arc::new(NullSink::new()))
        .with_buffer(Arc::new(BoundedBuffer::new("small", BufferConfig::new(10))))
        .with_batch_size(11)
        .build();
    assert_config_error(result, "exceeds buffer capacity");
}

#[test]
fn test_build_defaults() {
    let pipeline = PipelineBuilder::new("traces")
        .with_source(source())
        .with_processor(Box::new(NoopProcessor))
        .with_sink(Arc::new(NullSink::new()))
        .build()
        .unwrap();

    assert_eq!(pipeline.name(), "traces");
    assert_eq!(pipeline.state(), PipelineState::Initialized);
    assert_eq!(pipeline.buffer().name(), "traces/buffer");
    assert_eq!(pipeline.buffer().capacity(), DEFAULT_CAPACITY);
    assert!(!pipeline.breaker().is_open());
    assert_eq!(pipeline.chain().names(), vec!["noop"]);
    assert!(pipeline.forwarders().is_empty());
    assert!(pipeline.acknowledgements().is_none());
    assert_eq!(pipeline.sink_metrics().len(), 1);
}

#[test]
fn test_custom_breaker_and_acknowledgements() {
    let breaker = Arc::new(FlagBreaker::new("manual"));
    let pipeline = PipelineBuilder::new("traces")
        .with_source(source())
        .with_sink(Arc::new(NullSink::new()))
        .with_breaker(breaker.clone())
        .with_acknowledgements(Duration::from_secs(5))
        .build()
        .unwrap();

    assert_eq!(pipeline.breaker().name(), "manual");
    let acks = pipeline.acknowledgements().unwrap();
    assert_eq!(acks.timeout(), Duration::from_secs(5));
}

// ============================================================================
// Forwarding registration
// ============================================================================

#[tokio::test]
async fn test_stateful_stage_gets_forwarder() {
    let config = PeerForwarderConfig {
        enabled: true,
        local_address: Some("127.0.0.1:4994".into()),
        ..PeerForwarderConfig::default()
    };
    let provider = Arc::new(
        PeerForwarderProvider::from_config(&config, Arc::new(FlagBreaker::new("peer"))).unwrap(),
    );

    let pipeline = PipelineBuilder::new("traces")
        .with_source(source())
        .with_processor(Box::new(NoopProcessor))
        .with_processor(aggregate())
        .with_sink(Arc::new(NullSink::new()))
        .with_peer_forwarding(provider.clone())
        .build()
        .unwrap();

    let forwarders = pipeline.forwarders();
    assert_eq!(forwarders.len(), 1);
    assert_eq!(forwarders[0].plugin_id(), "1-aggregate");
    assert_eq!(forwarders[0].pipeline(), "traces");
    assert!(provider.receivers().get("traces", "1-aggregate").is_some());

    provider.shutdown().await;
}

#[test]
fn test_stateful_stage_without_provider_runs_locally() {
    let pipeline = PipelineBuilder::new("traces")
        .with_source(source())
        .with_processor(aggregate())
        .with_sink(Arc::new(NullSink::new()))
        .build()
        .unwrap();

    assert!(pipeline.chain().requires_forwarding());
    assert!(pipeline.forwarders().is_empty());
}

// ============================================================================
// From configuration
// ============================================================================

#[test]
fn test_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"
[pipeline]
name = "traces"
workers = 3
batch_size = 50
acknowledgements = true

[buffer]
capacity = 500
max_bytes = 1048576

[source]
type = "generator"
count = 10

[[processors]]
type = "noop"

[[processors]]
type = "noop"
enabled = false

[[processors]]
type = "aggregate"
identification_keys = ["trace_id"]

[[sinks]]
type = "null"

[[sinks]]
type = "file"
path = "{}"

[dead_letter]
path = "{}"
"#,
        dir.path().join("out.jsonl").display(),
        dir.path().join("dlq.jsonl").display(),
    );
    let config = Config::from_str(&toml).unwrap();

    let pipeline = PipelineBuilder::from_config(&config, &Plugins::builtin())
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(pipeline.name(), "traces");
    assert_eq!(pipeline.chain().names(), vec!["noop", "aggregate"]);
    assert_eq!(pipeline.buffer().capacity(), 500);
    assert_eq!(pipeline.sink_metrics().len(), 2);
    assert!(pipeline.acknowledgements().is_some());
}

#[test]
fn test_from_config_unknown_plugin() {
    let config = Config::from_str("[source]\ntype = \"kafka\"").unwrap();

    let err = PipelineBuilder::from_config(&config, &Plugins::builtin()).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(err.to_string().contains("kafka"));
}

#[test]
fn test_plugins_debug_lists_registered_types() {
    let rendered = format!("{:?}", Plugins::builtin());
    assert!(rendered.starts_with("Plugins"));
    for name in ["generator", "tcp", "aggregate", "filter", "file", "stdout"] {
        assert!(rendered.contains(name), "{rendered}");
    }
}
