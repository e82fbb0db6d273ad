//! Tests for filter processor

use super::*;
use serde_json::{Value, json};
use sluice_protocol::{AcknowledgementSet, EventHandle};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn record(value: Value) -> Record<Event> {
    Record::new(Event::from_value("log", value).unwrap())
}

fn field(records: &[Record<Event>], name: &str) -> Vec<Value> {
    records
        .iter()
        .map(|r| r.data().get(name).cloned().unwrap_or(Value::Null))
        .collect()
}

// =============================================================================
// Actions
// =============================================================================

#[tokio::test]
async fn test_drop_matching() {
    let config = FilterConfig::new().with_condition(Condition::eq("level", "debug").unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let out = processor
        .execute(vec![
            record(json!({"level": "debug"})),
            record(json!({"level": "info"})),
            record(json!({"level": "debug"})),
            record(json!({"level": "error"})),
        ])
        .await
        .unwrap();

    assert_eq!(field(&out, "level"), vec![json!("info"), json!("error")]);
    let metrics = processor.metrics();
    assert_eq!(metrics.records_dropped, 2);
    assert_eq!(metrics.records_passed, 2);
    assert!((metrics.drop_rate() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_keep_matching() {
    let config = FilterConfig::new()
        .with_action(FilterAction::Keep)
        .with_condition(Condition::eq("level", "error").unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let out = processor
        .execute(vec![
            record(json!({"level": "info"})),
            record(json!({"level": "error"})),
        ])
        .await
        .unwrap();

    assert_eq!(field(&out, "level"), vec![json!("error")]);
}

#[tokio::test]
async fn test_tag_matching() {
    let config = FilterConfig::new()
        .with_action(FilterAction::Tag)
        .with_tag_reason("missing tenant")
        .with_condition(Condition::ne("tenant", "acme").unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let out = processor
        .execute(vec![
            record(json!({"tenant": "acme", "n": 1})),
            record(json!({"n": 2})),
        ])
        .await
        .unwrap();

    assert_eq!(out.len(), 2);
    assert!(!out[0].data().is_failed());
    assert!(out[1].data().is_failed());
    assert_eq!(out[1].data().failure_reason(), Some("missing tenant"));
    assert_eq!(processor.metrics().records_tagged, 1);
    assert_eq!(processor.metrics().records_passed, 1);
}

#[tokio::test]
async fn test_preserves_order() {
    let config = FilterConfig::new().with_condition(Condition::eq("drop", "true").unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let input: Vec<_> = (0..20)
        .map(|i| record(json!({"seq": i, "drop": i % 3 == 0})))
        .collect();
    let out = processor.execute(input).await.unwrap();

    let expected: Vec<Value> = (0..20).filter(|i| i % 3 != 0).map(|i| json!(i)).collect();
    assert_eq!(field(&out, "seq"), expected);
}

// =============================================================================
// Match modes
// =============================================================================

#[tokio::test]
async fn test_match_all() {
    let config = FilterConfig::new()
        .with_match_mode(MatchMode::All)
        .with_condition(Condition::eq("level", "error").unwrap())
        .with_condition(Condition::eq("env", "prod").unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let out = processor
        .execute(vec![
            record(json!({"level": "error", "env": "prod"})),
            record(json!({"level": "error", "env": "dev"})),
        ])
        .await
        .unwrap();

    assert_eq!(field(&out, "env"), vec![json!("dev")]);
}

#[tokio::test]
async fn test_match_any() {
    let config = FilterConfig::new()
        .with_match_mode(MatchMode::Any)
        .with_condition(Condition::eq("path", "/health").unwrap())
        .with_condition(Condition::regex("path", "^/metrics").unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let out = processor
        .execute(vec![
            record(json!({"path": "/health"})),
            record(json!({"path": "/metrics/cpu"})),
            record(json!({"path": "/api/users"})),
        ])
        .await
        .unwrap();

    assert_eq!(field(&out, "path"), vec![json!("/api/users")]);
}

// =============================================================================
// Per-record failures
// =============================================================================

#[tokio::test]
async fn test_undecided_record_tagged_and_kept() {
    let config = FilterConfig::new().with_condition(Condition::gt("status", 400.0).unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let out = processor
        .execute(vec![
            record(json!({"status": "oops"})),
            record(json!({"status": 200})),
            record(json!({"status": 500})),
        ])
        .await
        .unwrap();

    // undecided kept, 200 kept, 500 dropped
    assert_eq!(out.len(), 2);
    assert!(out[0].data().is_failed());
    assert!(out[0].data().failure_reason().unwrap().contains("not numeric"));
    assert!(!out[1].data().is_failed());
    assert_eq!(processor.metrics().records_undecided, 1);
    assert_eq!(processor.metrics().records_dropped, 1);
}

// =============================================================================
// Acknowledgements
// =============================================================================

#[tokio::test]
async fn test_dropped_records_release_handles() {
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let set = AcknowledgementSet::new(1, Duration::from_secs(60), move |ok| {
        flag.store(ok, Ordering::SeqCst);
    });

    let handle = EventHandle::new();
    set.add(&handle);
    set.seal();

    let config = FilterConfig::new().with_condition(Condition::exists("noise").unwrap());
    let processor = FilterProcessor::new(config).unwrap();

    let event = Event::from_value("log", json!({"noise": true}))
        .unwrap()
        .with_handle(handle.clone());
    let out = processor.execute(vec![Record::new(event)]).await.unwrap();

    assert!(out.is_empty());
    assert!(handle.is_released());
    assert!(set.is_completed());
    assert!(done.load(Ordering::SeqCst));
}

// =============================================================================
// Factory
// =============================================================================

#[test]
fn test_factory_creates_from_plugin_config() {
    let config = PluginConfig::new("filter")
        .with_option("field", "level")
        .with_option("value", "debug");
    let processor = FilterFactory.create(&config).unwrap();
    assert_eq!(processor.name(), "filter");
}

#[test]
fn test_factory_rejects_invalid_config() {
    let result = FilterFactory.create(&PluginConfig::new("filter"));
    assert!(matches!(result, Err(ProcessorError::Config(_))));
}

#[test]
fn test_disabled_filter() {
    let config = FilterConfig::new()
        .with_condition(Condition::exists("x").unwrap())
        .disabled();
    let processor = FilterProcessor::new(config).unwrap();
    assert!(!processor.enabled());
}
