//! Tests for processor chain

use super::*;
use crate::noop::NoopProcessor;
use crate::{ProcessorError, ProcessorFuture};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

fn make_records(count: usize) -> Vec<Record<Event>> {
    (0..count)
        .map(|i| Record::new(Event::from_value("log", json!({"seq": i})).unwrap()))
        .collect()
}

fn seqs(records: &[Record<Event>]) -> Vec<u64> {
    records
        .iter()
        .map(|r| r.data().get("seq").unwrap().as_u64().unwrap())
        .collect()
}

/// Appends its name to a `stages` array on every event
struct Marker(&'static str);

impl Processor for Marker {
    fn execute<'a>(&'a self, mut records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move {
            for record in &mut records {
                let data = record.data_mut().data_mut();
                let stages = data.entry("stages").or_insert_with(|| json!([]));
                if let Some(arr) = stages.as_array_mut() {
                    arr.push(json!(self.0));
                }
            }
            Ok(records)
        })
    }

    fn name(&self) -> &'static str {
        self.0
    }
}

struct Disabled;

impl Processor for Disabled {
    fn execute<'a>(&'a self, _records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async { Err(ProcessorError::failed("disabled processor executed")) })
    }

    fn name(&self) -> &'static str {
        "disabled"
    }

    fn enabled(&self) -> bool {
        false
    }
}

struct Failing;

impl Processor for Failing {
    fn execute<'a>(&'a self, _records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async { Err(ProcessorError::failed("boom")) })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[derive(Default)]
struct Overlap {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Records the maximum number of overlapping executions
struct Exclusive(Arc<Overlap>);

impl Processor for Exclusive {
    fn execute<'a>(&'a self, records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move {
            let now = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.0.active.fetch_sub(1, Ordering::SeqCst);
            Ok(records)
        })
    }

    fn name(&self) -> &'static str {
        "exclusive"
    }

    fn requires_exclusive(&self) -> bool {
        true
    }
}

struct Keyed {
    keys: Vec<KeyPath>,
    flushing: AtomicBool,
}

impl Processor for Keyed {
    fn execute<'a>(&'a self, records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move { Ok(records) })
    }

    fn name(&self) -> &'static str {
        "keyed"
    }

    fn identification_keys(&self) -> Option<&[KeyPath]> {
        Some(&self.keys)
    }

    fn prepare_for_shutdown(&self) {
        self.flushing.store(true, Ordering::SeqCst);
    }

    fn is_ready_for_shutdown(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }
}

fn keyed() -> Keyed {
    Keyed {
        keys: vec![KeyPath::parse("trace_id").unwrap()],
        flushing: AtomicBool::new(false),
    }
}

// =============================================================================
// Construction
// =============================================================================

#[tokio::test]
async fn test_empty_chain_passes_through() {
    let chain = ProcessorChain::empty();
    assert!(chain.is_empty());
    assert_eq!(chain.len(), 0);

    let out = chain.execute(make_records(3)).await.unwrap();
    assert_eq!(seqs(&out), vec![0, 1, 2]);
}

#[test]
fn test_default_chain_is_empty() {
    assert!(ProcessorChain::default().is_empty());
}

#[tokio::test]
async fn test_chain_filters_disabled() {
    let chain = ProcessorChain::new(vec![Box::new(Disabled), Box::new(NoopProcessor)]);
    assert_eq!(chain.names(), vec!["noop"]);

    let out = chain.execute(make_records(2)).await.unwrap();
    assert_eq!(out.len(), 2);
}

#[test]
fn test_get_by_name_and_index() {
    let chain = ProcessorChain::new(vec![Box::new(Marker("a")), Box::new(Marker("b"))]);
    assert_eq!(chain.get("b").map(|p| p.name()), Some("b"));
    assert!(chain.get("c").is_none());
    assert_eq!(chain.processor(0).map(|p| p.name()), Some("a"));
    assert!(chain.processor(2).is_none());
}

// =============================================================================
// Execution
// =============================================================================

#[tokio::test]
async fn test_declared_order() {
    let chain = ProcessorChain::new(vec![
        Box::new(Marker("first")),
        Box::new(Marker("second")),
        Box::new(Marker("third")),
    ]);

    let out = chain.execute(make_records(2)).await.unwrap();
    for record in &out {
        assert_eq!(
            record.data().get("stages").unwrap(),
            &json!(["first", "second", "third"])
        );
    }
    assert_eq!(seqs(&out), vec![0, 1]);
}

#[tokio::test]
async fn test_fail_fast() {
    let chain = ProcessorChain::new(vec![
        Box::new(Marker("first")),
        Box::new(Failing),
        Box::new(Marker("never")),
    ]);

    let err = chain.execute(make_records(1)).await.unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn test_execute_stage_individually() {
    let chain = ProcessorChain::new(vec![Box::new(Marker("a")), Box::new(Marker("b"))]);

    let out = chain.execute_stage(1, make_records(1)).await.unwrap();
    assert_eq!(out[0].data().get("stages").unwrap(), &json!(["b"]));

    // out of range passes through
    let out = chain.execute_stage(7, make_records(1)).await.unwrap();
    assert!(!out[0].data().contains("stages"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_stage_is_serialized() {
    let overlap = Arc::new(Overlap::default());
    let chain = Arc::new(ProcessorChain::new(vec![Box::new(Exclusive(Arc::clone(
        &overlap,
    )))]));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let chain = Arc::clone(&chain);
        tasks.push(tokio::spawn(async move {
            chain.execute(make_records(1)).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(overlap.max_active.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Forwarding and shutdown
// =============================================================================

#[test]
fn test_forwarding_stages() {
    let chain = ProcessorChain::new(vec![
        Box::new(NoopProcessor),
        Box::new(keyed()),
        Box::new(Marker("after")),
    ]);

    assert!(chain.requires_forwarding());
    assert_eq!(chain.forwarding_stages(), vec![1]);
    assert_eq!(
        chain.identification_keys(1).map(|k| k.len()),
        Some(1)
    );
    assert!(chain.identification_keys(0).is_none());
}

#[test]
fn test_no_forwarding() {
    let chain = ProcessorChain::new(vec![Box::new(NoopProcessor)]);
    assert!(!chain.requires_forwarding());
    assert!(chain.forwarding_stages().is_empty());
}

#[test]
fn test_shutdown_protocol() {
    let chain = ProcessorChain::new(vec![Box::new(NoopProcessor), Box::new(keyed())]);

    assert!(!chain.is_ready_for_shutdown());
    chain.prepare_for_shutdown();
    assert!(chain.is_ready_for_shutdown());
    chain.shutdown();
}
