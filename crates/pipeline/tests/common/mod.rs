//! Test doubles shared by the engine integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_pipeline::PipelineBuilder;
use sluice_protocol::{Event, Record};
use sluice_sinks::{
    DeadLetterEntry, DeadLetterQueue, MetricsSnapshot, Sink, SinkError, SinkMetrics, SinkResult,
};
use sluice_sources::{
    GeneratorConfig, GeneratorSource, MetricsSnapshot as SourceSnapshot, Source, SourceContext,
    SourceError, SourceResult,
};
use sluice_transform::{ProcessorError, ProcessorFuture};

// =============================================================================
// Sinks
// =============================================================================

/// Sink that keeps every event it accepts
pub struct CollectSink {
    name: String,
    events: Mutex<Vec<Event>>,
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    broken_init: bool,
    delay: Option<Duration>,
    init_delay: Option<Duration>,
    shut_down: AtomicBool,
    metrics: SinkMetrics,
}

impl CollectSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            broken_init: false,
            delay: None,
            init_delay: None,
            shut_down: AtomicBool::new(false),
            metrics: SinkMetrics::new(),
        }
    }

    /// Fail the next `n` writes
    pub fn failing(self, n: u32) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    pub fn broken(self) -> Self {
        self.always_fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn broken_init(mut self) -> Self {
        self.broken_init = true;
        self
    }

    /// Sleep before every write
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep inside `initialize`
    pub fn slow_init(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn heal(&self) {
        self.always_fail.store(false, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// `sequence` field of every accepted event, in arrival order
    pub fn sequences(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.get("sequence").ok().and_then(|v| v.as_u64()))
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for CollectSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> SinkResult<()> {
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken_init {
            return Err(SinkError::init("connection refused"));
        }
        Ok(())
    }

    async fn output(&self, records: &[Record<Event>]) -> SinkResult<()> {
        self.metrics.batch_received();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.always_fail.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            self.metrics.write_error();
            return Err(SinkError::write("downstream unavailable"));
        }

        self.events
            .lock()
            .extend(records.iter().map(|r| r.data().clone()));
        self.metrics.batch_written(records.len() as u64, 0);
        Ok(())
    }

    async fn shutdown(&self) -> SinkResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Dead-letter queue kept in memory
#[derive(Default)]
pub struct MemoryDeadLetter {
    entries: Mutex<Vec<DeadLetterEntry>>,
    written: AtomicU64,
    broken: bool,
}

impl MemoryDeadLetter {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl DeadLetterQueue for MemoryDeadLetter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, entries: &[DeadLetterEntry]) -> SinkResult<()> {
        if self.broken {
            return Err(SinkError::write("disk full"));
        }
        self.written
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        self.entries.lock().extend(entries.iter().cloned());
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Generator emitting `count` events with keys `key-0 .. key-{key_space - 1}`
pub fn generator(count: u64, key_space: u64) -> Box<dyn Source> {
    let config = GeneratorConfig::default()
        .with_rate(0)
        .with_count(count)
        .with_batch_size(10)
        .with_keys("trace_id", key_space);
    Box::new(GeneratorSource::new(config).unwrap())
}

/// Source whose start always fails
pub struct BrokenSource;

#[async_trait]
impl Source for BrokenSource {
    fn name(&self) -> &str {
        "broken"
    }

    async fn start(&self, _context: SourceContext) -> SourceResult<()> {
        Err(SourceError::config("address already in use"))
    }

    async fn stop(&self) {}

    fn metrics(&self) -> SourceSnapshot {
        SourceSnapshot::default()
    }
}

// =============================================================================
// Processors
// =============================================================================

/// Tags events with an odd `sequence` as failed
pub struct TagOdd;

impl sluice_transform::Processor for TagOdd {
    fn execute<'a>(&'a self, mut records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move {
            for record in &mut records {
                let odd = record
                    .data()
                    .get("sequence")
                    .ok()
                    .and_then(|v| v.as_u64())
                    .is_some_and(|s| s % 2 == 1);
                if odd {
                    record.data_mut().tag_failure("odd sequence");
                }
            }
            Ok(records)
        })
    }

    fn name(&self) -> &'static str {
        "tag_odd"
    }
}

/// Fails the first `n` non-empty batches
pub struct FailFirst {
    remaining: AtomicU32,
}

impl FailFirst {
    pub fn new(n: u32) -> Self {
        Self {
            remaining: AtomicU32::new(n),
        }
    }
}

impl sluice_transform::Processor for FailFirst {
    fn execute<'a>(&'a self, records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move {
            if !records.is_empty()
                && self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(ProcessorError::failed("lookup table unavailable"));
            }
            Ok(records)
        })
    }

    fn name(&self) -> &'static str {
        "fail_first"
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Builder with short timeouts so tests finish quickly
pub fn builder(name: &str) -> PipelineBuilder {
    PipelineBuilder::new(name)
        .with_workers(1)
        .with_batch_size(25)
        .with_read_timeout(Duration::from_millis(20))
        .with_drain_timeout(Duration::from_secs(5))
        .with_shutdown_grace(Duration::from_secs(5))
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
