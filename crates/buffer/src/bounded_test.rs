//! Tests for the bounded buffer

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;

use super::*;

// ============================================================================
// Helpers
// ============================================================================

fn buffer(capacity: usize) -> BoundedBuffer<u32> {
    BoundedBuffer::new("test", BufferConfig::new(capacity))
}

fn records(range: std::ops::Range<u32>) -> Vec<Record<u32>> {
    range.map(Record::new).collect()
}

fn values(records: &[Record<u32>]) -> Vec<u32> {
    records.iter().map(|r| *r.data()).collect()
}

// ============================================================================
// Capacity and admission
// ============================================================================

#[tokio::test]
async fn test_capacity_scenario() {
    let buffer = buffer(100);
    for i in 0..100 {
        buffer.write(Record::new(i), Duration::ZERO).await.unwrap();
    }

    let err = buffer.write(Record::new(100), Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, BufferError::Full { capacity: 100, .. }));

    let (batch, state) = buffer.read(50, Duration::from_secs(1)).await.unwrap();
    assert_eq!(batch.len(), 50);
    assert_eq!(state.count(), 50);
    assert_eq!(buffer.len(), 100);

    buffer.checkpoint(&state).unwrap();
    assert_eq!(buffer.len(), 50);

    buffer.write(Record::new(100), Duration::ZERO).await.unwrap();
    assert_eq!(buffer.len(), 51);
    assert_eq!(buffer.metrics().snapshot().write_timeouts, 1);
}

#[tokio::test]
async fn test_in_flight_records_hold_capacity() {
    let buffer = buffer(2);
    buffer.write_all(records(0..2), Duration::ZERO).await.unwrap();
    let (_batch, _state) = buffer.read(2, Duration::ZERO).await.unwrap();

    assert_eq!(buffer.available(), 0);
    assert_eq!(buffer.in_flight(), 2);
    assert!(buffer.write(Record::new(9), Duration::ZERO).await.is_err());
}

#[tokio::test]
async fn test_write_all_is_all_or_nothing() {
    let buffer = buffer(10);
    buffer.write_all(records(0..8), Duration::ZERO).await.unwrap();

    let err = buffer
        .write_all(records(8..11), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(buffer.len(), 8);

    buffer.write_all(records(8..10), Duration::ZERO).await.unwrap();
    assert_eq!(buffer.len(), 10);
}

#[tokio::test]
async fn test_unadmittable_writes_fail_fast() {
    let buffer = buffer(3);
    let err = buffer
        .write_all(records(0..4), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, BufferError::Write(_)));

    let empty = BoundedBuffer::<u32>::new("zero", BufferConfig::new(0));
    let err = empty
        .write(Record::new(1), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, BufferError::Write(_)));
}

#[tokio::test]
async fn test_max_bytes_bound() {
    let buffer = BoundedBuffer::<String>::new("bytes", BufferConfig::new(100).with_max_bytes(10))
        .with_weigher(String::len);

    buffer
        .write(Record::new("abcdef".to_string()), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(buffer.occupied_bytes(), 6);

    let err = buffer
        .write(Record::new("ghijk".to_string()), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, BufferError::Full { .. }));

    let err = buffer
        .write(Record::new("x".repeat(11)), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, BufferError::Write(_)));

    let (_, state) = buffer.read(10, Duration::ZERO).await.unwrap();
    buffer.checkpoint(&state).unwrap();
    assert_eq!(buffer.occupied_bytes(), 0);
}

#[tokio::test]
async fn test_blocked_writer_resumes_after_checkpoint() {
    let buffer = Arc::new(buffer(2));
    buffer.write_all(records(0..2), Duration::ZERO).await.unwrap();
    let (_, state) = buffer.read(2, Duration::ZERO).await.unwrap();

    let writer = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.write(Record::new(2), Duration::from_secs(10)).await })
    };
    tokio::task::yield_now().await;

    buffer.checkpoint(&state).unwrap();
    writer.await.unwrap().unwrap();
    assert_eq!(buffer.len(), 1);
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_read_respects_batch_size_and_order() {
    let buffer = buffer(20);
    buffer.write_all(records(0..10), Duration::ZERO).await.unwrap();

    let (first, _) = buffer.read(4, Duration::ZERO).await.unwrap();
    let (second, _) = buffer.read(100, Duration::ZERO).await.unwrap();
    assert_eq!(values(&first), vec![0, 1, 2, 3]);
    assert_eq!(values(&second), vec![4, 5, 6, 7, 8, 9]);
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout_returns_empty_state() {
    let buffer = buffer(10);
    let started = Instant::now();

    let (batch, state) = buffer.read(10, Duration::from_millis(200)).await.unwrap();
    assert!(batch.is_empty());
    assert!(state.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(200));

    buffer.checkpoint(&state).unwrap();
}

#[tokio::test]
async fn test_blocked_reader_wakes_on_write() {
    let buffer = Arc::new(buffer(10));
    let reader = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.read(5, Duration::from_secs(10)).await })
    };
    tokio::task::yield_now().await;

    buffer.write(Record::new(42), Duration::ZERO).await.unwrap();
    let (batch, state) = reader.await.unwrap().unwrap();
    assert_eq!(values(&batch), vec![42]);
    assert_eq!(state.count(), 1);
}

// ============================================================================
// Checkpoints and redelivery
// ============================================================================

#[tokio::test]
async fn test_double_checkpoint_is_rejected() {
    let buffer = buffer(10);
    buffer.write_all(records(0..3), Duration::ZERO).await.unwrap();
    let (_, state) = buffer.read(3, Duration::ZERO).await.unwrap();

    buffer.checkpoint(&state).unwrap();
    let err = buffer.checkpoint(&state).unwrap_err();
    assert!(matches!(err, BufferError::InvalidCheckpoint(_)));
    assert_eq!(buffer.len(), 0);
    assert_eq!(buffer.metrics().snapshot().invalid_checkpoints, 1);
}

#[tokio::test]
async fn test_foreign_checkpoint_is_rejected() {
    let a = buffer(10);
    let b = buffer(10);
    a.write(Record::new(1), Duration::ZERO).await.unwrap();
    b.write(Record::new(1), Duration::ZERO).await.unwrap();
    let (_, state) = a.read(1, Duration::ZERO).await.unwrap();

    assert!(matches!(
        b.checkpoint(&state),
        Err(BufferError::InvalidCheckpoint(_))
    ));
    assert_eq!(b.len(), 1);
    a.checkpoint(&state).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_uncommitted_window_is_redelivered() {
    let buffer = BoundedBuffer::new(
        "redeliver",
        BufferConfig::new(10).with_redelivery_timeout(Duration::from_secs(1)),
    );
    buffer.write_all(records(0..5), Duration::ZERO).await.unwrap();

    // Worker reads three and never checkpoints
    let (lost, stale) = buffer.read(3, Duration::ZERO).await.unwrap();
    assert_eq!(values(&lost), vec![0, 1, 2]);

    tokio::time::advance(Duration::from_secs(2)).await;

    let (again, state) = buffer.read(10, Duration::ZERO).await.unwrap();
    assert_eq!(values(&again), vec![0, 1, 2, 3, 4]);
    assert_eq!(buffer.metrics().snapshot().records_redelivered, 3);

    assert!(buffer.checkpoint(&stale).is_err());
    assert_eq!(buffer.len(), 5);

    buffer.checkpoint(&state).unwrap();
    assert!(buffer.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_waiting_reader_picks_up_redelivery() {
    let buffer = BoundedBuffer::new(
        "redeliver",
        BufferConfig::new(10).with_redelivery_timeout(Duration::from_millis(500)),
    );
    buffer.write_all(records(0..2), Duration::ZERO).await.unwrap();
    let (_, _abandoned) = buffer.read(2, Duration::ZERO).await.unwrap();

    let (batch, _) = buffer.read(10, Duration::from_secs(5)).await.unwrap();
    assert_eq!(values(&batch), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_expired_window_commits_until_reclaimed() {
    let buffer = BoundedBuffer::new(
        "late",
        BufferConfig::new(10).with_redelivery_timeout(Duration::from_millis(100)),
    );
    buffer.write_all(records(0..2), Duration::ZERO).await.unwrap();
    let (_, state) = buffer.read(2, Duration::ZERO).await.unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    buffer.checkpoint(&state).unwrap();
    assert!(buffer.is_empty());
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_writes_and_drains_reads() {
    let buffer = buffer(10);
    buffer.write_all(records(0..2), Duration::ZERO).await.unwrap();
    buffer.shutdown();
    assert!(buffer.is_shut_down());

    assert_eq!(
        buffer.write(Record::new(9), Duration::ZERO).await,
        Err(BufferError::ShutDown)
    );

    let (batch, state) = buffer.read(10, Duration::from_secs(60)).await.unwrap();
    assert_eq!(values(&batch), vec![0, 1]);
    buffer.checkpoint(&state).unwrap();

    let started = Instant::now();
    let (batch, _) = buffer.read(10, Duration::from_secs(60)).await.unwrap();
    assert!(batch.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_shutdown_wakes_blocked_writer() {
    let buffer = Arc::new(buffer(1));
    buffer.write(Record::new(0), Duration::ZERO).await.unwrap();

    let writer = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.write(Record::new(1), Duration::from_secs(60)).await })
    };
    tokio::task::yield_now().await;

    buffer.shutdown();
    assert_eq!(writer.await.unwrap(), Err(BufferError::ShutDown));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_readers_no_loss_no_duplicates() {
    const WRITERS: u32 = 4;
    const PER_WRITER: u32 = 250;
    const TOTAL: usize = (WRITERS * PER_WRITER) as usize;

    let buffer = Arc::new(buffer(64));
    let collected = Arc::new(Mutex::new(Vec::with_capacity(TOTAL)));
    let seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for w in 0..WRITERS {
        let buffer = Arc::clone(&buffer);
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_WRITER {
                buffer
                    .write(Record::new(w * PER_WRITER + i), Duration::from_secs(10))
                    .await
                    .unwrap();
            }
        }));
    }
    for _ in 0..4 {
        let buffer = Arc::clone(&buffer);
        let collected = Arc::clone(&collected);
        let seen = Arc::clone(&seen);
        tasks.push(tokio::spawn(async move {
            while seen.load(Ordering::SeqCst) < TOTAL {
                let (batch, state) = buffer.read(16, Duration::from_millis(20)).await.unwrap();
                seen.fetch_add(batch.len(), Ordering::SeqCst);
                collected.lock().extend(values(&batch));
                buffer.checkpoint(&state).unwrap();
            }
        }));
    }
    for task in futures_util::future::join_all(tasks).await {
        task.unwrap();
    }

    let collected = collected.lock();
    let unique: HashSet<u32> = collected.iter().copied().collect();
    assert_eq!(collected.len(), TOTAL);
    assert_eq!(unique.len(), TOTAL);
    assert!(buffer.is_empty());
}
