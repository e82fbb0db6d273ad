//! Tests for acknowledgement tracking

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::*;

// ============================================================================
// Helpers
// ============================================================================

/// Records every callback outcome
#[derive(Clone, Default)]
struct Outcomes(Arc<Mutex<Vec<bool>>>);

impl Outcomes {
    fn callback(&self) -> impl FnOnce(bool) + Send + 'static {
        let outcomes = self.0.clone();
        move |success| outcomes.lock().push(success)
    }

    fn get(&self) -> Vec<bool> {
        self.0.lock().clone()
    }
}

fn set_with(outcomes: &Outcomes) -> AcknowledgementSet {
    AcknowledgementSet::new(1, Duration::from_secs(60), outcomes.callback())
}

// ============================================================================
// Set completion
// ============================================================================

#[test]
fn test_set_completes_after_all_released_and_sealed() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    let a = EventHandle::new();
    let b = EventHandle::new();
    set.add(&a);
    set.add(&b);
    set.seal();

    a.release(true);
    assert!(outcomes.get().is_empty());
    assert_eq!(set.pending(), 1);

    b.release(true);
    assert_eq!(outcomes.get(), vec![true]);
    assert!(set.is_completed());
}

#[test]
fn test_set_waits_for_seal() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    let a = EventHandle::new();
    set.add(&a);
    a.release(true);
    assert!(outcomes.get().is_empty());

    set.seal();
    assert_eq!(outcomes.get(), vec![true]);
}

#[test]
fn test_empty_sealed_set_completes_immediately() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    set.seal();
    assert_eq!(outcomes.get(), vec![true]);
}

#[test]
fn test_any_failure_fails_set() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    let a = EventHandle::new();
    let b = EventHandle::new();
    set.add(&a);
    set.add(&b);
    set.seal();

    a.release(false);
    b.release(true);
    assert_eq!(outcomes.get(), vec![false]);
}

#[test]
fn test_release_is_idempotent() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    let a = EventHandle::new();
    let b = EventHandle::new();
    set.add(&a);
    set.add(&b);
    set.seal();

    a.release(true);
    a.release(true);
    a.clone().release(true);
    assert_eq!(set.pending(), 1);
    assert!(outcomes.get().is_empty());
}

#[test]
fn test_add_released_handle_is_ignored() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    let a = EventHandle::new();
    a.release(true);
    set.add(&a);
    assert_eq!(set.pending(), 0);
}

// ============================================================================
// Fan-out / fan-in
// ============================================================================

#[test]
fn test_derive_tracks_children() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    let parent = EventHandle::new();
    set.add(&parent);
    set.seal();

    let child_a = parent.derive();
    let child_b = parent.derive();
    assert_eq!(set.pending(), 3);

    // Parent dropped by a splitting processor
    parent.release(true);
    child_a.release(true);
    assert!(outcomes.get().is_empty());

    child_b.release(true);
    assert_eq!(outcomes.get(), vec![true]);
}

#[test]
fn test_derive_from_released_handle_is_untracked() {
    let outcomes = Outcomes::default();
    let set = set_with(&outcomes);
    let parent = EventHandle::new();
    set.add(&parent);
    parent.release(true);

    let child = parent.derive();
    assert_eq!(child.set_count(), 0);
    assert_eq!(set.pending(), 0);
}

#[test]
fn test_merge_spans_multiple_sets() {
    let first = Outcomes::default();
    let second = Outcomes::default();
    let set_a = AcknowledgementSet::new(1, Duration::from_secs(60), first.callback());
    let set_b = AcknowledgementSet::new(2, Duration::from_secs(60), second.callback());

    let a = EventHandle::new();
    let b = EventHandle::new();
    set_a.add(&a);
    set_b.add(&b);
    set_a.seal();
    set_b.seal();

    // Aggregate output carries responsibility for both inputs
    let combined = EventHandle::new();
    combined.merge(&a);
    combined.merge(&b);
    combined.merge(&b);
    assert_eq!(combined.set_count(), 2);

    a.release(true);
    b.release(true);
    assert!(first.get().is_empty());
    assert!(second.get().is_empty());

    combined.release(true);
    assert_eq!(first.get(), vec![true]);
    assert_eq!(second.get(), vec![true]);
}

// ============================================================================
// Manager and expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_manager_expires_overdue_sets() {
    let manager = AcknowledgementManager::new(Duration::from_secs(5));
    let outcomes = Outcomes::default();
    let set = manager.create(outcomes.callback());
    let handle = EventHandle::new();
    set.add(&handle);
    set.seal();

    assert_eq!(manager.sweep(Instant::now()), 0);
    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(manager.sweep(Instant::now()), 1);
    assert_eq!(outcomes.get(), vec![false]);
    assert_eq!(manager.outstanding(), 0);
    assert_eq!(manager.metrics().expired(), 1);
    assert_eq!(manager.metrics().failed(), 1);

    // Late release has no further effect
    handle.release(true);
    assert_eq!(outcomes.get(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_manager_forgets_completed_sets() {
    let manager = AcknowledgementManager::new(Duration::from_secs(5));
    let set = manager.create(|_| {});
    set.seal();
    assert_eq!(manager.outstanding(), 1);

    manager.sweep(Instant::now());
    assert_eq!(manager.outstanding(), 0);
    assert_eq!(manager.metrics().succeeded(), 1);
    assert_eq!(manager.metrics().created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_task_expires_sets() {
    let manager = AcknowledgementManager::new(Duration::from_millis(100));
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let set = manager.create(move |success| {
        assert!(!success);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    set.add(&EventHandle::new());
    set.seal();

    let cancel = CancellationToken::new();
    let task = manager.spawn_sweeper(Duration::from_millis(50), cancel.clone());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    cancel.cancel();
    task.await.unwrap();
}

#[test]
fn test_callback_may_create_new_sets() {
    let manager = AcknowledgementManager::new(Duration::ZERO);
    let inner = manager.clone();
    let set = manager.create(move |_| {
        inner.create(|_| {});
    });
    set.add(&EventHandle::new());
    set.seal();

    assert_eq!(manager.sweep(Instant::now()), 1);
    assert_eq!(manager.metrics().created(), 2);
}
