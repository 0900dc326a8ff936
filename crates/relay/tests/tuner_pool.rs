use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use tuner_relay::{TunerPool, TunerStatus, TunerStatusReporter};

/// Tracks how many slots are bound according to the reported events.
#[derive(Default)]
struct CountingReporter {
    bound: Mutex<HashSet<usize>>,
    peak: AtomicUsize,
}

impl TunerStatusReporter for CountingReporter {
    fn report_tuner_status(&self, _namespace: &str, index: usize, status: TunerStatus) {
        let mut bound = self.bound.lock();
        if status == TunerStatus::Idle {
            bound.remove(&index);
        } else {
            bound.insert(index);
        }
        self.peak.fetch_max(bound.len(), Ordering::SeqCst);
    }
}

#[test]
fn test_contended_leases_never_exceed_slot_count() {
    let reporter = Arc::new(CountingReporter::default());
    let pool = Arc::new(TunerPool::new([("X", 5)], reporter.clone()));
    let held = Arc::new(Mutex::new(HashSet::new()));
    let granted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..32)
        .map(|n| {
            let pool = Arc::clone(&pool);
            let held = Arc::clone(&held);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                for round in 0..50 {
                    if let Some(lease) = pool.lease("X", "main", &format!("{n}.{round}")) {
                        granted.fetch_add(1, Ordering::SeqCst);
                        // no other holder may have the same slot
                        assert!(held.lock().insert(lease.index()));
                        assert!(held.lock().len() <= 5);
                        thread::yield_now();
                        held.lock().remove(&lease.index());
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(granted.load(Ordering::SeqCst) >= 5);
    assert!(reporter.peak.load(Ordering::SeqCst) <= 5);
    assert!(reporter.bound.lock().is_empty());
    assert!(
        pool.snapshot("X")
            .iter()
            .all(|slot| slot.status == TunerStatus::Idle && slot.channel_number.is_none())
    );
}

#[test]
fn test_one_more_than_capacity_is_refused() {
    let reporter = Arc::new(CountingReporter::default());
    let pool = Arc::new(TunerPool::new([("X", 5)], reporter));

    let handles: Vec<_> = (0..6)
        .map(|n| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.allocate("X", "main", &format!("{n}.1")))
        })
        .collect();
    let results: Vec<Option<usize>> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let mut indexes: Vec<usize> = results.iter().flatten().copied().collect();
    indexes.sort_unstable();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
}

#[tokio::test]
async fn test_lease_released_when_task_is_aborted() {
    let pool = Arc::new(TunerPool::new(
        [("X", 1)],
        Arc::new(CountingReporter::default()),
    ));
    let lease = pool.lease("X", "main", "5.1").unwrap();
    let task = tokio::spawn(async move {
        let _lease = lease;
        std::future::pending::<()>().await;
    });
    assert!(pool.allocate("X", "main", "6.1").is_none());

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(pool.allocate("X", "main", "6.1"), Some(0));
}

#[test]
fn test_statuses_follow_session_lifecycle() {
    let reporter = Arc::new(CountingReporter::default());
    let pool = Arc::new(TunerPool::new([("X", 2)], reporter.clone()));
    let lease = pool.lease("X", "main", "5.1").unwrap();

    assert!(lease.set_status(TunerStatus::Filtered));
    assert!(!lease.set_status(TunerStatus::Filtered));
    assert!(lease.set_status(TunerStatus::NoReply));
    assert_eq!(pool.snapshot("X")[0].status, TunerStatus::NoReply);
    drop(lease);
    assert_eq!(pool.snapshot("X")[0].status, TunerStatus::Idle);
    assert!(reporter.bound.lock().is_empty());
}
