//! Concurrency and lifecycle properties of the generic object pool

use esox_genericpool::{
    EvictionBatch, FactoryError, GenericObjectPool, ObjectId, PoolConfiguration, PoolError,
    PooledObjectFactory, WhenExhaustedAction,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// Records every object it makes and destroys
#[derive(Default)]
struct Tracking {
    next: AtomicUsize,
    destroyed: Mutex<Vec<usize>>,
    validate_delay: Mutex<Option<Duration>>,
    on_destroy: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

#[derive(Clone)]
struct TrackingFactory(Arc<Tracking>);

/// Pooled value: a serial number plus a flag that makes activation fail
#[derive(Debug)]
struct Resource {
    serial: usize,
    poisoned: bool,
}

impl PooledObjectFactory<Resource> for TrackingFactory {
    fn make_object(&self) -> Result<Resource, FactoryError> {
        Ok(Resource {
            serial: self.0.next.fetch_add(1, Ordering::SeqCst),
            poisoned: false,
        })
    }

    fn destroy_object(&self, obj: Resource) -> Result<(), FactoryError> {
        self.0.destroyed.lock().push(obj.serial);
        let hook = self.0.on_destroy.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    fn validate_object(&self, _obj: &Resource) -> bool {
        let delay = *self.0.validate_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        true
    }

    fn activate_object(&self, obj: &mut Resource) -> Result<(), FactoryError> {
        if obj.poisoned {
            return Err("poisoned".into());
        }
        Ok(())
    }
}

fn tracking_pool(
    config: PoolConfiguration,
) -> (GenericObjectPool<Resource, TrackingFactory>, Arc<Tracking>) {
    let tracking = Arc::new(Tracking::default());
    let pool = GenericObjectPool::new(TrackingFactory(Arc::clone(&tracking)), config).unwrap();
    (pool, tracking)
}

#[test]
fn no_object_is_lent_to_two_borrowers() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(4)
            .with_max_wait(Duration::from_secs(10)),
    );
    let held: Arc<Mutex<HashSet<ObjectId>>> = Arc::default();
    let start = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let held = Arc::clone(&held);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..200 {
                    let obj = pool.borrow_object().unwrap();
                    assert!(held.lock().insert(obj.id()), "object lent twice");
                    thread::yield_now();
                    assert!(held.lock().remove(&obj.id()));
                    drop(obj);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let metrics = pool.metrics();
    assert!(metrics.created_count <= 4);
    assert_eq!(metrics.borrowed_count, 16 * 200);
    assert_eq!(metrics.returned_count, 16 * 200);
    assert_eq!(pool.num_active(), 0);
}

#[test]
fn counters_are_conserved_under_load() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(3)
            .with_max_idle(2)
            .with_max_wait(Duration::from_secs(10)),
    );
    let done = Arc::new(AtomicBool::new(false));

    let monitor = {
        let pool = pool.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let now = pool.metrics();
                assert!(
                    (now.num_active + now.num_idle) as u64
                        <= now.created_count - now.destroyed_count,
                    "{now:?}"
                );
            }
        })
    };

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let pool = pool.clone();
            thread::spawn(move || {
                for round in 0..300 {
                    let obj = pool.borrow_object().unwrap();
                    if (i + round) % 7 == 0 {
                        pool.invalidate_object(obj).unwrap();
                    } else {
                        drop(obj);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    monitor.join().unwrap();

    let metrics = pool.metrics();
    assert_eq!(
        (metrics.num_active + metrics.num_idle) as u64,
        metrics.created_count - metrics.destroyed_count
    );
    assert_eq!(pool.list_all_objects().len(), metrics.num_idle);
}

#[test]
fn exhausted_borrow_is_bounded_by_max_wait() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(1)
            .with_max_wait(Duration::from_millis(100)),
    );
    let _held = pool.borrow_object().unwrap();

    let start = Instant::now();
    let err = pool.borrow_object().unwrap_err();
    let waited = start.elapsed();

    assert!(err.is_exhausted());
    assert!(waited >= Duration::from_millis(100), "{waited:?}");
    assert!(waited < Duration::from_millis(400), "{waited:?}");
}

#[test]
fn non_blocking_pool_fails_immediately() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(1)
            .with_when_exhausted(WhenExhaustedAction::Fail),
    );
    let _held = pool.borrow_object().unwrap();

    let start = Instant::now();
    assert!(matches!(pool.borrow_object(), Err(PoolError::Exhausted)));
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn idle_order_follows_lifo_setting() {
    for lifo in [true, false] {
        let (pool, _) = tracking_pool(PoolConfiguration::new().with_lifo(lifo));
        let a = pool.borrow_object().unwrap();
        let b = pool.borrow_object().unwrap();
        let (a_id, b_id) = (a.id(), b.id());
        pool.return_object(a).unwrap();
        pool.return_object(b).unwrap();

        let first = pool.borrow_object().unwrap();
        let second = pool.borrow_object().unwrap();
        let expected = if lifo { (b_id, a_id) } else { (a_id, b_id) };
        assert_eq!((first.id(), second.id()), expected);
    }
}

#[test]
fn eviction_removes_only_stale_objects() {
    let (pool, tracking) = tracking_pool(
        PoolConfiguration::new()
            .with_min_evictable_idle_time(Duration::from_millis(100))
            .with_eviction_batch(EvictionBatch::Fraction(1)),
    );
    pool.add_object().unwrap();
    thread::sleep(Duration::from_millis(150));
    pool.add_object().unwrap();
    let fresh = pool.list_all_objects()[1].id;

    pool.evict().unwrap();

    assert_eq!(*tracking.destroyed.lock(), vec![0]);
    let survivors: Vec<_> = pool.list_all_objects().iter().map(|o| o.id).collect();
    assert_eq!(survivors, vec![fresh]);
    assert_eq!(pool.metrics().destroyed_by_evictor_count, 1);
}

#[test]
fn background_evictor_runs_and_can_be_rescheduled() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_min_evictable_idle_time(Duration::from_millis(30))
            .with_eviction_batch(EvictionBatch::Fraction(1)),
    );
    pool.add_objects(3).unwrap();

    pool.set_time_between_eviction_runs(Some(Duration::from_millis(20)))
        .unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(pool.num_idle(), 0);
    assert_eq!(pool.metrics().destroyed_by_evictor_count, 3);

    pool.set_time_between_eviction_runs(None).unwrap();
    pool.add_object().unwrap();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(pool.num_idle(), 1);
}

#[test]
fn evictor_replenishes_min_idle() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_min_idle(2)
            .with_eviction_interval(Duration::from_millis(20)),
    );
    thread::sleep(Duration::from_millis(200));
    assert_eq!(pool.num_idle(), 2);
}

#[test]
fn waiting_borrower_reuses_returned_instance() {
    let (pool, tracking) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(2)
            .with_max_wait(Duration::from_millis(100)),
    );
    let first = pool.borrow_object().unwrap();
    let _second = pool.borrow_object().unwrap();
    assert_eq!(pool.num_active(), 2);

    let returned_id = first.id();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let obj = pool.borrow_object().map(|obj| obj.id());
            (obj, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(30));
    pool.return_object(first).unwrap();

    let (obj, waited) = waiter.join().unwrap();
    assert_eq!(obj.unwrap(), returned_id);
    assert!(waited < Duration::from_millis(100));
    assert_eq!(tracking.next.load(Ordering::SeqCst), 2);
}

#[test]
fn close_fails_blocked_and_later_borrows() {
    let (pool, _) = tracking_pool(PoolConfiguration::new().with_max_total(1));
    let _held = pool.borrow_object().unwrap();

    // no max_wait: blocks until woken
    let blocked = {
        let pool = pool.clone();
        thread::spawn(move || pool.borrow_object().map(|obj| obj.id()))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.num_waiters(), 1);

    pool.close();

    assert!(matches!(blocked.join().unwrap(), Err(PoolError::Closed)));
    assert!(matches!(pool.borrow_object(), Err(PoolError::Closed)));
    assert!(matches!(pool.add_object(), Err(PoolError::Closed)));
    assert!(matches!(pool.evict(), Err(PoolError::Closed)));
}

#[test]
fn close_destroys_each_idle_object_once() {
    let (pool, tracking) = tracking_pool(PoolConfiguration::default());
    pool.add_objects(3).unwrap();
    let outstanding = pool.borrow_object().unwrap();

    pool.close();
    pool.close();
    assert!(pool.is_closed());
    assert_eq!(pool.num_idle(), 0);
    assert_eq!(tracking.destroyed.lock().len(), 2);

    // loans returned after close are destroyed, not kept
    drop(outstanding);
    assert_eq!(pool.num_idle(), 0);
    assert_eq!(pool.num_active(), 0);

    let mut destroyed = tracking.destroyed.lock().clone();
    destroyed.sort_unstable();
    assert_eq!(destroyed, vec![0, 1, 2]);
}

#[test]
fn close_does_not_wait_for_a_running_idle_test() {
    let (pool, tracking) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(2)
            .with_test_while_idle()
            .with_max_wait(Duration::from_secs(5)),
    );
    let _held = pool.borrow_object().unwrap();
    pool.add_object().unwrap();
    *tracking.validate_delay.lock() = Some(Duration::from_millis(800));

    let evicting = {
        let pool = pool.clone();
        thread::spawn(move || {
            let _ = pool.evict();
        })
    };
    thread::sleep(Duration::from_millis(100));

    let blocked = {
        let pool = pool.clone();
        thread::spawn(move || {
            let result = pool.borrow_object().map(|obj| obj.id());
            (result, Instant::now())
        })
    };
    thread::sleep(Duration::from_millis(100));

    let closed_at = Instant::now();
    let closing = {
        let pool = pool.clone();
        thread::spawn(move || pool.close())
    };

    let (result, failed_at) = blocked.join().unwrap();
    assert!(matches!(result, Err(PoolError::Closed)), "{result:?}");
    let delay = failed_at.duration_since(closed_at);
    assert!(delay < Duration::from_millis(300), "{delay:?}");

    closing.join().unwrap();
    evicting.join().unwrap();
    assert_eq!(pool.num_idle(), 0);
}

#[test]
fn turning_fairness_off_still_serves_queued_waiters() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(1)
            .with_fairness(true)
            .with_max_wait(Duration::from_secs(5)),
    );
    let held = pool.borrow_object().unwrap();

    let mut handles = vec![];
    for _ in 0..3 {
        let pool = pool.clone();
        handles.push(thread::spawn(move || {
            let start = Instant::now();
            let obj = pool.borrow_object().unwrap();
            drop(obj);
            start.elapsed()
        }));
        thread::sleep(Duration::from_millis(30));
    }

    pool.set_fairness(false).unwrap();
    thread::sleep(Duration::from_millis(30));
    drop(held);

    for handle in handles {
        let waited = handle.join().unwrap();
        assert!(waited < Duration::from_secs(2), "{waited:?}");
    }
    assert_eq!(pool.num_waiters(), 0);
}

#[test]
fn fair_pool_serves_waiters_in_arrival_order() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(1)
            .with_fairness(true)
            .with_max_wait(Duration::from_secs(10)),
    );
    let held = pool.borrow_object().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = vec![];
    for i in 0..5 {
        let pool = pool.clone();
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            let obj = pool.borrow_object().unwrap();
            order.lock().push(i);
            thread::sleep(Duration::from_millis(5));
            drop(obj);
        }));
        thread::sleep(Duration::from_millis(30));
    }

    drop(held);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn deadline_spans_internal_retries() {
    let (pool, tracking) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(2)
            .with_max_wait(Duration::from_millis(300)),
    );
    let _pinned = pool.borrow_object().unwrap();
    let mut poisoned = pool.borrow_object().unwrap();

    // once the poisoned object is destroyed, another thread grabs the freed
    // slot so the waiting borrower has to block a second time
    let (taken_tx, taken_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let thief_pool = pool.clone();
    *tracking.on_destroy.lock() = Some(Box::new(move || {
        thread::spawn(move || {
            let obj = thief_pool.borrow_object().unwrap();
            taken_tx.send(()).unwrap();
            let _ = release_rx.recv();
            drop(obj);
        });
        let _ = taken_rx.recv();
    }));

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = pool.borrow_object().map(|obj| obj.id());
            (result, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(200));
    poisoned.poisoned = true;
    drop(poisoned);

    let (result, waited) = waiter.join().unwrap();
    release_tx.send(()).unwrap();

    assert!(matches!(result, Err(PoolError::Timeout(_))), "{result:?}");
    assert!(waited >= Duration::from_millis(300), "{waited:?}");
    assert!(waited < Duration::from_millis(450), "{waited:?}");
}

#[test]
fn borrower_gets_object_back_from_evictor() {
    let (pool, tracking) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(1)
            .with_max_wait(Duration::from_secs(2))
            .with_test_while_idle(),
    );
    pool.add_object().unwrap();
    let idle_id = pool.list_all_objects()[0].id;

    *tracking.validate_delay.lock() = Some(Duration::from_millis(200));
    let evictor = {
        let pool = pool.clone();
        thread::spawn(move || pool.evict())
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.num_idle(), 0);

    *tracking.validate_delay.lock() = None;
    let obj = pool.borrow_object().unwrap();
    assert_eq!(obj.id(), idle_id);

    evictor.join().unwrap().unwrap();
    assert_eq!(tracking.next.load(Ordering::SeqCst), 1);
}

#[test]
fn returning_a_guard_to_the_wrong_pool_leaves_both_intact() {
    let (pool, _) = tracking_pool(PoolConfiguration::default());
    let (other, _) = tracking_pool(PoolConfiguration::default());
    let guard = other.borrow_object().unwrap();

    assert!(matches!(pool.invalidate_object(guard), Err(PoolError::UnknownObject)));
    assert_eq!(pool.metrics().returned_count, 0);
    assert_eq!(other.num_idle(), 1);
    assert_eq!(other.metrics().destroyed_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_borrowers_share_a_small_pool() {
    let (pool, _) = tracking_pool(
        PoolConfiguration::new()
            .with_max_total(2)
            .with_max_wait(Duration::from_secs(5)),
    );

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let obj = pool.borrow_object_async().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                obj.id()
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert!(pool.metrics().created_count <= 2);
    assert_eq!(pool.metrics().borrowed_count, 8);
}
