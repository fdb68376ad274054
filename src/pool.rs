//! Core object pool implementation

use crate::config::{EvictionBatch, PoolConfiguration, WhenExhaustedAction};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{EvictionConfig, EvictionCursor, EvictionPolicy};
use crate::factory::PooledObjectFactory;
use crate::idle::IdleObjects;
use crate::listener::SwallowedErrorListener;
use crate::metrics::PoolMetrics;
#[cfg(feature = "metrics")]
use crate::metrics::{MetricsExporter, PoolCollector};
use crate::pooled::{ObjectId, ObjectTracker, PooledObject, PooledObjectInfo};
use crate::stats::PoolStats;
use crate::timer::PeriodicTask;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::collections::BTreeSet;
#[cfg(feature = "metrics")]
use std::collections::HashMap;
use std::fmt;
use std::ops::{ControlFlow, Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// How a borrowed object comes back to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Return,
    Invalidate,
    Abandon,
}

/// Type-erased way home for a [`BorrowedObject`].
trait ReturnSink<T>: Send + Sync {
    fn pool_id(&self) -> u64;
    fn give_back(&self, obj: PooledObject<T>, how: Disposition) -> PoolResult<()>;
    fn note_use(&self, id: ObjectId);
}

/// An object on loan from a [`GenericObjectPool`].
///
/// Dropping the guard returns the object. If the borrowing thread is
/// panicking at that point the object is considered abandoned and destroyed
/// instead.
pub struct BorrowedObject<T> {
    object: Option<PooledObject<T>>,
    pool: Arc<dyn ReturnSink<T>>,
}

impl<T> BorrowedObject<T> {
    /// Identity of the borrowed object within its pool
    pub fn id(&self) -> ObjectId {
        self.object().id()
    }

    /// Record a use of the object, refreshing its last-use timestamp
    pub fn mark_used(&self) {
        self.pool.note_use(self.id());
    }

    fn object(&self) -> &PooledObject<T> {
        self.object.as_ref().expect("Value already taken")
    }
}

impl<T> Deref for BorrowedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.object().value
    }
}

impl<T> DerefMut for BorrowedObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.object.as_mut().expect("Value already taken").value
    }
}

impl<T> Drop for BorrowedObject<T> {
    fn drop(&mut self) {
        if let Some(obj) = self.object.take() {
            let how = if thread::panicking() {
                Disposition::Abandon
            } else {
                Disposition::Return
            };
            let _ = self.pool.give_back(obj, how);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for BorrowedObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowedObject")
            .field("id", &self.object.as_ref().map(|o| o.id()))
            .field("value", &self.object.as_ref().map(|o| &o.value))
            .finish()
    }
}

/// Why an object is being destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyReason {
    Borrow,
    BorrowValidation,
    Return,
    Invalidated,
    Abandoned,
    Create,
    Evicted,
    Cleared,
}

/// Bookkeeping guarded by the state lock
struct PoolState<T> {
    idle: IdleObjects<T>,
    num_active: usize,
    /// Objects in existence plus creations in flight
    create_count: usize,
    /// The object the evictor currently holds, if any
    under_test: Option<Arc<ObjectTracker>>,
    /// Tickets of fair borrowers still waiting, oldest first
    waiters: BTreeSet<u64>,
    next_ticket: u64,
    num_waiters: usize,
}

struct Maintenance {
    cursor: EvictionCursor,
    evictor: Option<PeriodicTask>,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    destroyed_by_evictor: AtomicU64,
    destroyed_by_borrow_validation: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
}

enum Acquired<T> {
    Idle(PooledObject<T>),
    Reserved,
}

struct PoolInner<T, F> {
    id: u64,
    factory: F,
    config: RwLock<PoolConfiguration>,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    all_objects: DashMap<ObjectId, Arc<ObjectTracker>>,
    maintenance: Mutex<Maintenance>,
    counters: Counters,
    stats: PoolStats,
    closed: AtomicBool,
    listener: RwLock<Option<Arc<dyn SwallowedErrorListener>>>,
    next_object_id: AtomicU64,
    creation_trace: String,
    handles: AtomicUsize,
}

/// Thread-safe pool of factory-made objects with blocking borrow,
/// validation, and background eviction of idle objects.
///
/// Cloning the pool yields another handle to the same pool. When the last
/// handle is dropped the pool is closed.
///
/// # Examples
///
/// ```
/// use esox_genericpool::{FnFactory, GenericObjectPool, PoolConfiguration};
///
/// let pool = GenericObjectPool::new(
///     FnFactory::new(|| Ok(String::from("connection"))),
///     PoolConfiguration::new().with_max_total(4),
/// ).unwrap();
///
/// {
///     let conn = pool.borrow_object().unwrap();
///     assert_eq!(conn.as_str(), "connection");
///     assert_eq!(pool.num_active(), 1);
/// }
///
/// assert_eq!(pool.num_active(), 0);
/// assert_eq!(pool.num_idle(), 1);
/// ```
pub struct GenericObjectPool<T: Send + 'static, F: PooledObjectFactory<T>> {
    inner: Arc<PoolInner<T, F>>,
}

impl<T: Send + 'static, F: PooledObjectFactory<T>> GenericObjectPool<T, F> {
    /// Create a new pool. Starts the evictor if the configuration asks for it.
    #[track_caller]
    pub fn new(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;
        let location = Location::caller();
        let interval = config.time_between_eviction_runs;
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::new(PoolInner {
            id,
            factory,
            config: RwLock::new(config),
            state: Mutex::new(PoolState {
                idle: IdleObjects::new(),
                num_active: 0,
                create_count: 0,
                under_test: None,
                waiters: BTreeSet::new(),
                next_ticket: 0,
                num_waiters: 0,
            }),
            available: Condvar::new(),
            all_objects: DashMap::new(),
            maintenance: Mutex::new(Maintenance {
                cursor: EvictionCursor::default(),
                evictor: None,
            }),
            counters: Counters::default(),
            stats: PoolStats::new(),
            closed: AtomicBool::new(false),
            listener: RwLock::new(None),
            next_object_id: AtomicU64::new(1),
            creation_trace: format!("pool {id} created at {location}"),
            handles: AtomicUsize::new(1),
        });

        inner.restart_evictor(&mut inner.maintenance.lock(), interval);
        debug!(pool = id, %location, "pool created");
        Ok(Self { inner })
    }

    /// Borrow an object, waiting up to the configured `max_wait` when the
    /// pool is exhausted and configured to block.
    pub fn borrow_object(&self) -> PoolResult<BorrowedObject<T>> {
        let max_wait = self.inner.config.read().max_wait;
        self.inner.borrow(max_wait)
    }

    /// Borrow an object with an explicit deadline instead of `max_wait`
    pub fn borrow_object_timeout(&self, max_wait: Duration) -> PoolResult<BorrowedObject<T>> {
        self.inner.borrow(Some(max_wait))
    }

    /// Borrow an object without blocking the async runtime
    pub async fn borrow_object_async(&self) -> PoolResult<BorrowedObject<T>> {
        let inner = Arc::clone(&self.inner);
        let max_wait = inner.config.read().max_wait;

        tokio::task::spawn_blocking(move || inner.borrow(max_wait))
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Give an object back. Equivalent to dropping the guard, but reports
    /// failures: a guard from another pool yields
    /// [`PoolError::UnknownObject`] and goes back to its own pool.
    pub fn return_object(&self, obj: BorrowedObject<T>) -> PoolResult<()> {
        self.settle(obj, Disposition::Return)
    }

    /// Destroy a borrowed object instead of returning it
    pub fn invalidate_object(&self, obj: BorrowedObject<T>) -> PoolResult<()> {
        self.settle(obj, Disposition::Invalidate)
    }

    fn settle(&self, mut obj: BorrowedObject<T>, how: Disposition) -> PoolResult<()> {
        if obj.pool.pool_id() != self.inner.id {
            return Err(PoolError::UnknownObject);
        }
        match obj.object.take() {
            Some(pooled) => self.inner.give_back(pooled, how),
            None => Err(PoolError::UnknownObject),
        }
    }

    /// Create an object and put it in the idle set.
    ///
    /// Fails with [`PoolError::Exhausted`] when the pool is at `max_total`.
    pub fn add_object(&self) -> PoolResult<()> {
        self.inner.assert_open()?;
        if self.inner.add_idle_object()? {
            Ok(())
        } else {
            Err(PoolError::Exhausted)
        }
    }

    /// Add `count` idle objects, stopping early at `max_total`.
    /// Returns how many were added.
    pub fn add_objects(&self, count: usize) -> PoolResult<usize> {
        self.inner.assert_open()?;
        let mut added = 0;
        while added < count && self.inner.add_idle_object()? {
            added += 1;
        }
        Ok(added)
    }

    /// Fill the idle set up to `min_idle`
    pub fn prepare_pool(&self) -> PoolResult<()> {
        let min_idle = self.inner.config.read().effective_min_idle();
        self.inner.ensure_idle(min_idle)
    }

    /// Fill the idle set up to `min_idle` on the blocking thread pool
    pub async fn prepare_pool_async(&self) -> PoolResult<()> {
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let min_idle = inner.config.read().effective_min_idle();
            inner.ensure_idle(min_idle)
        })
        .await
        .map_err(|_| PoolError::Cancelled)?
    }

    /// Destroy every idle object. Borrowed objects are unaffected.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Run one eviction pass now, independently of the evictor schedule
    pub fn evict(&self) -> PoolResult<()> {
        self.inner.evict()
    }

    /// Top the idle set up to `min_idle`
    pub fn ensure_min_idle(&self) -> PoolResult<()> {
        let min_idle = self.inner.config.read().effective_min_idle();
        self.inner.ensure_idle(min_idle)
    }

    /// Close the pool: stop the evictor, destroy idle objects, and fail all
    /// current and future borrows. Objects still on loan are destroyed when
    /// they come back. Calling this more than once is harmless.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Objects currently on loan
    pub fn num_active(&self) -> usize {
        self.inner.state.lock().num_active
    }

    /// Objects currently idle
    pub fn num_idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Borrowers currently blocked waiting for an object
    pub fn num_waiters(&self) -> usize {
        self.inner.state.lock().num_waiters
    }

    /// Read-only snapshot of counters and timing statistics
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    /// Render current metrics in the Prometheus text format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }

    /// A collector for registering this pool with a Prometheus registry.
    /// It does not keep the pool open.
    #[cfg(feature = "metrics")]
    pub fn metrics_collector(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<PoolCollector> {
        let inner = Arc::clone(&self.inner);
        PoolCollector::new(pool_name, tags, move || inner.metrics())
    }

    /// Every object under management, idle or on loan
    pub fn list_all_objects(&self) -> Vec<PooledObjectInfo> {
        let mut objects: Vec<_> = self
            .inner
            .all_objects
            .iter()
            .map(|entry| entry.value().info())
            .collect();
        objects.sort_by_key(|info| info.id);
        objects
    }

    /// Where in the source this pool was created
    pub fn creation_trace(&self) -> &str {
        &self.inner.creation_trace
    }

    pub fn set_swallowed_error_listener<L>(&self, listener: L)
    where
        L: SwallowedErrorListener + 'static,
    {
        *self.inner.listener.write() = Some(Arc::new(listener));
    }

    pub fn clear_swallowed_error_listener(&self) {
        *self.inner.listener.write() = None;
    }

    /// Copy of the live configuration
    pub fn configuration(&self) -> PoolConfiguration {
        self.inner.config.read().clone()
    }

    /// Replace the whole configuration at once
    pub fn set_configuration(&self, config: PoolConfiguration) -> PoolResult<()> {
        self.reconfigure(|current| *current = config)
    }

    pub fn max_total(&self) -> Option<usize> {
        self.inner.config.read().max_total
    }

    pub fn set_max_total(&self, max_total: Option<usize>) -> PoolResult<()> {
        self.reconfigure(|c| c.max_total = max_total)
    }

    pub fn max_idle(&self) -> Option<usize> {
        self.inner.config.read().max_idle
    }

    pub fn set_max_idle(&self, max_idle: Option<usize>) {
        self.inner.config.write().max_idle = max_idle;
    }

    /// The configured floor, capped by `max_idle`
    pub fn min_idle(&self) -> usize {
        self.inner.config.read().effective_min_idle()
    }

    pub fn set_min_idle(&self, min_idle: usize) {
        self.inner.config.write().min_idle = min_idle;
    }

    pub fn when_exhausted(&self) -> WhenExhaustedAction {
        self.inner.config.read().when_exhausted
    }

    pub fn set_when_exhausted(&self, action: WhenExhaustedAction) -> PoolResult<()> {
        self.reconfigure(|c| c.when_exhausted = action)
    }

    pub fn block_when_exhausted(&self) -> bool {
        self.when_exhausted() == WhenExhaustedAction::Block
    }

    pub fn set_block_when_exhausted(&self, block: bool) -> PoolResult<()> {
        let action = if block {
            WhenExhaustedAction::Block
        } else {
            WhenExhaustedAction::Fail
        };
        self.set_when_exhausted(action)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.inner.config.read().max_wait
    }

    pub fn set_max_wait(&self, max_wait: Option<Duration>) {
        self.inner.config.write().max_wait = max_wait;
    }

    pub fn lifo(&self) -> bool {
        self.inner.config.read().lifo
    }

    pub fn set_lifo(&self, lifo: bool) {
        self.inner.config.write().lifo = lifo;
    }

    pub fn fairness(&self) -> bool {
        self.inner.config.read().fairness
    }

    pub fn set_fairness(&self, fairness: bool) -> PoolResult<()> {
        self.reconfigure(|c| c.fairness = fairness)
    }

    pub fn test_on_create(&self) -> bool {
        self.inner.config.read().test_on_create
    }

    pub fn set_test_on_create(&self, test: bool) {
        self.inner.config.write().test_on_create = test;
    }

    pub fn test_on_borrow(&self) -> bool {
        self.inner.config.read().test_on_borrow
    }

    pub fn set_test_on_borrow(&self, test: bool) {
        self.inner.config.write().test_on_borrow = test;
    }

    pub fn test_on_return(&self) -> bool {
        self.inner.config.read().test_on_return
    }

    pub fn set_test_on_return(&self, test: bool) {
        self.inner.config.write().test_on_return = test;
    }

    pub fn test_while_idle(&self) -> bool {
        self.inner.config.read().test_while_idle
    }

    pub fn set_test_while_idle(&self, test: bool) {
        self.inner.config.write().test_while_idle = test;
    }

    pub fn time_between_eviction_runs(&self) -> Option<Duration> {
        self.inner.config.read().time_between_eviction_runs
    }

    /// Change the evictor interval. The running evictor is replaced
    /// atomically with respect to in-flight eviction passes; `None` stops it.
    pub fn set_time_between_eviction_runs(&self, interval: Option<Duration>) -> PoolResult<()> {
        self.reconfigure(|c| c.time_between_eviction_runs = interval)
    }

    pub fn num_tests_per_eviction_run(&self) -> EvictionBatch {
        self.inner.config.read().num_tests_per_eviction_run
    }

    pub fn set_num_tests_per_eviction_run(&self, batch: EvictionBatch) -> PoolResult<()> {
        self.reconfigure(|c| c.num_tests_per_eviction_run = batch)
    }

    pub fn min_evictable_idle_time(&self) -> Option<Duration> {
        self.inner.config.read().min_evictable_idle_time
    }

    pub fn set_min_evictable_idle_time(&self, idle: Option<Duration>) {
        self.inner.config.write().min_evictable_idle_time = idle;
    }

    pub fn soft_min_evictable_idle_time(&self) -> Option<Duration> {
        self.inner.config.read().soft_min_evictable_idle_time
    }

    pub fn set_soft_min_evictable_idle_time(&self, idle: Option<Duration>) {
        self.inner.config.write().soft_min_evictable_idle_time = idle;
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.inner.config.read().eviction_policy.clone()
    }

    pub fn set_eviction_policy(&self, policy: EvictionPolicy) {
        self.inner.config.write().eviction_policy = policy;
    }

    /// Apply a validated change, then restart the evictor if its interval
    /// moved and wake blocked borrowers so they see any new capacity.
    fn reconfigure<U>(&self, update: U) -> PoolResult<()>
    where
        U: FnOnce(&mut PoolConfiguration),
    {
        let mut maintenance = self.inner.maintenance.lock();
        let interval = {
            let mut config = self.inner.config.write();
            let mut candidate = config.clone();
            update(&mut candidate);
            candidate.validate()?;
            let interval = candidate.time_between_eviction_runs;
            *config = candidate;
            interval
        };

        let running = maintenance.evictor.as_ref().map(PeriodicTask::interval);
        if running != interval && !self.is_closed() {
            self.inner.restart_evictor(&mut maintenance, interval);
        }
        drop(maintenance);

        self.inner.wake_all();
        Ok(())
    }
}

impl<T: Send + 'static, F: PooledObjectFactory<T>> Clone for GenericObjectPool<T, F> {
    fn clone(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static, F: PooledObjectFactory<T>> Drop for GenericObjectPool<T, F> {
    fn drop(&mut self) {
        if self.inner.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.close();
        }
    }
}

impl<T: Send + 'static, F: PooledObjectFactory<T>> fmt::Debug for GenericObjectPool<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GenericObjectPool")
            .field("id", &self.inner.id)
            .field("num_active", &state.num_active)
            .field("num_idle", &state.idle.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: Send + 'static, F: PooledObjectFactory<T>> PoolInner<T, F> {
    fn assert_open(&self) -> PoolResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(PoolError::Closed)
        } else {
            Ok(())
        }
    }

    fn borrow(self: &Arc<Self>, max_wait: Option<Duration>) -> PoolResult<BorrowedObject<T>> {
        self.assert_open()?;

        // one deadline for the whole call, retries included
        let start = Instant::now();
        let deadline = max_wait.map(|wait| start + wait);
        let mut ticket = None;

        loop {
            let (mut obj, created) = match self.acquire(deadline, max_wait, &mut ticket)? {
                Acquired::Idle(obj) => (obj, false),
                Acquired::Reserved => {
                    let obj = self.create_object()?;
                    obj.tracker.allocate();
                    self.state.lock().num_active += 1;
                    (obj, true)
                }
            };

            if let Err(err) = self.factory.activate_object(&mut obj.value) {
                self.destroy(obj, true, DestroyReason::Borrow);
                if created {
                    return Err(PoolError::factory(err));
                }
                continue;
            }

            let (test_on_borrow, test_on_create) = {
                let config = self.config.read();
                (config.test_on_borrow, config.test_on_create)
            };
            if (test_on_borrow || (created && test_on_create))
                && !self.factory.validate_object(&obj.value)
            {
                self.destroy(obj, true, DestroyReason::BorrowValidation);
                if created {
                    return Err(PoolError::ValidationFailed);
                }
                continue;
            }

            self.counters.borrowed.fetch_add(1, Ordering::Relaxed);
            self.stats.record_borrow(obj.tracker.idle_time(), start.elapsed());
            trace!(pool = self.id, object = %obj.id(), created, "borrowed object");

            let sink: Arc<dyn ReturnSink<T>> = Arc::clone(self) as Arc<dyn ReturnSink<T>>;
            return Ok(BorrowedObject {
                object: Some(obj),
                pool: sink,
            });
        }
    }

    /// Take an idle object or reserve room for a new one, blocking per the
    /// exhaustion policy. Fair borrowers keep their ticket across retries.
    fn acquire(
        &self,
        deadline: Option<Instant>,
        max_wait: Option<Duration>,
        ticket: &mut Option<u64>,
    ) -> PoolResult<Acquired<T>> {
        let mut state = self.state.lock();

        if self.config.read().fairness && ticket.is_none() {
            *ticket = Some(state.next_ticket);
            state.next_ticket += 1;
        }
        if let Some(t) = *ticket {
            state.waiters.insert(t);
        }

        loop {
            if self.closed.load(Ordering::Acquire) {
                self.leave_queue(&mut state, *ticket);
                return Err(PoolError::Closed);
            }

            let (max_total, when_exhausted) = {
                let config = self.config.read();
                (config.max_total, config.when_exhausted)
            };
            let my_turn = match *ticket {
                Some(t) => state.waiters.first() == Some(&t),
                None => true,
            };

            if my_turn {
                if let Some(obj) = state.idle.pop_for_borrow() {
                    let claimed = obj.tracker.allocate();
                    debug_assert!(claimed, "idle store held a non-idle object");
                    state.num_active += 1;
                    self.leave_queue(&mut state, *ticket);
                    return Ok(Acquired::Idle(obj));
                }

                let has_room = max_total.is_none_or(|max| state.create_count < max);
                if has_room || when_exhausted == WhenExhaustedAction::Grow {
                    state.create_count += 1;
                    self.leave_queue(&mut state, *ticket);
                    return Ok(Acquired::Reserved);
                }

                // the evictor's object must come back to the borrow end
                if let Some(tracker) = &state.under_test {
                    tracker.allocate();
                }

                if when_exhausted == WhenExhaustedAction::Fail {
                    self.leave_queue(&mut state, *ticket);
                    return Err(PoolError::Exhausted);
                }
            }

            state.num_waiters += 1;
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        state.num_waiters -= 1;
                        self.leave_queue(&mut state, *ticket);
                        return Err(PoolError::Timeout(max_wait.unwrap_or_default()));
                    }
                    self.available.wait_until(&mut state, deadline);
                }
                None => self.available.wait(&mut state),
            }
            state.num_waiters -= 1;
        }
    }

    fn leave_queue(&self, state: &mut MutexGuard<'_, PoolState<T>>, ticket: Option<u64>) {
        if let Some(t) = ticket {
            if state.waiters.remove(&t) {
                self.available.notify_all();
            }
        }
    }

    /// Run the factory for a slot already reserved in `create_count`.
    fn create_object(&self) -> PoolResult<PooledObject<T>> {
        match self.factory.make_object() {
            Ok(value) => {
                let id = ObjectId(self.next_object_id.fetch_add(1, Ordering::Relaxed));
                let obj = PooledObject::new(value, id);
                self.all_objects.insert(id, Arc::clone(&obj.tracker));
                self.counters.created.fetch_add(1, Ordering::Release);
                debug!(pool = self.id, object = %id, "created pooled object");
                Ok(obj)
            }
            Err(err) => {
                self.state.lock().create_count -= 1;
                self.wake_waiters();
                Err(PoolError::factory(err))
            }
        }
    }

    fn destroy(&self, obj: PooledObject<T>, was_active: bool, reason: DestroyReason) {
        let id = obj.id();
        if !obj.tracker.state().is_terminal() {
            obj.tracker.invalidate();
        }

        {
            let mut state = self.state.lock();
            if was_active {
                state.num_active -= 1;
            }
            state.create_count -= 1;
            self.all_objects.remove(&id);
        }

        if let Err(err) = self.factory.destroy_object(obj.value) {
            self.swallow(PoolError::factory(err));
        }
        self.counters.destroyed.fetch_add(1, Ordering::Release);
        match reason {
            DestroyReason::Evicted => {
                self.counters.destroyed_by_evictor.fetch_add(1, Ordering::Relaxed);
            }
            DestroyReason::BorrowValidation => {
                self.counters
                    .destroyed_by_borrow_validation
                    .fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        debug!(pool = self.id, object = %id, ?reason, "destroyed pooled object");

        self.wake_waiters();
    }

    fn return_object(&self, mut obj: PooledObject<T>) -> PoolResult<()> {
        let id = obj.id();
        let registered = self
            .all_objects
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), &obj.tracker));
        if !registered || !obj.tracker.mark_returning() {
            warn!(pool = self.id, object = %id, "returned object is not on loan from this pool");
            return Err(PoolError::UnknownObject);
        }

        let active_time = obj.tracker.active_time();
        let (test_on_return, max_idle, lifo) = {
            let config = self.config.read();
            (config.test_on_return, config.max_idle, config.lifo)
        };

        let keep = if test_on_return && !self.factory.validate_object(&obj.value) {
            false
        } else if let Err(err) = self.factory.passivate_object(&mut obj.value) {
            self.swallow(PoolError::factory(err));
            false
        } else {
            true
        };

        self.counters.returned.fetch_add(1, Ordering::Relaxed);
        self.stats.record_return(active_time);

        if !keep {
            self.destroy(obj, true, DestroyReason::Return);
            return Ok(());
        }

        obj.tracker.deallocate();
        let mut state = self.state.lock();
        let over_idle = max_idle.is_some_and(|max| state.idle.len() >= max);
        if self.closed.load(Ordering::Acquire) || over_idle {
            drop(state);
            self.destroy(obj, true, DestroyReason::Return);
        } else {
            state.idle.push(obj, lifo);
            state.num_active -= 1;
            drop(state);
            trace!(pool = self.id, object = %id, "returned object");
            self.wake_waiters();
        }
        Ok(())
    }

    /// Create one idle object. `Ok(false)` means the pool is at capacity.
    fn add_idle_object(&self) -> PoolResult<bool> {
        {
            let mut state = self.state.lock();
            let max_total = self.config.read().max_total;
            if max_total.is_some_and(|max| state.create_count >= max) {
                return Ok(false);
            }
            state.create_count += 1;
        }

        let mut obj = self.create_object()?;
        let (test_on_create, lifo) = {
            let config = self.config.read();
            (config.test_on_create, config.lifo)
        };
        if test_on_create && !self.factory.validate_object(&obj.value) {
            self.destroy(obj, false, DestroyReason::Create);
            return Err(PoolError::ValidationFailed);
        }
        if let Err(err) = self.factory.passivate_object(&mut obj.value) {
            self.destroy(obj, false, DestroyReason::Create);
            return Err(PoolError::factory(err));
        }

        let mut state = self.state.lock();
        if self.closed.load(Ordering::Acquire) {
            drop(state);
            self.destroy(obj, false, DestroyReason::Create);
            return Err(PoolError::Closed);
        }
        state.idle.push(obj, lifo);
        drop(state);
        self.wake_waiters();
        Ok(true)
    }

    /// Create idle objects until `target` are idle or capacity runs out.
    fn ensure_idle(&self, target: usize) -> PoolResult<()> {
        if target == 0 || self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        loop {
            {
                if self.state.lock().idle.len() >= target {
                    break;
                }
            }
            if !self.add_idle_object()? {
                break;
            }
        }

        if self.closed.load(Ordering::Acquire) {
            self.clear();
        }
        Ok(())
    }

    fn clear(&self) {
        let drained = self.state.lock().idle.drain();
        let count = drained.len();
        for obj in drained {
            self.destroy(obj, false, DestroyReason::Cleared);
        }
        if count > 0 {
            debug!(pool = self.id, count, "cleared idle objects");
        }
    }

    fn evict(&self) -> PoolResult<()> {
        self.assert_open()?;

        let config = self.config.read().clone();
        let thresholds = EvictionConfig {
            idle_evict_time: config.min_evictable_idle_time,
            idle_soft_evict_time: config.soft_min_evictable_idle_time,
            min_idle: config.effective_min_idle(),
        };

        let mut maintenance = self.maintenance.lock();
        let idle_count = self.state.lock().idle.len();
        let tests = config.num_tests_per_eviction_run.tests_for(idle_count);
        maintenance.cursor.begin_run();

        let mut examined = 0;
        while examined < tests {
            if self.closed.load(Ordering::Acquire) {
                maintenance.cursor.reset();
                break;
            }

            let (obj, idle_count) = {
                let mut state = self.state.lock();
                let Some(id) = maintenance
                    .cursor
                    .next_with(|| state.idle.eviction_order())
                else {
                    break;
                };
                // borrowed since the snapshot was taken
                let Some(obj) = state.idle.take(id) else {
                    continue;
                };
                maintenance.cursor.hit();
                if !obj.tracker.start_eviction_test() {
                    state.idle.push_oldest(obj, config.lifo);
                    continue;
                }
                state.under_test = Some(Arc::clone(&obj.tracker));
                let idle_count = state.idle.len() + 1;
                (obj, idle_count)
            };
            examined += 1;

            let info = obj.tracker.info();
            if config.eviction_policy.should_evict(&thresholds, &info, idle_count) {
                self.state.lock().under_test = None;
                self.destroy(obj, false, DestroyReason::Evicted);
                continue;
            }

            let obj = if config.test_while_idle {
                match self.test_idle_object(obj) {
                    Some(obj) => obj,
                    None => continue,
                }
            } else {
                obj
            };

            self.end_eviction_test(obj, config.lifo);
        }

        trace!(pool = self.id, examined, "eviction pass finished");
        Ok(())
    }

    /// Activate, validate, and passivate an object held by the evictor.
    /// Destroys it and returns `None` if any step fails.
    fn test_idle_object(&self, mut obj: PooledObject<T>) -> Option<PooledObject<T>> {
        obj.tracker.begin_validation();
        let healthy = match self.factory.activate_object(&mut obj.value) {
            Err(err) => {
                self.swallow(PoolError::factory(err));
                false
            }
            Ok(()) => {
                if !self.factory.validate_object(&obj.value) {
                    false
                } else if let Err(err) = self.factory.passivate_object(&mut obj.value) {
                    self.swallow(PoolError::factory(err));
                    false
                } else {
                    true
                }
            }
        };
        obj.tracker.end_validation();

        if healthy {
            Some(obj)
        } else {
            self.state.lock().under_test = None;
            self.destroy(obj, false, DestroyReason::Evicted);
            None
        }
    }

    fn end_eviction_test(&self, obj: PooledObject<T>, lifo: bool) {
        let mut state = self.state.lock();
        state.under_test = None;
        let wanted = obj.tracker.end_eviction_test();

        if self.closed.load(Ordering::Acquire) {
            drop(state);
            self.destroy(obj, false, DestroyReason::Cleared);
            return;
        }
        if wanted {
            state.idle.push_to_borrow_head(obj);
        } else {
            state.idle.push_oldest(obj, lifo);
        }
        drop(state);
        self.wake_waiters();
    }

    /// One evictor tick: evict, then replenish. Never propagates errors.
    fn run_maintenance(&self) {
        if let Err(err) = self.evict() {
            self.swallow(err);
        }
        let min_idle = self.config.read().effective_min_idle();
        if let Err(err) = self.ensure_idle(min_idle) {
            self.swallow(err);
        }
    }

    fn restart_evictor(self: &Arc<Self>, maintenance: &mut Maintenance, interval: Option<Duration>) {
        if let Some(mut evictor) = maintenance.evictor.take() {
            evictor.cancel();
            debug!(pool = self.id, "evictor stopped");
        }
        maintenance.cursor.reset();

        let Some(interval) = interval else {
            return;
        };

        let pool: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("esox-pool-evictor", interval, move || {
            let Some(pool) = pool.upgrade() else {
                return ControlFlow::Break(());
            };
            if pool.closed.load(Ordering::Acquire) {
                return ControlFlow::Break(());
            }
            pool.run_maintenance();
            ControlFlow::Continue(())
        });

        match task {
            Ok(task) => {
                debug!(pool = self.id, ?interval, "evictor started");
                maintenance.evictor = Some(task);
            }
            Err(err) => {
                self.swallow(PoolError::factory(Box::new(err)));
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // blocked borrowers fail now, not after an in-flight eviction test
        self.wake_all();

        {
            let mut maintenance = self.maintenance.lock();
            if let Some(mut evictor) = maintenance.evictor.take() {
                evictor.cancel();
            }
            maintenance.cursor.reset();
        }

        self.clear();
        self.wake_all();
        info!(pool = self.id, "pool closed");
    }

    /// Ticket holders may outlive a switch to unfair mode, so any queued
    /// ticket means everyone is woken.
    fn wake_waiters(&self) {
        let ticketed = !self.state.lock().waiters.is_empty();
        if ticketed || self.config.read().fairness {
            self.available.notify_all();
        } else {
            self.available.notify_one();
        }
    }

    /// Wake everyone after a change made outside the state lock.
    fn wake_all(&self) {
        let _state = self.state.lock();
        self.available.notify_all();
    }

    fn swallow(&self, err: PoolError) {
        warn!(pool = self.id, error = %err, "swallowed error");
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            // a misbehaving listener must not take the evictor down with it
            let _ = panic::catch_unwind(AssertUnwindSafe(|| listener.on_swallowed_error(&err)));
        }
    }

    fn metrics(&self) -> PoolMetrics {
        // destroyed before the live counts, created after, so the snapshot
        // never shows more live objects than created minus destroyed
        let destroyed_count = self.counters.destroyed.load(Ordering::Acquire);
        let (num_active, num_idle, num_waiters) = {
            let state = self.state.lock();
            (state.num_active, state.idle.len(), state.num_waiters)
        };
        let created_count = self.counters.created.load(Ordering::Acquire);
        let max_total = self.config.read().max_total;

        PoolMetrics {
            num_active,
            num_idle,
            num_waiters,
            max_total,
            created_count,
            destroyed_count,
            destroyed_by_evictor_count: self.counters.destroyed_by_evictor.load(Ordering::Relaxed),
            destroyed_by_borrow_validation_count: self
                .counters
                .destroyed_by_borrow_validation
                .load(Ordering::Relaxed),
            borrowed_count: self.counters.borrowed.load(Ordering::Relaxed),
            returned_count: self.counters.returned.load(Ordering::Relaxed),
            mean_active_time: self.stats.active_times.mean(),
            mean_idle_time: self.stats.idle_times.mean(),
            mean_borrow_wait_time: self.stats.wait_times.mean(),
            max_borrow_wait_time: self.stats.max_borrow_wait(),
        }
    }
}

impl<T: Send + 'static, F: PooledObjectFactory<T>> ReturnSink<T> for PoolInner<T, F> {
    fn pool_id(&self) -> u64 {
        self.id
    }

    fn give_back(&self, obj: PooledObject<T>, how: Disposition) -> PoolResult<()> {
        match how {
            Disposition::Return => self.return_object(obj),
            Disposition::Invalidate => {
                self.destroy(obj, true, DestroyReason::Invalidated);
                Ok(())
            }
            Disposition::Abandon => {
                obj.tracker.mark_abandoned();
                warn!(pool = self.id, object = %obj.id(), "borrower panicked, destroying object");
                self.destroy(obj, true, DestroyReason::Abandoned);
                Ok(())
            }
        }
    }

    fn note_use(&self, id: ObjectId) {
        if let Some(tracker) = self.all_objects.get(&id) {
            tracker.mark_used();
        }
    }
}
