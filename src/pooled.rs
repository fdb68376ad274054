//! Per-object lifecycle tracking

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Identity of an object under management, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a pooled object is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PooledObjectState {
    /// In the idle set, available for borrowing
    Idle,
    /// Owned by exactly one borrower
    Allocated,
    /// Held by the evictor for inspection
    Eviction,
    /// A borrower asked for the object mid-inspection; it goes back to the
    /// borrow end of the idle set once the evictor lets go
    EvictionReturnToHead,
    /// Being validated by the evictor
    Validation,
    /// Being validated and passivated on its way back
    Returning,
    /// Failed a check or was invalidated; will be destroyed
    Invalid,
    /// Its borrower panicked while holding it; will be destroyed
    Abandoned,
}

impl PooledObjectState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PooledObjectState::Invalid | PooledObjectState::Abandoned)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: PooledObjectState,
    last_borrow: Instant,
    last_return: Instant,
    last_use: Instant,
    borrowed_count: u64,
}

/// Shared view of one object's state and timestamps.
///
/// The value itself travels between the idle set, a borrower and the
/// evictor; the tracker stays registered with the pool for its whole life.
#[derive(Debug)]
pub(crate) struct ObjectTracker {
    id: ObjectId,
    created_at: Instant,
    lifecycle: Mutex<Lifecycle>,
}

impl ObjectTracker {
    pub fn new(id: ObjectId) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            lifecycle: Mutex::new(Lifecycle {
                state: PooledObjectState::Idle,
                last_borrow: now,
                last_return: now,
                last_use: now,
                borrowed_count: 0,
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state(&self) -> PooledObjectState {
        self.lifecycle.lock().state
    }

    /// Claim the object for a borrower.
    ///
    /// Fails for anything but `Idle`. A claim against an object under
    /// inspection flags it so the evictor hands it back to the borrow end.
    pub fn allocate(&self) -> bool {
        let mut lc = self.lifecycle.lock();
        match lc.state {
            PooledObjectState::Idle => {
                let now = Instant::now();
                lc.state = PooledObjectState::Allocated;
                lc.last_borrow = now;
                lc.last_use = now;
                lc.borrowed_count += 1;
                true
            }
            PooledObjectState::Eviction | PooledObjectState::Validation => {
                lc.state = PooledObjectState::EvictionReturnToHead;
                false
            }
            _ => false,
        }
    }

    pub fn mark_returning(&self) -> bool {
        let mut lc = self.lifecycle.lock();
        if lc.state == PooledObjectState::Allocated {
            lc.state = PooledObjectState::Returning;
            true
        } else {
            false
        }
    }

    pub fn deallocate(&self) -> bool {
        let mut lc = self.lifecycle.lock();
        match lc.state {
            PooledObjectState::Allocated | PooledObjectState::Returning => {
                lc.state = PooledObjectState::Idle;
                lc.last_return = Instant::now();
                true
            }
            _ => false,
        }
    }

    pub fn start_eviction_test(&self) -> bool {
        let mut lc = self.lifecycle.lock();
        if lc.state == PooledObjectState::Idle {
            lc.state = PooledObjectState::Eviction;
            true
        } else {
            false
        }
    }

    pub fn begin_validation(&self) {
        let mut lc = self.lifecycle.lock();
        if lc.state == PooledObjectState::Eviction {
            lc.state = PooledObjectState::Validation;
        }
    }

    pub fn end_validation(&self) {
        let mut lc = self.lifecycle.lock();
        if lc.state == PooledObjectState::Validation {
            lc.state = PooledObjectState::Eviction;
        }
    }

    /// Release the object from inspection. Returns true when a borrower
    /// tried to claim it in the meantime.
    pub fn end_eviction_test(&self) -> bool {
        let mut lc = self.lifecycle.lock();
        let wanted = lc.state == PooledObjectState::EvictionReturnToHead;
        if matches!(
            lc.state,
            PooledObjectState::Eviction
                | PooledObjectState::Validation
                | PooledObjectState::EvictionReturnToHead
        ) {
            lc.state = PooledObjectState::Idle;
        }
        wanted
    }

    pub fn invalidate(&self) {
        self.lifecycle.lock().state = PooledObjectState::Invalid;
    }

    pub fn mark_abandoned(&self) {
        self.lifecycle.lock().state = PooledObjectState::Abandoned;
    }

    pub fn mark_used(&self) {
        self.lifecycle.lock().last_use = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        self.lifecycle.lock().last_return.elapsed()
    }

    pub fn active_time(&self) -> Duration {
        let lc = self.lifecycle.lock();
        active_time(&lc)
    }

    pub fn last_return(&self) -> Instant {
        self.lifecycle.lock().last_return
    }

    pub fn info(&self) -> PooledObjectInfo {
        let lc = self.lifecycle.lock();
        PooledObjectInfo {
            id: self.id,
            state: lc.state,
            created_at: self.created_at,
            last_borrow_time: lc.last_borrow,
            last_return_time: lc.last_return,
            last_use_time: lc.last_use,
            borrowed_count: lc.borrowed_count,
            idle_time: lc.last_return.elapsed(),
            active_time: active_time(&lc),
        }
    }
}

fn active_time(lc: &Lifecycle) -> Duration {
    if lc.last_return > lc.last_borrow {
        lc.last_return - lc.last_borrow
    } else {
        lc.last_borrow.elapsed()
    }
}

/// Point-in-time description of one managed object
#[derive(Debug, Clone)]
pub struct PooledObjectInfo {
    pub id: ObjectId,
    pub state: PooledObjectState,
    pub created_at: Instant,
    pub last_borrow_time: Instant,
    pub last_return_time: Instant,
    pub last_use_time: Instant,
    /// Times this object has been handed to a borrower
    pub borrowed_count: u64,
    /// Time since the object was last returned (or created)
    pub idle_time: Duration,
    /// Length of the last (or current) borrow
    pub active_time: Duration,
}

impl PooledObjectInfo {
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// A resource together with its tracker
pub(crate) struct PooledObject<T> {
    pub value: T,
    pub tracker: Arc<ObjectTracker>,
}

impl<T> PooledObject<T> {
    pub fn new(value: T, id: ObjectId) -> Self {
        Self {
            value,
            tracker: Arc::new(ObjectTracker::new(id)),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.tracker.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrow_and_return_cycle() {
        let tracker = ObjectTracker::new(ObjectId(1));
        assert_eq!(tracker.state(), PooledObjectState::Idle);

        assert!(tracker.allocate());
        assert_eq!(tracker.state(), PooledObjectState::Allocated);
        assert!(!tracker.allocate());

        assert!(tracker.mark_returning());
        assert!(tracker.deallocate());
        assert_eq!(tracker.state(), PooledObjectState::Idle);
        assert_eq!(tracker.info().borrowed_count, 1);
    }

    #[test]
    fn test_claim_during_eviction_flags_return_to_head() {
        let tracker = ObjectTracker::new(ObjectId(2));
        assert!(tracker.start_eviction_test());

        assert!(!tracker.allocate());
        assert_eq!(tracker.state(), PooledObjectState::EvictionReturnToHead);

        assert!(tracker.end_eviction_test());
        assert_eq!(tracker.state(), PooledObjectState::Idle);
        assert!(tracker.allocate());
    }

    #[test]
    fn test_validation_is_nested_in_eviction() {
        let tracker = ObjectTracker::new(ObjectId(3));
        assert!(tracker.start_eviction_test());
        tracker.begin_validation();
        assert_eq!(tracker.state(), PooledObjectState::Validation);
        tracker.end_validation();
        assert_eq!(tracker.state(), PooledObjectState::Eviction);
        assert!(!tracker.end_eviction_test());
    }

    #[test]
    fn test_eviction_only_starts_from_idle() {
        let tracker = ObjectTracker::new(ObjectId(4));
        assert!(tracker.allocate());
        assert!(!tracker.start_eviction_test());

        tracker.invalidate();
        assert!(tracker.state().is_terminal());
        assert!(!tracker.deallocate());
    }
}
