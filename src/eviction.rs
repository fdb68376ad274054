//! Eviction policies for idle objects

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::pooled::{ObjectId, PooledObjectInfo};

/// Thresholds handed to an [`EvictionPolicy`] for one eviction run
#[derive(Debug, Clone, Copy)]
pub struct EvictionConfig {
    /// Idle time beyond which an object is always evictable
    pub idle_evict_time: Option<Duration>,

    /// Idle time beyond which an object is evictable while the idle count
    /// is above `min_idle`
    pub idle_soft_evict_time: Option<Duration>,

    pub min_idle: usize,
}

type EvictionPredicate = dyn Fn(&EvictionConfig, &PooledObjectInfo, usize) -> bool + Send + Sync;

/// Decides whether an idle object should be destroyed
///
/// # Examples
///
/// ```
/// use esox_genericpool::{EvictionPolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// // Retire connections after an hour no matter how busy they are
/// let config = PoolConfiguration::new()
///     .with_eviction_policy(EvictionPolicy::TimeToLive(Duration::from_secs(3600)));
///
/// let by_name: EvictionPolicy = "ttl=3600".parse().unwrap();
/// assert!(matches!(by_name, EvictionPolicy::TimeToLive(_)));
/// ```
#[derive(Clone, Default)]
pub enum EvictionPolicy {
    /// Hard idle threshold, or soft idle threshold while above `min_idle`
    #[default]
    Default,

    /// The default thresholds, plus a cap on object age
    TimeToLive(Duration),

    /// User supplied predicate over `(thresholds, object, idle count)`
    Custom(Arc<EvictionPredicate>),
}

impl EvictionPolicy {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&EvictionConfig, &PooledObjectInfo, usize) -> bool + Send + Sync + 'static,
    {
        EvictionPolicy::Custom(Arc::new(predicate))
    }

    /// `idle_count` includes the object under test.
    pub fn should_evict(
        &self,
        config: &EvictionConfig,
        under_test: &PooledObjectInfo,
        idle_count: usize,
    ) -> bool {
        match self {
            EvictionPolicy::Default => idle_thresholds(config, under_test, idle_count),
            EvictionPolicy::TimeToLive(ttl) => {
                under_test.age() > *ttl || idle_thresholds(config, under_test, idle_count)
            }
            EvictionPolicy::Custom(predicate) => predicate(config, under_test, idle_count),
        }
    }
}

fn idle_thresholds(config: &EvictionConfig, under_test: &PooledObjectInfo, idle_count: usize) -> bool {
    let idle = under_test.idle_time;
    let soft = config
        .idle_soft_evict_time
        .is_some_and(|soft| idle > soft && idle_count > config.min_idle);
    let hard = config.idle_evict_time.is_some_and(|hard| idle > hard);
    soft || hard
}

impl fmt::Debug for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Default => f.write_str("Default"),
            EvictionPolicy::TimeToLive(ttl) => f.debug_tuple("TimeToLive").field(ttl).finish(),
            EvictionPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = PoolError;

    /// Accepts `default` or `ttl=<seconds>`.
    fn from_str(s: &str) -> PoolResult<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("default") {
            return Ok(EvictionPolicy::Default);
        }
        if let Some(secs) = s.strip_prefix("ttl=") {
            return secs
                .parse::<u64>()
                .map(|secs| EvictionPolicy::TimeToLive(Duration::from_secs(secs)))
                .map_err(|_| PoolError::Config(format!("invalid time-to-live '{secs}'")));
        }
        Err(PoolError::Config(format!("eviction policy '{s}' not recognized")))
    }
}

/// Position of the evictor within the idle set, kept between runs.
///
/// Holds a snapshot of idle ids, longest idle first. Ids that were borrowed
/// since the snapshot are skipped by the caller.
#[derive(Debug, Default)]
pub(crate) struct EvictionCursor {
    pending: VecDeque<ObjectId>,
    refilled_without_hit: bool,
}

impl EvictionCursor {
    pub fn begin_run(&mut self) {
        self.refilled_without_hit = false;
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.refilled_without_hit = false;
    }

    /// Next id to inspect, wrapping around through `refill` when the
    /// snapshot runs out. Gives up after a refill in which nothing was hit.
    pub fn next_with<R>(&mut self, refill: R) -> Option<ObjectId>
    where
        R: FnOnce() -> VecDeque<ObjectId>,
    {
        if let Some(id) = self.pending.pop_front() {
            return Some(id);
        }
        if self.refilled_without_hit {
            return None;
        }
        self.pending = refill();
        self.refilled_without_hit = true;
        self.pending.pop_front()
    }

    /// Record that the last id handed out was still idle.
    pub fn hit(&mut self) {
        self.refilled_without_hit = false;
    }
}
