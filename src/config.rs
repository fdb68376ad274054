//! Pool configuration options

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::eviction::EvictionPolicy;

/// What `borrow_object` does when no idle object is available and the pool
/// is at `max_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhenExhaustedAction {
    /// Fail immediately with [`PoolError::Exhausted`].
    Fail,
    /// Wait up to `max_wait` for an object to come back.
    #[default]
    Block,
    /// Create a new object regardless of `max_total`.
    Grow,
}

impl FromStr for WhenExhaustedAction {
    type Err = PoolError;

    fn from_str(s: &str) -> PoolResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "block" => Ok(Self::Block),
            "grow" => Ok(Self::Grow),
            other => Err(PoolError::Config(format!(
                "when-exhausted action '{other}' not recognized"
            ))),
        }
    }
}

/// How many idle objects a single eviction run examines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionBatch {
    /// At most this many objects per run.
    Fixed(usize),
    /// Roughly `1/n` of the idle objects per run, rounded up.
    Fraction(usize),
}

impl Default for EvictionBatch {
    fn default() -> Self {
        EvictionBatch::Fixed(3)
    }
}

impl EvictionBatch {
    /// Number of examinations to perform given the current idle count.
    pub fn tests_for(&self, idle_count: usize) -> usize {
        match *self {
            EvictionBatch::Fixed(n) => n.min(idle_count),
            EvictionBatch::Fraction(0) => 0,
            EvictionBatch::Fraction(n) => idle_count.div_ceil(n),
        }
    }
}

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use esox_genericpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_total(16)
///     .with_min_idle(2)
///     .with_max_wait(Duration::from_millis(250))
///     .with_eviction_interval(Duration::from_secs(30));
///
/// assert_eq!(config.max_total, Some(16));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Cap on objects in existence (idle + borrowed). `None` is unbounded.
    pub max_total: Option<usize>,

    /// Cap on idle objects kept after a return. `None` is unbounded.
    pub max_idle: Option<usize>,

    /// Floor of idle objects the evictor tops up to.
    pub min_idle: usize,

    /// Behavior of `borrow_object` on an exhausted pool
    pub when_exhausted: WhenExhaustedAction,

    /// Longest a blocking borrow may take. `None` waits indefinitely.
    pub max_wait: Option<Duration>,

    /// Borrow the most recently returned object first
    pub lifo: bool,

    /// Serve blocked borrowers in arrival order
    pub fairness: bool,

    pub test_on_create: bool,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,

    /// Interval between evictor runs. `None` disables the evictor.
    pub time_between_eviction_runs: Option<Duration>,

    pub num_tests_per_eviction_run: EvictionBatch,

    /// Idle time after which an object is always evictable
    pub min_evictable_idle_time: Option<Duration>,

    /// Idle time after which an object is evictable while idle > min_idle
    pub soft_min_evictable_idle_time: Option<Duration>,

    pub eviction_policy: EvictionPolicy,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_total: Some(8),
            max_idle: Some(8),
            min_idle: 0,
            when_exhausted: WhenExhaustedAction::Block,
            max_wait: None,
            lifo: true,
            fairness: false,
            test_on_create: false,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs: None,
            num_tests_per_eviction_run: EvictionBatch::default(),
            min_evictable_idle_time: Some(Duration::from_secs(30 * 60)),
            soft_min_evictable_idle_time: None,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the combination of values for contradictions.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_total == Some(0) {
            return Err(PoolError::Config(
                "max_total must be positive; use None for unbounded".to_string(),
            ));
        }
        if self.num_tests_per_eviction_run == EvictionBatch::Fraction(0) {
            return Err(PoolError::Config(
                "eviction batch fraction must be non-zero".to_string(),
            ));
        }
        if self.time_between_eviction_runs == Some(Duration::ZERO) {
            return Err(PoolError::Config(
                "eviction interval must be positive; use None to disable".to_string(),
            ));
        }
        Ok(())
    }

    /// Min idle as seen by the evictor: never above `max_idle`.
    pub fn effective_min_idle(&self) -> usize {
        match self.max_idle {
            Some(max_idle) => self.min_idle.min(max_idle),
            None => self.min_idle,
        }
    }

    /// Set the maximum number of objects in existence
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = Some(max_total);
        self
    }

    /// Remove the cap on objects in existence
    pub fn with_unbounded_total(mut self) -> Self {
        self.max_total = None;
        self
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_when_exhausted(mut self, action: WhenExhaustedAction) -> Self {
        self.when_exhausted = action;
        self
    }

    /// Set the borrow deadline
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_lifo(mut self, lifo: bool) -> Self {
        self.lifo = lifo;
        self
    }

    pub fn with_fairness(mut self, fairness: bool) -> Self {
        self.fairness = fairness;
        self
    }

    /// Validate objects right after the factory makes them
    pub fn with_test_on_create(mut self) -> Self {
        self.test_on_create = true;
        self
    }

    pub fn with_test_on_borrow(mut self) -> Self {
        self.test_on_borrow = true;
        self
    }

    pub fn with_test_on_return(mut self) -> Self {
        self.test_on_return = true;
        self
    }

    pub fn with_test_while_idle(mut self) -> Self {
        self.test_while_idle = true;
        self
    }

    /// Enable the background evictor
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_genericpool::{EvictionBatch, PoolConfiguration};
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_eviction_interval(Duration::from_secs(10))
    ///     .with_eviction_batch(EvictionBatch::Fraction(4))
    ///     .with_min_evictable_idle_time(Duration::from_secs(60));
    ///
    /// assert_eq!(config.time_between_eviction_runs, Some(Duration::from_secs(10)));
    /// assert_eq!(config.num_tests_per_eviction_run.tests_for(10), 3);
    /// ```
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.time_between_eviction_runs = Some(interval);
        self
    }

    pub fn with_eviction_batch(mut self, batch: EvictionBatch) -> Self {
        self.num_tests_per_eviction_run = batch;
        self
    }

    pub fn with_min_evictable_idle_time(mut self, idle: Duration) -> Self {
        self.min_evictable_idle_time = Some(idle);
        self
    }

    pub fn with_soft_min_evictable_idle_time(mut self, idle: Duration) -> Self {
        self.soft_min_evictable_idle_time = Some(idle);
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }
}
