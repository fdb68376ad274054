//! # Esox Generic Object Pool
//!
//! Thread-safe pool for expensive, reusable resources such as connections,
//! sockets, or large buffers. Objects are produced by a
//! [`PooledObjectFactory`] and lent out through RAII guards.
//!
//! ## Features
//!
//! - Capacity limits on live and idle objects, with blocking, failing, or
//!   growing behaviour when the pool is exhausted
//! - Optional fair (FIFO) hand-off between blocked borrowers
//! - LIFO or FIFO reuse of idle objects
//! - Validation on create, borrow, return, and while idle
//! - Background eviction of idle objects with pluggable policies
//! - Minimum idle replenishment and pool warm-up
//! - Async borrow for tokio applications
//! - Metrics snapshots and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_genericpool::{FnFactory, GenericObjectPool, PoolConfiguration};
//!
//! let pool = GenericObjectPool::new(
//!     FnFactory::new(|| Ok(Vec::<u8>::with_capacity(1024))),
//!     PoolConfiguration::new().with_max_total(4),
//! ).unwrap();
//! {
//!     let mut buf = pool.borrow_object().unwrap();
//!     buf.extend_from_slice(b"hello");
//!     // Buffer automatically returned when `buf` goes out of scope
//! }
//! assert_eq!(pool.num_idle(), 1);
//! ```

mod config;
mod errors;
mod eviction;
mod factory;
mod idle;
mod listener;
mod metrics;
mod pool;
mod pooled;
mod stats;
mod timer;

pub use config::{EvictionBatch, PoolConfiguration, WhenExhaustedAction};
pub use errors::{FactoryError, PoolError, PoolResult};
pub use eviction::{EvictionConfig, EvictionPolicy};
pub use factory::{FnFactory, PooledObjectFactory};
pub use listener::SwallowedErrorListener;
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::{MetricsExporter, PoolCollector};
pub use pool::{BorrowedObject, GenericObjectPool};
pub use pooled::{ObjectId, PooledObjectInfo, PooledObjectState};
