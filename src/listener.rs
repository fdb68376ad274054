//! Hook for errors the pool recovers from internally

use crate::errors::PoolError;

/// Receives every error the pool deliberately does not propagate: failed
/// destroys, and factory failures inside the evictor.
///
/// # Examples
///
/// ```
/// use esox_genericpool::{FnFactory, GenericObjectPool, PoolConfiguration, PoolError};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let pool = GenericObjectPool::new(
///     FnFactory::new(|| Ok(0u32)),
///     PoolConfiguration::default(),
/// ).unwrap();
///
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// pool.set_swallowed_error_listener(move |_err: &PoolError| {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
/// ```
pub trait SwallowedErrorListener: Send + Sync {
    fn on_swallowed_error(&self, err: &PoolError);
}

impl<F> SwallowedErrorListener for F
where
    F: Fn(&PoolError) + Send + Sync,
{
    fn on_swallowed_error(&self, err: &PoolError) {
        self(err)
    }
}
