//! Error types for the object pool

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error raised by a [`PooledObjectFactory`](crate::PooledObjectFactory) hook.
pub type FactoryError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// No idle object and no capacity left, and the pool does not block.
    #[error("Pool exhausted - no idle objects and no capacity to create more")]
    Exhausted,

    /// The pool stayed exhausted for the whole borrow deadline.
    #[error("Timed out after {0:?} waiting for an idle object")]
    Timeout(Duration),

    #[error("Pool is closed")]
    Closed,

    /// Creating, activating or passivating a fresh object failed.
    #[error("Factory failed: {0}")]
    Factory(Arc<dyn std::error::Error + Send + Sync>),

    /// A freshly created object did not pass validation.
    #[error("Object validation failed")]
    ValidationFailed,

    #[error("Object is not managed by this pool")]
    UnknownObject,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    pub(crate) fn factory(err: FactoryError) -> Self {
        PoolError::Factory(Arc::from(err))
    }

    /// True for both the non-blocking and the timed-out flavour of exhaustion.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted | PoolError::Timeout(_))
    }

    /// True when the error originated in a factory hook.
    pub fn is_factory_error(&self) -> bool {
        matches!(self, PoolError::Factory(_) | PoolError::ValidationFailed)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PoolError::Exhausted.is_exhausted());
        assert!(PoolError::Timeout(Duration::from_millis(5)).is_exhausted());
        assert!(!PoolError::Closed.is_exhausted());

        let err = PoolError::factory("boom".into());
        assert!(err.is_factory_error());
        assert_eq!(err.to_string(), "Factory failed: boom");
        assert!(PoolError::ValidationFailed.is_factory_error());
    }
}
