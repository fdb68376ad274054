//! Lifecycle hooks supplied by the pool's user

use crate::errors::FactoryError;

/// Creates, checks, and disposes of pooled resources.
///
/// Every hook runs outside the pool's locks, so implementations are free to
/// block. Only [`make_object`](Self::make_object) is required.
///
/// # Examples
///
/// ```
/// use esox_genericpool::{FactoryError, PooledObjectFactory};
///
/// struct Buffers;
///
/// impl PooledObjectFactory<Vec<u8>> for Buffers {
///     fn make_object(&self) -> Result<Vec<u8>, FactoryError> {
///         Ok(Vec::with_capacity(4096))
///     }
///
///     fn passivate_object(&self, buf: &mut Vec<u8>) -> Result<(), FactoryError> {
///         buf.clear();
///         Ok(())
///     }
/// }
/// ```
pub trait PooledObjectFactory<T>: Send + Sync + 'static {
    /// Build a new instance.
    fn make_object(&self) -> Result<T, FactoryError>;

    /// Dispose of an instance the pool no longer wants. Errors are swallowed.
    fn destroy_object(&self, obj: T) -> Result<(), FactoryError> {
        drop(obj);
        Ok(())
    }

    /// Report whether an instance is still usable.
    fn validate_object(&self, _obj: &T) -> bool {
        true
    }

    /// Prepare an idle instance for handing to a borrower.
    fn activate_object(&self, _obj: &mut T) -> Result<(), FactoryError> {
        Ok(())
    }

    /// Reset an instance before it goes back to the idle set.
    fn passivate_object(&self, _obj: &mut T) -> Result<(), FactoryError> {
        Ok(())
    }
}

/// Factory built from a closure; the remaining hooks keep their defaults.
pub struct FnFactory<M> {
    make: M,
}

impl<M> FnFactory<M> {
    pub fn new<T>(make: M) -> Self
    where
        M: Fn() -> Result<T, FactoryError> + Send + Sync + 'static,
    {
        Self { make }
    }
}

impl<T, M> PooledObjectFactory<T> for FnFactory<M>
where
    M: Fn() -> Result<T, FactoryError> + Send + Sync + 'static,
{
    fn make_object(&self) -> Result<T, FactoryError> {
        (self.make)()
    }
}
