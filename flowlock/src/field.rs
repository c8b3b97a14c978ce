//! Scoped access to values guarded by a [`ReentrantMutex`].
//!
//! Each accessor acquires the mutex, runs one operation, and releases the
//! mutex on every exit path. A panic inside the operation unwinds through the
//! token, which releases the lock before the panic propagates further.

use core::time::Duration;

use flowlock_core::LockError;
use tokio_util::sync::CancellationToken;

use crate::mutex::ReentrantMutex;

impl ReentrantMutex {
    /// Evaluate `accessor` while holding the lock, blocking the current
    /// thread to acquire it.
    pub fn acquire_field<R>(
        &self,
        accessor: impl FnOnce() -> R,
        timeout: impl Into<Option<Duration>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<R, LockError> {
        let mut token = self.acquire(timeout, cancel)?;
        let value = accessor();
        token.release()?;
        Ok(value)
    }

    /// Read a value with `accessor` and pass it to `mutator` while holding the
    /// lock, blocking the current thread to acquire it.
    pub fn set_field<V>(
        &self,
        accessor: impl FnOnce() -> V,
        mutator: impl FnOnce(V),
        timeout: impl Into<Option<Duration>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), LockError> {
        let mut token = self.acquire(timeout, cancel)?;
        mutator(accessor());
        token.release()
    }

    /// Evaluate `accessor` while holding the lock, suspending the current task
    /// to acquire it.
    pub async fn acquire_field_async<R>(
        &self,
        accessor: impl FnOnce() -> R,
        timeout: impl Into<Option<Duration>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<R, LockError> {
        let mut token = self.acquire_async(timeout, cancel).await?;
        let value = accessor();
        token.release()?;
        Ok(value)
    }

    /// Read a value with `accessor` and pass it to `mutator` while holding the
    /// lock, suspending the current task to acquire it.
    pub async fn set_field_async<V>(
        &self,
        accessor: impl FnOnce() -> V,
        mutator: impl FnOnce(V),
        timeout: impl Into<Option<Duration>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), LockError> {
        let mut token = self.acquire_async(timeout, cancel).await?;
        mutator(accessor());
        token.release()
    }
}
