use core::{
    fmt::{self, Debug, Formatter},
    ptr,
    sync::atomic::{AtomicBool, Ordering},
};
use std::sync::Arc;

use flowlock_core::{
    flow::{self, FlowId},
    InvalidRelease, LockError,
};
use tracing::{error, trace};

use crate::mutex::MutexInner;

/// The capability returned by acquiring a [`ReentrantMutex`](crate::ReentrantMutex).
///
/// An *active* token owns the lock and returns it when released or dropped.
/// A *no-op* token is handed out when the current flow already holds the
/// lock; releasing it does nothing.
///
/// An active token must be released by the flow that acquired it. Releasing
/// it explicitly from another flow, or more than once, is rejected with
/// [`LockError::InvalidRelease`].
#[must_use = "the lock is released as soon as the token is dropped"]
pub struct ReleaseToken {
    state: Option<Arc<TokenState>>,
}

impl ReleaseToken {
    #[inline]
    pub(crate) fn active(state: Arc<TokenState>) -> Self {
        Self { state: Some(state) }
    }

    /// Create a token which does not own any lock
    #[inline]
    pub const fn noop() -> Self {
        Self { state: None }
    }

    /// Determine if this token owns the lock
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Determine if this token has released its lock. Always `false` for
    /// a no-op token.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.state
            .as_ref()
            .map(|state| state.is_released())
            .unwrap_or(false)
    }

    /// Get the flow which owns the lock through this token
    #[inline]
    pub fn owner(&self) -> Option<FlowId> {
        self.state.as_ref().map(|state| state.owner())
    }

    /// Release the lock. For an active token this must be called from the
    /// owning flow, and only once.
    pub fn release(&mut self) -> Result<(), LockError> {
        match self.state.as_ref() {
            Some(state) => state.release(),
            None => Ok(()),
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if state.is_released() {
                return;
            }
            if let Err(err) = state.release() {
                // the permit must not be lost; the owner's stale binding is
                // ignored once the state is marked released
                error!(mutex = state.mutex.label(), %err, "token dropped outside its flow");
                state.force_release();
            }
        }
    }
}

impl Debug for ReleaseToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.state.as_ref() {
            Some(state) => f
                .debug_struct("ReleaseToken")
                .field("mutex", &state.mutex.label())
                .field("owner", &state.owner)
                .field("released", &state.is_released())
                .finish(),
            None => f.write_str("ReleaseToken(noop)"),
        }
    }
}

pub(crate) struct TokenState {
    mutex: Arc<MutexInner>,
    owner: FlowId,
    released: AtomicBool,
}

impl TokenState {
    pub(crate) fn new(mutex: Arc<MutexInner>, owner: FlowId) -> Self {
        Self {
            mutex,
            owner,
            released: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn owner(&self) -> FlowId {
        self.owner
    }

    #[inline]
    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn release(self: &Arc<Self>) -> Result<(), LockError> {
        let current = flow::current_id();
        if current != self.owner {
            if self.is_released() {
                return Err(InvalidRelease::AlreadyReleased.into());
            }
            return Err(InvalidRelease::WrongFlow {
                owner: self.owner,
                current,
            }
            .into());
        }
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(InvalidRelease::AlreadyReleased.into());
        }
        self.unbind();
        self.mutex.permit.release();
        trace!(mutex = self.mutex.label(), flow = %self.owner, "released");
        Ok(())
    }

    // the owner flow may keep a dead binding until it next acquires, which
    // holds no reference to the mutex
    fn force_release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.mutex.permit.release();
        }
    }

    // clear the holder binding of the current flow if it refers to this token
    fn unbind(self: &Arc<Self>) {
        let bound = self.mutex.holder.with(|holder| {
            holder
                .map(|state| ptr::eq(state.as_ptr(), Arc::as_ptr(self)))
                .unwrap_or(false)
        });
        if bound {
            self.mutex.holder.take();
        }
    }
}
