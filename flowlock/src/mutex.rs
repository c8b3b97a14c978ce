use core::{
    fmt::{self, Debug, Formatter},
    task::Poll,
    time::Duration,
};
use std::sync::{Arc, Weak};

use flowlock_core::{
    flow::{self, FlowLocal},
    permit::Permit,
    thread::block_on_poll,
    LockError,
};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{acquire::Acquire, token::ReleaseToken, token::TokenState};

/// Configuration for a [`ReentrantMutex`]
#[derive(Clone, Debug, Default)]
pub struct MutexConfig {
    default_timeout: Option<Duration>,
    name: Option<String>,
}

impl MutexConfig {
    /// Set the timeout applied to acquire calls which do not supply one.
    /// `None` waits indefinitely.
    pub fn default_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.default_timeout = timeout.into();
        self
    }

    /// Set a name used to identify the mutex in log output
    pub fn name(mut self, name: impl Into<Option<String>>) -> Self {
        self.name = name.into();
        self
    }

    /// Create the mutex
    pub fn build(self) -> ReentrantMutex {
        ReentrantMutex::from(self)
    }
}

/// A mutual-exclusion lock which is re-entrant within a logical flow.
///
/// Acquiring the lock returns a [`ReleaseToken`]. The first acquisition in a
/// flow waits for the lock and returns an active token; any further
/// acquisition by the same flow while that token is live returns a no-op
/// token immediately. A flow forked while the lock is held does not inherit
/// ownership and waits like any other flow.
///
/// # Concurrency within a flow
///
/// Ownership belongs to the flow, not to a particular future. Futures which
/// run concurrently must therefore each run in their own flow: spawn them on
/// a `flowlock-exec` pool, wrap them with [`flow::fork`], or join them with
/// [`flow::zip`]. Two futures joined by a plain combinator in one flow are
/// treated as the same holder and are not excluded from one another.
pub struct ReentrantMutex {
    inner: Arc<MutexInner>,
}

pub(crate) struct MutexInner {
    pub(crate) permit: Permit,
    // weak, so a stale binding never keeps the mutex alive
    pub(crate) holder: FlowLocal<Weak<TokenState>>,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) name: Option<String>,
}

impl MutexInner {
    #[inline]
    pub(crate) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Determine if the current flow holds a live token for this mutex
    pub(crate) fn held_by_current(&self) -> bool {
        let current = flow::current_id();
        self.holder.with(|holder| {
            holder
                .and_then(Weak::upgrade)
                .map(|state| state.owner() == current && !state.is_released())
                .unwrap_or(false)
        })
    }

    /// Bind a newly granted token to the current flow
    pub(crate) fn grant(self: &Arc<Self>) -> ReleaseToken {
        let state = Arc::new(TokenState::new(self.clone(), flow::current_id()));
        self.holder.set(Arc::downgrade(&state));
        trace!(mutex = self.label(), flow = %state.owner(), "acquired");
        ReleaseToken::active(state)
    }
}

impl ReentrantMutex {
    /// Create a new `ReentrantMutex` with an optional default timeout
    pub fn new(default_timeout: impl Into<Option<Duration>>) -> Self {
        MutexConfig::default()
            .default_timeout(default_timeout)
            .build()
    }

    /// Acquire the lock, blocking the current thread while waiting.
    ///
    /// `timeout` overrides the default timeout of the mutex when provided.
    /// Cancelling `cancel` while waiting aborts the wait.
    pub fn acquire(
        &self,
        timeout: impl Into<Option<Duration>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ReleaseToken, LockError> {
        let timeout = self.effective_timeout(timeout.into());
        let mut acquire = Acquire::new(self.inner.clone(), timeout, cancel, false);
        match block_on_poll(|cx| acquire.poll_acquire(cx), timeout) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(acquire.abandon(LockError::Timeout(timeout.unwrap_or_default()))),
        }
    }

    /// Acquire the lock using the default timeout, blocking the current thread
    /// while waiting.
    #[inline]
    pub fn lock(&self) -> Result<ReleaseToken, LockError> {
        self.acquire(None, None)
    }

    /// Acquire the lock, suspending the current task while waiting.
    ///
    /// `timeout` overrides the default timeout of the mutex when provided.
    /// Cancelling `cancel` while waiting aborts the wait. Futures awaiting
    /// the lock concurrently must be in distinct flows; see the
    /// [type documentation](ReentrantMutex#concurrency-within-a-flow).
    pub fn acquire_async(
        &self,
        timeout: impl Into<Option<Duration>>,
        cancel: Option<&CancellationToken>,
    ) -> Acquire {
        let timeout = self.effective_timeout(timeout.into());
        Acquire::new(self.inner.clone(), timeout, cancel, true)
    }

    /// Acquire the lock using the default timeout, suspending the current task
    /// while waiting.
    #[inline]
    pub fn lock_async(&self) -> Acquire {
        self.acquire_async(None, None)
    }

    /// Acquire the lock only if it is immediately available or already held
    /// by the current flow.
    pub fn try_acquire(&self) -> Option<ReleaseToken> {
        if self.inner.held_by_current() {
            Some(ReleaseToken::noop())
        } else if self.inner.permit.try_acquire() {
            Some(self.inner.grant())
        } else {
            None
        }
    }

    /// Determine if the current flow holds the lock
    #[inline]
    pub fn is_held_by_current_flow(&self) -> bool {
        self.inner.held_by_current()
    }

    /// Determine if any flow holds the lock
    #[inline]
    pub fn is_locked(&self) -> bool {
        !self.inner.permit.is_available()
    }

    /// Get the configured name of the mutex
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Get the timeout applied when an acquire call does not supply one
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout
    }

    /// Dispose of the mutex. Tokens which are still outstanding keep the
    /// shared state alive and may be released normally, but disposing of a
    /// mutex which is still held indicates a bug in the caller.
    pub fn dispose(self) {
        if self.is_locked() {
            warn!(mutex = self.inner.label(), "disposed while held");
        } else {
            trace!(mutex = self.inner.label(), "disposed");
        }
    }

    #[inline]
    fn effective_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or(self.inner.default_timeout)
    }
}

impl Default for ReentrantMutex {
    /// Creates a `ReentrantMutex` which waits indefinitely
    fn default() -> Self {
        MutexConfig::default().build()
    }
}

impl From<MutexConfig> for ReentrantMutex {
    fn from(config: MutexConfig) -> Self {
        Self {
            inner: Arc::new(MutexInner {
                permit: Permit::new(),
                holder: FlowLocal::new(),
                default_timeout: config.default_timeout,
                name: config.name,
            }),
        }
    }
}

impl Debug for ReentrantMutex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantMutex")
            .field("name", &self.inner.name)
            .field("default_timeout", &self.inner.default_timeout)
            .field("locked", &self.is_locked())
            .finish()
    }
}
