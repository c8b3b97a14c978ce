use core::{
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use std::sync::Arc;

use flowlock_core::{permit::WaiterKey, timer::Deadline, LockError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::trace;

use crate::{mutex::MutexInner, token::ReleaseToken};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcquireState {
    Init,
    Waiting,
    Done,
}

/// A future which resolves to a [`ReleaseToken`] once the lock is acquired.
///
/// The decision between re-entering and waiting is made on the first poll,
/// in the flow which polls the future. Dropping the future while it is
/// waiting gives up the place in the queue.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Acquire {
    mutex: Arc<MutexInner>,
    state: AcquireState,
    timeout: Option<Duration>,
    use_timer: bool,
    deadline: Option<Deadline>,
    cancel: Option<CancellationToken>,
    cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    waiter: Option<WaiterKey>,
}

impl Acquire {
    pub(crate) fn new(
        mutex: Arc<MutexInner>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
        use_timer: bool,
    ) -> Self {
        Self {
            mutex,
            state: AcquireState::Init,
            timeout,
            use_timer,
            deadline: None,
            cancel: cancel.cloned(),
            cancelled: None,
            waiter: None,
        }
    }

    /// Get the effective timeout for this acquisition
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn poll_acquire(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<ReleaseToken, LockError>> {
        match self.state {
            AcquireState::Init => {
                if self.mutex.held_by_current() {
                    self.state = AcquireState::Done;
                    trace!(mutex = self.mutex.label(), "re-entered");
                    return Poll::Ready(Ok(ReleaseToken::noop()));
                }
                if let Some(cancel) = self.cancel.clone() {
                    if cancel.is_cancelled() {
                        return Poll::Ready(Err(self.abandon(LockError::Cancelled)));
                    }
                    self.cancelled.replace(Box::pin(cancel.cancelled_owned()));
                }
                if self.use_timer {
                    self.deadline = self.timeout.map(Deadline::after);
                }
                self.state = AcquireState::Waiting;
            }
            AcquireState::Waiting => (),
            AcquireState::Done => panic!("Acquire polled after completion"),
        }

        if self.mutex.permit.poll_acquire(&mut self.waiter, cx).is_ready() {
            // the permit wins over a simultaneous cancellation or timeout
            self.state = AcquireState::Done;
            return Poll::Ready(Ok(self.mutex.grant()));
        }
        if let Some(cancelled) = self.cancelled.as_mut() {
            if cancelled.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(self.abandon(LockError::Cancelled)));
            }
        }
        if let Some(deadline) = self.deadline.as_mut() {
            if Pin::new(deadline).poll(cx).is_ready() {
                let timeout = self.timeout.unwrap_or_default();
                return Poll::Ready(Err(self.abandon(LockError::Timeout(timeout))));
            }
        }
        Poll::Pending
    }

    /// Give up waiting, leaving the permit as though the attempt never happened
    pub(crate) fn abandon(&mut self, err: LockError) -> LockError {
        if let Some(key) = self.waiter.take() {
            self.mutex.permit.cancel_wait(key);
        }
        self.state = AcquireState::Done;
        self.cancelled.take();
        self.deadline.take();
        trace!(mutex = self.mutex.label(), %err, "acquire failed");
        err
    }
}

impl Future for Acquire {
    type Output = Result<ReleaseToken, LockError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().poll_acquire(cx)
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if let Some(key) = self.waiter.take() {
            self.mutex.permit.cancel_wait(key);
        }
    }
}

impl Debug for Acquire {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("mutex", &self.mutex.label())
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .field("waiting", &self.waiter.is_some())
            .finish()
    }
}
