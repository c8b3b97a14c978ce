//! Thread parking operations

use core::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use std::{
    sync::Arc,
    task::Wake,
    thread,
};

use parking::{Parker, Unparker};

use crate::types::Expiry;

struct Unpark(Unparker);

impl Wake for Unpark {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

fn parker_pair() -> (Parker, Waker) {
    let (parker, unparker) = parking::pair();
    (parker, Waker::from(Arc::new(Unpark(unparker))))
}

thread_local! {
    static THREAD_PARKER: RefCell<(Parker, Waker)> = RefCell::new(parker_pair());
}

/// Block the current thread on the result of a [`Future`].
pub fn block_on<T>(fut: impl Future<Output = T>) -> T {
    let mut fut = core::pin::pin!(fut);
    with_parker(|parker, waker| {
        let mut cx = Context::from_waker(waker);
        loop {
            if let Poll::Ready(result) = fut.as_mut().poll(&mut cx) {
                break result;
            }
            parker.park();
        }
    })
}

/// Block the current thread on the result of a poll function, with an optional timeout.
/// The function is polled one final time once the timeout is reached, and a
/// `Poll::Pending` result is returned if it is still not ready.
pub fn block_on_poll<T>(
    mut poll: impl FnMut(&mut Context<'_>) -> Poll<T>,
    timeout: impl Into<Expiry>,
) -> Poll<T> {
    let timeout = timeout.into();
    with_parker(|parker, waker| {
        let mut cx = Context::from_waker(waker);
        let mut repeat = 0usize;
        loop {
            let result = poll(&mut cx);
            if result.is_ready() {
                break result;
            }
            let notified = match timeout.instant() {
                Some(deadline) => parker.park_deadline(deadline),
                None => {
                    parker.park();
                    true
                }
            };
            if !notified {
                break poll(&mut cx);
            }
            repeat += 1;
            if repeat >= 5 {
                // seem to be effectively in a spin loop, back off polling
                thread::yield_now();
                repeat = 0;
            }
        }
    })
}

/// Block the current thread on the result of a [`Future`] + [`Unpin`], with an
/// optional timeout. The future is returned if the timeout is reached.
#[inline]
pub fn block_on_unpin<F, T>(mut fut: F, timeout: impl Into<Expiry>) -> Result<T, F>
where
    F: Future<Output = T> + Unpin,
{
    match block_on_poll(|cx| Pin::new(&mut fut).poll(cx), timeout) {
        Poll::Ready(r) => Ok(r),
        Poll::Pending => Err(fut),
    }
}

fn with_parker<T>(f: impl FnOnce(&Parker, &Waker) -> T) -> T {
    THREAD_PARKER.with(|cached| {
        if let Ok(borrowed) = cached.try_borrow_mut() {
            let (parker, waker) = &*borrowed;
            f(parker, waker)
        } else {
            // thread parker in use, create a new one
            let (parker, waker) = parker_pair();
            f(&parker, &waker)
        }
    })
}
