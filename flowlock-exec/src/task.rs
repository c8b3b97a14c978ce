use core::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    task::{Context, Waker},
};
use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    task::Wake,
};

use parking_lot::Mutex;
use tracing::trace;

use crate::threadpool::ThreadPoolInner;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawned future, re-queued on the pool each time it is woken
pub(crate) struct Task {
    future: Mutex<Option<BoxFuture>>,
    scheduled: AtomicBool,
    pool: Weak<ThreadPoolInner>,
}

impl Task {
    pub(crate) fn spawn(pool: &Arc<ThreadPoolInner>, future: BoxFuture) {
        let task = Arc::new(Self {
            future: Mutex::new(Some(future)),
            scheduled: AtomicBool::new(true),
            pool: Arc::downgrade(pool),
        });
        pool.push(Box::new(move || task.run()));
    }

    fn schedule(self: Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            // already queued
            return;
        }
        match self.pool.upgrade() {
            Some(pool) => pool.push(Box::new(move || self.run())),
            None => trace!("woken after pool shutdown"),
        }
    }

    fn run(self: Arc<Self>) {
        let mut slot = self.future.lock();
        self.scheduled.store(false, Ordering::Release);
        if let Some(future) = slot.as_mut() {
            let waker = Waker::from(self.clone());
            let mut cx = Context::from_waker(&waker);
            // spawned futures catch their own panics; this guards the worker
            let done = std::panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
                .map(|poll| poll.is_ready())
                .unwrap_or(true);
            if done {
                slot.take();
            }
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.clone().schedule();
    }
}
