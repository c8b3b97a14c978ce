//! A deadline future which does not depend on any particular executor.
//!
//! Pending deadlines are tracked by a single background thread, started on
//! first use, which sleeps until the earliest registered instant and then
//! wakes every expired entry.

use core::{
    cmp::{Ordering, Reverse},
    future::Future,
    pin::Pin,
    sync::atomic::{self, AtomicU64},
    task::{Context, Poll, Waker},
    time::Duration,
};
use std::{collections::BinaryHeap, thread, time::Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

static TIMER: Lazy<&'static TimerShared> = Lazy::new(TimerShared::start);

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

struct TimerShared {
    state: Mutex<BinaryHeap<Reverse<Entry>>>,
    cvar: Condvar,
}

struct Entry {
    when: Instant,
    seq: u64,
    waker: Waker,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.when, self.seq).cmp(&(other.when, other.seq))
    }
}

impl TimerShared {
    fn start() -> &'static Self {
        let shared: &'static Self = Box::leak(Box::new(Self {
            state: Mutex::new(BinaryHeap::new()),
            cvar: Condvar::new(),
        }));
        debug!("start timer thread");
        thread::Builder::new()
            .name("flowlock-timer".into())
            .spawn(move || shared.run())
            .expect("Error spawning timer thread");
        shared
    }

    fn register(&self, when: Instant, seq: u64, waker: Waker) {
        let mut state = self.state.lock();
        let earliest = state
            .peek()
            .map(|Reverse(first)| when < first.when)
            .unwrap_or(true);
        state.push(Reverse(Entry { when, seq, waker }));
        if earliest {
            self.cvar.notify_one();
        }
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            let now = Instant::now();
            let mut expired = Vec::new();
            while state
                .peek()
                .map(|Reverse(first)| first.when <= now)
                .unwrap_or(false)
            {
                if let Some(Reverse(entry)) = state.pop() {
                    expired.push(entry.waker);
                }
            }
            if !expired.is_empty() {
                MutexGuard::unlocked(&mut state, || {
                    for waker in expired {
                        waker.wake();
                    }
                });
                continue;
            }
            match state.peek().map(|Reverse(first)| first.when) {
                Some(when) => {
                    self.cvar.wait_until(&mut state, when);
                }
                None => self.cvar.wait(&mut state),
            }
        }
    }
}

/// A future which resolves once a point in time has passed
#[derive(Debug)]
pub struct Deadline {
    when: Instant,
    registered: Option<Waker>,
}

impl Deadline {
    /// Create a `Deadline` which resolves at the given instant
    pub fn new(when: Instant) -> Self {
        Self {
            when,
            registered: None,
        }
    }

    /// Create a `Deadline` which resolves after the given duration
    pub fn after(duration: Duration) -> Self {
        Self::new(Instant::now() + duration)
    }

    /// Get the instant at which the deadline resolves
    #[inline]
    pub fn instant(&self) -> Instant {
        self.when
    }

    /// Determine if the deadline has passed
    #[inline]
    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.when
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.has_passed() {
            return Poll::Ready(());
        }
        let registered = self
            .registered
            .as_ref()
            .map(|waker| waker.will_wake(cx.waker()))
            .unwrap_or(false);
        if !registered {
            // an earlier registration may still fire, causing a spurious wake
            let waker = cx.waker().clone();
            let seq = NEXT_SEQ.fetch_add(1, atomic::Ordering::Relaxed);
            TIMER.register(self.when, seq, waker.clone());
            self.registered.replace(waker);
        }
        Poll::Pending
    }
}
