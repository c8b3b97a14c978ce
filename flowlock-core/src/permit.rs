//! A binary admission permit with a FIFO wait queue.
//!
//! The permit is either available or held. Waiters register a waker and
//! are granted the permit in arrival order: releasing a held permit while
//! waiters are queued hands it directly to the oldest one.

use core::task::{Context, Poll, Waker};
use std::collections::VecDeque;

use parking_lot::Mutex;

/// Identifies a queued waiter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaiterKey(u64);

/// A permit which may be held by at most one party at a time
#[derive(Debug)]
pub struct Permit {
    state: Mutex<PermitState>,
}

#[derive(Debug)]
struct PermitState {
    available: bool,
    granted: Option<WaiterKey>,
    waiters: VecDeque<Waiter>,
    next_key: u64,
}

#[derive(Debug)]
struct Waiter {
    key: WaiterKey,
    waker: Waker,
}

impl PermitState {
    // pass a released permit on to the next waiter
    fn hand_off(&mut self) -> Option<Waker> {
        debug_assert!(!self.available, "Released an available permit");
        debug_assert!(self.granted.is_none(), "Released a permit with a pending grant");
        if let Some(waiter) = self.waiters.pop_front() {
            self.granted.replace(waiter.key);
            Some(waiter.waker)
        } else {
            self.available = true;
            None
        }
    }
}

impl Permit {
    /// Create a new, available `Permit`
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PermitState {
                available: true,
                granted: None,
                waiters: VecDeque::new(),
                next_key: 0,
            }),
        }
    }

    /// Take the permit if it is immediately available
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.available {
            state.available = false;
            true
        } else {
            false
        }
    }

    /// Poll for the permit. On the first pending poll the caller is queued
    /// and `waiter` receives its key; later polls must pass the same key
    /// back. When the permit is granted the key is cleared.
    ///
    /// A caller which stops polling while `waiter` is set must call
    /// [`Permit::cancel_wait`].
    pub fn poll_acquire(&self, waiter: &mut Option<WaiterKey>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock();
        if let Some(key) = *waiter {
            if state.granted == Some(key) {
                state.granted = None;
                waiter.take();
                return Poll::Ready(());
            }
            if let Some(entry) = state.waiters.iter_mut().find(|w| w.key == key) {
                if !entry.waker.will_wake(cx.waker()) {
                    entry.waker = cx.waker().clone();
                }
                return Poll::Pending;
            }
            // unknown key, fall through and queue again
            waiter.take();
        }
        if state.available {
            state.available = false;
            Poll::Ready(())
        } else {
            let key = WaiterKey(state.next_key);
            state.next_key = state.next_key.wrapping_add(1);
            state.waiters.push_back(Waiter {
                key,
                waker: cx.waker().clone(),
            });
            waiter.replace(key);
            Poll::Pending
        }
    }

    /// Remove a waiter which is no longer interested in the permit. If the
    /// permit was already granted to it, the permit is passed on.
    pub fn cancel_wait(&self, key: WaiterKey) {
        let wake = {
            let mut state = self.state.lock();
            if state.granted == Some(key) {
                state.granted = None;
                state.hand_off()
            } else {
                if let Some(pos) = state.waiters.iter().position(|w| w.key == key) {
                    state.waiters.remove(pos);
                }
                None
            }
        };
        if let Some(waker) = wake {
            waker.wake();
        }
    }

    /// Return the permit, granting it to the oldest waiter if there is one
    pub fn release(&self) {
        let wake = self.state.lock().hand_off();
        if let Some(waker) = wake {
            waker.wake();
        }
    }

    /// Determine if the permit is currently available
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// Get the number of queued waiters
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Default for Permit {
    fn default() -> Self {
        Self::new()
    }
}
