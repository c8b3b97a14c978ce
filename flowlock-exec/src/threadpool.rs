use core::{
    fmt::{self, Debug, Formatter},
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use flowlock_core::flow;
use futures_lite::FutureExt;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::{
    join::{JoinError, JoinHandle},
    task::Task,
};

static DEFAULT_THREAD_NAME: &str = "flowlock-pool";

pub(crate) type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for a [`ThreadPool`]
#[derive(Clone, Debug)]
pub struct ThreadPoolConfig {
    idle_timeout: Option<Duration>,
    min_count: usize,
    max_count: Option<usize>,
    thread_name: Option<String>,
}

impl ThreadPoolConfig {
    /// Set how long a worker above the minimum count may sit idle before exiting
    pub fn idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into();
        self
    }

    /// Set the maximum number of worker threads
    pub fn max_count(mut self, count: impl Into<Option<usize>>) -> Self {
        self.max_count = count.into();
        self
    }

    /// Set the number of worker threads started up front and kept alive
    pub fn min_count(mut self, count: usize) -> Self {
        self.min_count = count;
        self
    }

    /// Set the base name of worker threads
    pub fn thread_name(mut self, name: impl Into<Option<String>>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Create the thread pool
    pub fn build(self) -> ThreadPool {
        ThreadPool::new(self)
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_millis(500)),
            min_count: num_cpus::get(),
            max_count: None,
            thread_name: None,
        }
    }
}

/// A pool of worker threads running closures and futures as forked flows
pub struct ThreadPool {
    inner: Arc<ThreadPoolInner>,
}

impl ThreadPool {
    /// Create a new thread pool from a configuration
    pub fn new(config: ThreadPoolConfig) -> Self {
        let inner = Arc::new(ThreadPoolInner {
            state: Mutex::new(Workers {
                idle: 0,
                total: 0,
                queue: VecDeque::new(),
                shutdown: false,
            }),
            cvar: Condvar::new(),
            idle_timeout: config.idle_timeout,
            min_workers: config.min_count,
            max_workers: config.max_count,
            next_index: AtomicUsize::new(0),
            thread_name: config.thread_name,
        });
        {
            let mut state = inner.state.lock();
            for _ in 0..config.min_count {
                if !inner.start_worker(&mut state) {
                    break;
                }
            }
        }
        Self { inner }
    }

    /// Run a function on a worker thread as a fork of the current flow
    pub fn run<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, join) = JoinHandle::new_pair();
        let f = flow::fork_fn(f);
        self.inner.push(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(JoinError::Panicked);
            sender.send(result).ok();
        }));
        join
    }

    /// Spawn a future on the pool as a fork of the current flow
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (sender, join) = JoinHandle::new_pair();
        let future = flow::fork(async move {
            let result = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .map_err(JoinError::Panicked);
            sender.send(result).ok();
        });
        Task::spawn(&self.inner, Box::pin(future));
        join
    }

    /// Get the current number of worker threads
    pub fn thread_count(&self) -> usize {
        self.inner.state.lock().total
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        ThreadPoolConfig::default().into()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        self.inner.shutdown();
        debug!("dropped pool");
    }
}

impl From<ThreadPoolConfig> for ThreadPool {
    fn from(config: ThreadPoolConfig) -> Self {
        ThreadPool::new(config)
    }
}

impl Debug for ThreadPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ThreadPool")
            .field("workers", &state.total)
            .field("idle", &state.idle)
            .field("queued", &state.queue.len())
            .finish()
    }
}

pub(crate) struct ThreadPoolInner {
    state: Mutex<Workers>,
    cvar: Condvar,
    idle_timeout: Option<Duration>,
    min_workers: usize,
    max_workers: Option<usize>,
    next_index: AtomicUsize,
    thread_name: Option<String>,
}

struct Workers {
    idle: usize,
    total: usize,
    queue: VecDeque<Runnable>,
    shutdown: bool,
}

impl Workers {
    // more workers are wanted when none are idle or the backlog is deep
    #[inline]
    fn backlogged(&self) -> bool {
        self.idle == 0 || self.idle * 5 < self.queue.len()
    }
}

impl ThreadPoolInner {
    pub(crate) fn push(self: &Arc<Self>, job: Runnable) {
        let mut state = self.state.lock();
        if state.shutdown {
            trace!("discarding work queued after shutdown");
            return;
        }
        state.queue.push_back(job);
        if !self.maybe_grow(&mut state) {
            self.cvar.notify_one();
        }
    }

    fn start_worker(self: &Arc<Self>, state: &mut Workers) -> bool {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{}",
            self.thread_name.as_deref().unwrap_or(DEFAULT_THREAD_NAME),
            index
        );
        let inner = self.clone();
        state.idle += 1;
        state.total += 1;
        if let Err(err) = thread::Builder::new()
            .name(name)
            .spawn(move || inner.worker_loop())
        {
            error!(%err, "error starting worker thread");
            state.idle -= 1;
            state.total -= 1;
            return false;
        }
        true
    }

    fn maybe_grow(self: &Arc<Self>, state: &mut Workers) -> bool {
        let below_max = self.max_workers.map_or(true, |max| state.total < max);
        if state.backlogged() && (state.total == 0 || below_max) {
            self.cvar.notify_all();
            self.start_worker(state)
        } else {
            false
        }
    }

    /// Wait for the next job, returning `None` once the worker should exit
    fn next_job(self: &Arc<Self>, state: &mut MutexGuard<'_, Workers>) -> Option<Runnable> {
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }
            match self.idle_timeout {
                Some(timeout) => {
                    let expired = self.cvar.wait_for(state, timeout).timed_out();
                    if expired && state.queue.is_empty() && state.total > self.min_workers {
                        debug!("worker thread idle, exiting");
                        return None;
                    }
                }
                None => self.cvar.wait(state),
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        debug!("start worker thread");
        let mut completed = 0usize;
        let mut state = self.state.lock();
        while let Some(job) = self.next_job(&mut state) {
            state.idle -= 1;
            self.maybe_grow(&mut state);
            MutexGuard::unlocked(&mut state, job);
            state.idle += 1;
            completed += 1;
        }
        state.idle -= 1;
        state.total -= 1;
        drop(state);
        // a dropping pool may be waiting for the worker count to reach zero
        self.cvar.notify_all();
        debug!(
            completed,
            thread = thread::current().name().unwrap_or_default(),
            "worker thread shut down"
        );
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        let discarded: Vec<Runnable> = state.queue.drain(..).collect();
        self.cvar.notify_all();
        // pending work may own values which need the lock to drop
        MutexGuard::unlocked(&mut state, || drop(discarded));
        while state.total > 0 {
            self.cvar.wait(&mut state);
        }
    }
}
