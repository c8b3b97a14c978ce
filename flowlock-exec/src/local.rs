use core::{
    cell::{Cell, RefCell},
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    task::{Context, Poll, Waker},
};
use std::{
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
    sync::Arc,
    task::Wake,
};

use flowlock_core::{flow, thread::block_on};
use futures_lite::FutureExt;
use parking_lot::Mutex;
use tracing::trace;

use crate::join::{JoinError, JoinHandle};

type LocalFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// A single-threaded cooperative executor.
///
/// Each spawned future runs as a fork of the flow which spawned it, so
/// tasks interleaved on the one thread remain distinct flows. Spawned tasks
/// only make progress while [`LocalPool::run_until`] is driving the pool.
pub struct LocalPool {
    shared: Arc<Shared>,
    main_waker: Waker,
    tasks: RefCell<HashMap<usize, LocalFuture>>,
    next_id: Cell<usize>,
}

struct Shared {
    ready: Mutex<VecDeque<usize>>,
    main_woken: AtomicBool,
    driver: Mutex<Option<Waker>>,
}

impl Shared {
    fn notify(&self) {
        let driver = self.driver.lock().clone();
        if let Some(waker) = driver {
            waker.wake();
        }
    }
}

struct TaskWake {
    id: usize,
    shared: Arc<Shared>,
}

impl Wake for TaskWake {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.shared.ready.lock().push_back(self.id);
        self.shared.notify();
    }
}

struct MainWake(Arc<Shared>);

impl Wake for MainWake {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.main_woken.store(true, Ordering::Release);
        self.0.notify();
    }
}

impl LocalPool {
    /// Create an empty pool
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            ready: Mutex::new(VecDeque::new()),
            main_woken: AtomicBool::new(false),
            driver: Mutex::new(None),
        });
        Self {
            main_waker: Waker::from(Arc::new(MainWake(shared.clone()))),
            shared,
            tasks: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        }
    }

    /// Spawn a future on the pool as a fork of the current flow
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let (sender, join) = JoinHandle::new_pair();
        let future = flow::fork(async move {
            let result = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .map_err(JoinError::Panicked);
            sender.send(result).ok();
        });
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.tasks.borrow_mut().insert(id, Box::pin(future));
        self.shared.ready.lock().push_back(id);
        self.shared.notify();
        join
    }

    /// Drive the pool on the current thread until `future` completes. The
    /// future itself runs in the current flow.
    pub fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.shared.main_woken.store(true, Ordering::Release);
        let output = block_on(RunUntil {
            pool: self,
            future: Box::pin(future),
        });
        self.shared.driver.lock().take();
        output
    }

    /// Get the number of tasks which have not completed
    pub fn task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    fn poll_task(&self, id: usize) {
        // the task is taken out so that it may spawn while being polled
        let task = self.tasks.borrow_mut().remove(&id);
        if let Some(mut task) = task {
            let waker = Waker::from(Arc::new(TaskWake {
                id,
                shared: self.shared.clone(),
            }));
            let mut cx = Context::from_waker(&waker);
            if task.as_mut().poll(&mut cx).is_pending() {
                self.tasks.borrow_mut().insert(id, task);
            } else {
                trace!(task = id, "local task complete");
            }
        }
    }
}

impl Default for LocalPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for LocalPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPool")
            .field("tasks", &self.task_count())
            .field("ready", &self.shared.ready.lock().len())
            .finish()
    }
}

struct RunUntil<'p, F> {
    pool: &'p LocalPool,
    future: Pin<Box<F>>,
}

impl<F: Future> Future for RunUntil<'_, F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let pool = self.pool;
        {
            let mut driver = pool.shared.driver.lock();
            if !driver.as_ref().map_or(false, |w| w.will_wake(cx.waker())) {
                driver.replace(cx.waker().clone());
            }
        }
        loop {
            if pool.shared.main_woken.swap(false, Ordering::AcqRel) {
                let mut main_cx = Context::from_waker(&pool.main_waker);
                if let Poll::Ready(output) = self.future.as_mut().poll(&mut main_cx) {
                    return Poll::Ready(output);
                }
            }
            let next = pool.shared.ready.lock().pop_front();
            match next {
                Some(id) => pool.poll_task(id),
                None => return Poll::Pending,
            }
        }
    }
}
