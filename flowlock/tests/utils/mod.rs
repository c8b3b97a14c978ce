#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc, Arc,
};
use std::thread;
use std::time::Duration;

use flowlock::{
    flow::{self, FlowId},
    ReentrantMutex,
};
use parking_lot::Mutex;

pub fn run_test<T>(test: impl FnOnce() -> T) -> T {
    tracing_subscriber::fmt::try_init().ok();
    test()
}

/// Records which flows are inside a critical section
#[derive(Debug, Default)]
pub struct Occupancy {
    inside: Mutex<HashSet<FlowId>>,
    entries: AtomicUsize,
}

impl Occupancy {
    pub fn enter(&self) {
        let mut inside = self.inside.lock();
        assert!(inside.is_empty(), "Critical sections overlap: {:?}", *inside);
        assert!(inside.insert(flow::current_id()));
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        assert!(
            self.inside.lock().remove(&flow::current_id()),
            "Left a critical section which was not entered"
        );
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.inside.lock().is_empty()
    }
}

/// Hold a mutex from another thread until the returned sender is dropped or
/// signalled
pub fn hold(mutex: &Arc<ReentrantMutex>) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
    let (acquired_send, acquired) = mpsc::channel();
    let (release, release_recv) = mpsc::channel::<()>();
    let mutex = mutex.clone();
    let th = thread::spawn(move || {
        let token = mutex.lock().expect("Error acquiring lock");
        acquired_send.send(()).unwrap();
        release_recv.recv().ok();
        drop(token);
    });
    acquired.recv().expect("Holder thread failed");
    (release, th)
}

/// Hold a mutex from another thread for a fixed duration
pub fn hold_for(mutex: &Arc<ReentrantMutex>, duration: Duration) -> thread::JoinHandle<()> {
    let (release, th) = hold(mutex);
    thread::spawn(move || {
        thread::sleep(duration);
        drop(release);
        th.join().unwrap();
    })
}
