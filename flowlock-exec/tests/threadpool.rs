use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flowlock_core::flow::{self, FlowLocal};
use flowlock_core::thread::block_on;
use flowlock_exec::{JoinError, ThreadPool, ThreadPoolConfig};
use futures_lite::future;

fn run_test<T>(test: impl FnOnce() -> T) -> T {
    tracing_subscriber::fmt::try_init().ok();
    test()
}

#[test]
fn spawn_keeps_flow_across_workers() {
    run_test(|| {
        let pool = ThreadPoolConfig::default().min_count(4).build();
        let handle = pool.spawn(async {
            let id = flow::current_id();
            let mut threads = HashSet::new();
            for _ in 0..200 {
                threads.insert(thread::current().id());
                assert_eq!(flow::current_id(), id);
                future::yield_now().await;
            }
            threads.len()
        });
        assert!(handle.join().expect("Error joining task") >= 1);
    })
}

#[test]
fn spawn_forks_values() {
    run_test(|| {
        let pool = ThreadPool::default();
        let local = Arc::new(FlowLocal::<u32>::new());
        local.set(3);
        let parent = flow::current_id();
        let handles = (0..8)
            .map(|index| {
                let local = local.clone();
                pool.spawn(async move {
                    let seen = local.get();
                    local.set(index);
                    future::yield_now().await;
                    (flow::current_id(), seen, local.get())
                })
            })
            .collect::<Vec<_>>();
        let mut ids = HashSet::new();
        for (index, handle) in handles.into_iter().enumerate() {
            let (id, seen, after) = handle.join().expect("Error joining task");
            assert_ne!(id, parent);
            assert!(ids.insert(id));
            assert_eq!(seen, Some(3));
            assert_eq!(after, Some(index as u32));
        }
        assert_eq!(local.get(), Some(3));
    })
}

#[test]
fn run_forks_values() {
    run_test(|| {
        let pool = ThreadPool::default();
        let local = Arc::new(FlowLocal::<&'static str>::new());
        local.set("parent");
        let handle = pool.run({
            let local = local.clone();
            move || {
                let seen = local.get();
                local.set("child");
                seen
            }
        });
        assert_eq!(handle.join().expect("Error joining task"), Some("parent"));
        assert_eq!(local.get(), Some("parent"));
    })
}

#[test]
fn run_reports_panic() {
    run_test(|| {
        let pool = ThreadPoolConfig::default().min_count(1).build();
        let err = pool
            .run(|| -> u32 { panic!("expected panic") })
            .join()
            .expect_err("Expected panic");
        assert!(err.is_panic());
        // the worker survives
        assert_eq!(pool.run(|| 5).join().expect("Error joining task"), 5);
    })
}

#[test]
fn spawn_reports_panic() {
    run_test(|| {
        let pool = ThreadPool::default();
        let err = block_on(pool.spawn(async {
            future::yield_now().await;
            panic!("expected panic");
        }))
        .expect_err("Expected panic");
        assert!(matches!(err, JoinError::Panicked(_)));
    })
}

#[test]
fn abandoned_task_is_cancelled() {
    run_test(|| {
        let pool = ThreadPoolConfig::default().min_count(1).build();
        // nothing holds a waker for this future, so it is dropped after one poll
        let handle = pool.spawn(future::pending::<()>());
        let err = handle.join().expect_err("Expected cancellation");
        assert!(matches!(err, JoinError::Cancelled));
    })
}

#[test]
fn drop_waits_for_workers() {
    run_test(|| {
        let pool = ThreadPoolConfig::default().min_count(2).build();
        let handle = pool.run(|| thread::sleep(Duration::from_millis(20)));
        handle.join().expect("Error joining task");
        drop(pool);
    })
}
