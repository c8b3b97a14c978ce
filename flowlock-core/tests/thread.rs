use std::task::Poll;
use std::thread;
use std::time::{Duration, Instant};

use futures_lite::future;

use flowlock_core::thread::{block_on, block_on_poll, block_on_unpin};

use self::utils::run_test;

mod utils;

#[test]
fn block_on_ready() {
    run_test(|| {
        assert_eq!(block_on(async { true }), true);
    })
}

#[test]
fn block_on_timeout() {
    run_test(|| {
        let start = Instant::now();
        assert_eq!(
            block_on_poll(|_cx| Poll::<bool>::Pending, Duration::from_millis(100)),
            Poll::Pending
        );
        assert!(start.elapsed() >= Duration::from_millis(100));
    })
}

#[test]
fn block_on_repoll() {
    run_test(|| {
        let mut ready = false;
        assert_eq!(
            block_on(future::poll_fn(|cx| {
                if ready {
                    Poll::Ready(true)
                } else {
                    ready = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            })),
            true
        );
    })
}

#[test]
fn block_on_repoll_delay() {
    run_test(|| {
        let mut ready = false;
        assert_eq!(
            block_on_poll(
                |cx| {
                    if ready {
                        Poll::Ready(true)
                    } else {
                        ready = true;
                        let waker = cx.waker().clone();
                        thread::spawn(|| {
                            thread::sleep(Duration::from_millis(50));
                            waker.wake()
                        });
                        Poll::Pending
                    }
                },
                Duration::from_millis(500)
            ),
            Poll::Ready(true)
        );
    })
}

#[test]
fn block_on_nested() {
    run_test(|| {
        // the inner call cannot reuse the thread's cached parker
        assert_eq!(block_on(async { block_on(async { 5 }) + 1 }), 6);
    })
}

#[test]
fn block_on_unpin_returns_future() {
    run_test(|| {
        let pending = future::pending::<()>();
        assert!(block_on_unpin(pending, Duration::from_millis(20)).is_err());
        assert_eq!(block_on_unpin(future::ready(3), None), Ok(3));
    })
}
