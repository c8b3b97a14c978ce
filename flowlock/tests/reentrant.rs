use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use flowlock::{flow, LockError, ReentrantMutex};
use flowlock_core::thread::block_on;
use flowlock_exec::{ThreadPool, ThreadPoolConfig};
use futures_lite::future::yield_now;

use self::utils::{run_test, Occupancy};

mod utils;

async fn nested_acquire(mutex: &ReentrantMutex) -> Result<bool, LockError> {
    let token = mutex.acquire_async(Duration::ZERO, None).await?;
    Ok(token.is_active())
}

#[test]
fn reenter_after_migrating() {
    run_test(|| {
        let pool = ThreadPoolConfig::default().min_count(4).build();
        let mutex = Arc::new(ReentrantMutex::default());
        let result = block_on(pool.spawn({
            let mutex = mutex.clone();
            async move {
                let mut outer = mutex.lock_async().await?;
                let owner = flow::current_id();
                let mut rounds = 0;
                for _ in 0..20 {
                    yield_now().await;
                    assert_eq!(flow::current_id(), owner);
                    // a zero timeout fails unless the flow re-enters
                    assert!(!nested_acquire(&mutex).await?);
                    let blocking = mutex.acquire(Duration::ZERO, None)?;
                    assert!(!blocking.is_active());
                    rounds += 1;
                }
                outer.release()?;
                Result::<_, LockError>::Ok(rounds)
            }
        }))
        .expect("Error joining task")
        .expect("Error in lock operations");
        assert_eq!(result, 20);
        assert!(!mutex.is_locked());
    })
}

#[test]
fn nested_release_keeps_lock() {
    run_test(|| {
        let mutex = ReentrantMutex::default();
        block_on(flow::fork(async {
            let mut outer = mutex.lock_async().await.expect("Error acquiring lock");
            {
                let mut inner = mutex.lock_async().await.expect("Error re-acquiring lock");
                inner.release().expect("Error releasing no-op token");
            }
            assert!(mutex.is_held_by_current_flow());
            let again = mutex
                .acquire_async(Duration::ZERO, None)
                .await
                .expect("Error re-acquiring lock");
            assert!(!again.is_active());
            outer.release().expect("Error releasing lock");
            assert!(!mutex.is_held_by_current_flow());
        }));
        assert!(!mutex.is_locked());
    })
}

#[test]
fn reacquire_after_release_is_active() {
    run_test(|| {
        let mutex = ReentrantMutex::default();
        block_on(flow::fork(async {
            let first = mutex.lock_async().await.expect("Error acquiring lock");
            drop(first);
            let second = mutex.lock_async().await.expect("Error acquiring lock");
            assert!(second.is_active());
        }));
    })
}

#[test]
fn children_wait_for_parent() {
    run_test(|| {
        let pool = ThreadPool::default();
        let mutex = Arc::new(ReentrantMutex::default());
        let occupancy = Arc::new(Occupancy::default());
        let completed = Arc::new(AtomicUsize::new(0));
        let count = 10_000;

        let mut parent = mutex.lock().expect("Error acquiring lock");
        let handles = (0..count)
            .map(|_| {
                let mutex = mutex.clone();
                let occupancy = occupancy.clone();
                let completed = completed.clone();
                pool.spawn(async move {
                    // the fork carries the parent's binding but not its ownership
                    assert!(!mutex.is_held_by_current_flow());
                    let mut token = mutex.lock_async().await?;
                    assert!(token.is_active());
                    occupancy.enter();
                    yield_now().await;
                    occupancy.leave();
                    token.release()?;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Result::<_, LockError>::Ok(())
                })
            })
            .collect::<Vec<_>>();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(occupancy.entries(), 0);
        assert!(mutex.is_held_by_current_flow());
        parent.release().expect("Error releasing lock");

        for handle in handles {
            handle
                .join()
                .expect("Error joining task")
                .expect("Error in lock operations");
        }
        assert_eq!(completed.load(Ordering::SeqCst), count);
        assert_eq!(occupancy.entries(), count);
        assert!(occupancy.is_empty());
        assert!(!mutex.is_locked());
    })
}

#[test]
fn forked_futures_exclude_each_other() {
    run_test(|| {
        let pool = ThreadPoolConfig::default().min_count(4).build();
        let mutex = Arc::new(ReentrantMutex::default());
        let occupancy = Arc::new(Occupancy::default());
        let handles = (0..32)
            .map(|_| {
                let mutex = mutex.clone();
                let occupancy = occupancy.clone();
                pool.spawn(async move {
                    for _ in 0..20 {
                        let token = mutex.lock_async().await?;
                        occupancy.enter();
                        assert!(!nested_acquire(&mutex).await?);
                        yield_now().await;
                        occupancy.leave();
                        drop(token);
                    }
                    Result::<_, LockError>::Ok(())
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle
                .join()
                .expect("Error joining task")
                .expect("Error in lock operations");
        }
        assert_eq!(occupancy.entries(), 32 * 20);
    })
}
