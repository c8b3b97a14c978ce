use std::sync::Arc;

use flowlock::{flow, LockError, ReentrantMutex};
use flowlock_core::thread::block_on;
use flowlock_exec::LocalPool;
use futures_lite::future::{poll_once, yield_now};

use self::utils::{hold, run_test, Occupancy};

mod utils;

async fn critical(mutex: &ReentrantMutex, occupancy: &Occupancy) -> Result<bool, LockError> {
    let mut token = mutex.lock_async().await?;
    let active = token.is_active();
    occupancy.enter();
    yield_now().await;
    yield_now().await;
    occupancy.leave();
    token.release()?;
    Ok(active)
}

#[test]
fn zipped_branches_exclude_each_other() {
    run_test(|| {
        let mutex = ReentrantMutex::default();
        let occupancy = Occupancy::default();
        let (a, b) = block_on(flow::zip(
            critical(&mutex, &occupancy),
            critical(&mutex, &occupancy),
        ));
        assert!(a.expect("Error in first branch"));
        assert!(b.expect("Error in second branch"));
        assert_eq!(occupancy.entries(), 2);
        assert!(!mutex.is_locked());
    })
}

#[test]
fn zipped_branches_in_forked_flow() {
    run_test(|| {
        let mutex = ReentrantMutex::default();
        let occupancy = Occupancy::default();
        block_on(flow::fork(async {
            let outer = flow::current_id();
            let (a, b) = flow::zip(
                critical(&mutex, &occupancy),
                critical(&mutex, &occupancy),
            )
            .await;
            assert!(a.expect("Error in first branch"));
            assert!(b.expect("Error in second branch"));
            assert_eq!(flow::current_id(), outer);
            assert!(!mutex.is_held_by_current_flow());
        }));
        assert_eq!(occupancy.entries(), 2);
    })
}

#[test]
fn local_pool_tasks_exclude_each_other() {
    run_test(|| {
        let pool = LocalPool::new();
        let mutex = Arc::new(ReentrantMutex::default());
        let occupancy = Arc::new(Occupancy::default());
        let handles = (0..8)
            .map(|_| {
                let mutex = mutex.clone();
                let occupancy = occupancy.clone();
                pool.spawn(async move {
                    for _ in 0..10 {
                        assert!(critical(&mutex, &occupancy).await?);
                    }
                    Result::<_, LockError>::Ok(())
                })
            })
            .collect::<Vec<_>>();
        pool.run_until(async {
            for handle in handles {
                handle
                    .await
                    .expect("Error joining task")
                    .expect("Error in lock operations");
            }
        });
        assert_eq!(occupancy.entries(), 80);
        assert!(!mutex.is_locked());
    })
}

#[test]
fn acquire_issued_while_waiting_is_not_reentrant() {
    run_test(|| {
        let mutex = Arc::new(ReentrantMutex::default());
        let (release, holder) = hold(&mutex);
        block_on(flow::fork(async {
            let mut outer = mutex.lock_async();
            assert!(poll_once(&mut outer).await.is_none());
            // issued while the outer acquisition is still waiting
            let mut nested = mutex.lock_async();
            assert!(poll_once(&mut nested).await.is_none());
            assert!(!mutex.is_held_by_current_flow());

            drop(release);
            holder.join().unwrap();
            let outer = outer.await.expect("Error acquiring lock");
            assert!(outer.is_active());
            assert!(mutex.is_held_by_current_flow());
            // still queued as a first-time acquisition
            assert!(poll_once(&mut nested).await.is_none());

            drop(outer);
            let nested = nested.await.expect("Error acquiring lock");
            assert!(nested.is_active());
        }));
        assert!(!mutex.is_locked());
    })
}
