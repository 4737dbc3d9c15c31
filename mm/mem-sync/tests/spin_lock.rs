use mem_sync::SpinLock;
use std::panic;

#[test]
fn guard_drop_unlocks() {
    let lock = SpinLock::new(0_u32);
    {
        let mut g = lock.lock();
        *g = 41;
    }
    {
        let mut g = lock.lock();
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn try_lock_fails_while_held() {
    let lock = SpinLock::new(());
    let held = lock.try_lock();
    assert!(held.is_some());
    assert!(lock.try_lock().is_none());
    drop(held);
    assert!(lock.try_lock().is_some());
}

#[test]
fn with_lock_returns_and_releases() {
    let lock = SpinLock::new(vec![1, 2]);
    let len = lock.with_lock(|v| {
        v.push(3);
        v.len()
    });
    assert_eq!(len, 3);
    assert_eq!(lock.with_lock(|v| Vec::len(v)), 3);
}

#[test]
fn mutual_exclusion_under_contention() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    let threads = 8;
    let iters = 5_000;

    let lock = Arc::new(SpinLock::new(0_usize));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    lock.with_lock(|v| {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        *v += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn unlocks_on_panic() {
    let lock = SpinLock::new(0_u32);
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        lock.with_lock(|v| {
            *v = 9;
            panic!("boom");
        });
    }));
    assert!(result.is_err());
    assert_eq!(lock.with_lock(|v| *v), 9);
}
