/*!
 * Semaphore Tests
 * Permit bounds, fairness, barging try-acquire and permit accounting
 */

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use queued_sync::{park, Semaphore, SyncConfig, SyncError};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::yield_now();
    }
}

#[test]
fn test_permits_bound_concurrency() {
    for config in [SyncConfig::non_fair(), SyncConfig::fair()] {
        let sem = Arc::new(Semaphore::with_config(3, config).unwrap());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let (sem, inside, peak) = (sem.clone(), inside.clone(), peak.clone());
                thread::spawn(move || {
                    for _ in 0..200 {
                        sem.acquire().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        sem.release().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(sem.available_permits(), 3);
        assert!(!sem.has_queued_threads());
    }
}

#[test]
fn test_third_acquirer_blocks_until_release() {
    let sem = Arc::new(Semaphore::new(2).unwrap());
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let t1 = {
        let sem = sem.clone();
        thread::spawn(move || {
            sem.acquire().unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            sem.release().unwrap();
        })
    };
    held_rx.recv().unwrap();

    let sem2 = sem.clone();
    thread::spawn(move || sem2.acquire().unwrap()).join().unwrap();
    assert_eq!(sem.available_permits(), 0);

    let (tx, rx) = mpsc::channel();
    let t3 = {
        let sem = sem.clone();
        thread::spawn(move || {
            tx.send(park::current()).unwrap();
            sem.acquire().unwrap();
        })
    };
    let waiter = rx.recv().unwrap();
    wait_for(|| sem.queued_threads().contains(&waiter));

    release_tx.send(()).unwrap();
    t1.join().unwrap();
    t3.join().unwrap();
    assert_eq!(sem.available_permits(), 0);
    assert!(!sem.has_queued_threads());
}

#[test]
fn test_fair_semaphore_serves_in_order_but_try_acquire_barges() {
    let sem = Arc::new(Semaphore::with_config(0, SyncConfig::fair()).unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (id, permits) in [(1, 2), (2, 1)] {
        let (s, o) = (sem.clone(), order.clone());
        let (tx, rx) = mpsc::channel();
        handles.push(thread::spawn(move || {
            tx.send(park::current()).unwrap();
            s.acquire_many(permits).unwrap();
            o.lock().unwrap().push(id);
        }));
        let waiter = rx.recv().unwrap();
        wait_for(|| sem.queued_threads().contains(&waiter));
    }
    assert_eq!(sem.queue_length(), 2);

    // One permit is not enough for the head waiter; a one-shot try still takes it
    sem.release().unwrap();
    assert!(sem.try_acquire());
    assert_eq!(sem.queue_length(), 2);

    sem.release_many(2).unwrap();
    wait_for(|| order.lock().unwrap().len() == 1);
    sem.release().unwrap();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn test_bulk_release_wakes_several_waiters() {
    let sem = Arc::new(Semaphore::new(0).unwrap());
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let sem = sem.clone();
            thread::spawn(move || sem.acquire_uninterruptibly().unwrap())
        })
        .collect();
    wait_for(|| sem.queue_length() == 5);

    sem.release_many(5).unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn test_interrupted_acquire_keeps_permits() {
    let sem = Arc::new(Semaphore::new(1).unwrap());
    let (tx, rx) = mpsc::channel();
    let waiter = {
        let sem = sem.clone();
        thread::spawn(move || {
            tx.send(park::current()).unwrap();
            sem.acquire_many(2)
        })
    };
    let handle = rx.recv().unwrap();
    wait_for(|| sem.queued_threads().contains(&handle));

    handle.interrupt();
    assert_eq!(waiter.join().unwrap(), Err(SyncError::Interrupted));
    assert_eq!(sem.available_permits(), 1);
    assert_eq!(sem.queue_length(), 0);
}

#[test]
#[serial]
fn test_try_acquire_for_waits_for_release() {
    let sem = Arc::new(Semaphore::new(0).unwrap());
    let waiter = {
        let sem = sem.clone();
        thread::spawn(move || sem.try_acquire_many_for(2, Duration::from_secs(10)).unwrap())
    };
    wait_for(|| sem.has_queued_threads());

    sem.release().unwrap();
    sem.release().unwrap();
    assert!(waiter.join().unwrap());
    assert_eq!(sem.available_permits(), 0);
}

proptest! {
    #[test]
    fn prop_permit_accounting_matches_model(
        initial in 0i32..16,
        ops in prop::collection::vec((any::<bool>(), 0i32..6), 0..64)
    ) {
        let sem = Semaphore::new(initial).unwrap();
        let mut model = initial;

        for (acquire, n) in ops {
            if acquire {
                let taken = sem.try_acquire_many(n).unwrap();
                prop_assert_eq!(taken, model >= n);
                if taken {
                    model -= n;
                }
            } else {
                sem.release_many(n).unwrap();
                model += n;
            }
            prop_assert_eq!(sem.available_permits(), model);
            prop_assert!(sem.available_permits() >= 0);
        }

        prop_assert_eq!(sem.drain_permits(), model);
        prop_assert_eq!(sem.available_permits(), 0);
    }
}
