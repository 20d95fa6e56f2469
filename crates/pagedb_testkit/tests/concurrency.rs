//! Transactions running on several threads.

use pagedb_core::CoreError;
use pagedb_testkit::prelude::*;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn threads_commit_to_their_own_pages() {
    const THREADS: usize = 4;
    const ROUNDS: u8 = 20;

    let mut test = TestEngine::file();
    let ids = write_filled_pages(&test, &[0; THREADS]);

    thread::scope(|s| {
        for id in &ids {
            let engine = test.engine();
            s.spawn(move || {
                for round in 1..=ROUNDS {
                    overwrite_pages(engine, &[(*id, round)]);
                }
            });
        }
    });

    for id in &ids {
        assert_eq!(read_fill(&test, *id), ROUNDS);
    }
    test.reopen();
    for id in &ids {
        assert_eq!(read_fill(&test, *id), ROUNDS);
    }
}

#[test]
fn conflicting_writer_times_out() {
    let test = TestEngine::memory();
    let ids = write_filled_pages(&test, &[1]);

    let holder = test.begin().unwrap();
    holder.write_page(ids[0], filled_page(2)).unwrap();

    let waiter = test.begin().unwrap();
    let started = Instant::now();
    let err = waiter.write_page(ids[0], filled_page(3)).unwrap_err();
    assert!(matches!(err, CoreError::LockTimeout { .. }));
    assert!(started.elapsed() >= TEST_TIMEOUT - Duration::from_millis(50));

    holder.commit().unwrap();
    waiter.write_page(ids[0], filled_page(3)).unwrap();
    waiter.commit().unwrap();
    assert_eq!(read_fill(&test, ids[0]), 3);
}

#[test]
fn released_lock_wakes_a_waiting_writer() {
    let test = TestEngine::memory();
    let ids = write_filled_pages(&test, &[1]);
    let locked = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            let holder = test.begin().unwrap();
            holder.write_page(ids[0], filled_page(2)).unwrap();
            locked.wait();
            thread::sleep(Duration::from_millis(50));
            holder.commit().unwrap();
        });

        locked.wait();
        let waiter = test.begin().unwrap();
        waiter.write_page(ids[0], filled_page(3)).unwrap();
        waiter.commit().unwrap();
    });

    assert_eq!(read_fill(&test, ids[0]), 3);
}

#[test]
fn allocations_from_many_threads_get_distinct_pages() {
    let test = TestEngine::memory();

    let mut ids: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4u8)
            .map(|fill| {
                let engine = test.engine();
                s.spawn(move || loop {
                    let txn = engine.begin().unwrap();
                    match txn.allocate_page() {
                        Ok(id) => {
                            txn.write_page(id, filled_page(fill)).unwrap();
                            txn.commit().unwrap();
                            return id;
                        }
                        Err(CoreError::LockTimeout { .. }) => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(test.header().unwrap().page_count, 5);
}

#[test]
fn begin_after_shutdown_is_refused() {
    let test = TestEngine::memory();
    let started = Barrier::new(2);

    thread::scope(|s| {
        let worker = s.spawn(|| {
            started.wait();
            loop {
                match test.begin() {
                    Ok(txn) => drop(txn),
                    Err(e) => return e,
                }
            }
        });
        started.wait();
        test.shutdown().unwrap();
        assert!(matches!(worker.join().unwrap(), CoreError::ShuttingDown));
    });

    assert!(matches!(test.begin(), Err(CoreError::ShuttingDown)));
    assert_eq!(test.stats().unwrap().active_transactions, 0);
}
