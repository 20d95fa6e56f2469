//! Engine lifecycle: shutdown, dispose and the companion engine.

use pagedb_core::{CoreError, Engine, EngineSettings, TransactionState};
use pagedb_testkit::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn dispose_with_final_checkpoint_truncates_log() {
    let mut test = TestEngine::file();
    write_filled_pages(&test, &[1, 2, 3]);
    let log = LogFile::new(test.log_path().unwrap());
    assert!(!log.is_empty().unwrap());

    test.close();
    assert!(log.is_empty().unwrap());
}

#[test]
fn dispose_without_final_checkpoint_keeps_log() {
    let mut test = TestEngine::file_keeping_log();
    write_filled_pages(&test, &[1]);
    test.close();
    assert_eq!(LogFile::new(test.log_path().unwrap()).whole_records().unwrap(), 2);
}

#[test]
fn read_only_dispose_never_writes() {
    let mut test = TestEngine::file_keeping_log();
    write_filled_pages(&test, &[1, 2]);
    test.close();

    let data_before = std::fs::read(test.data_path().unwrap()).unwrap();
    let log_before = std::fs::read(test.log_path().unwrap()).unwrap();

    test.reopen_with(|s| s.read_only(true).checkpoint_on_shutdown(true))
        .unwrap();
    assert_eq!(test.stats().unwrap().logged_pages, 3);
    test.close();

    assert_eq!(std::fs::read(test.data_path().unwrap()).unwrap(), data_before);
    assert_eq!(std::fs::read(test.log_path().unwrap()).unwrap(), log_before);
}

#[test]
fn double_dispose_is_a_no_op() {
    let test = TestEngine::memory();
    test.dispose().unwrap();
    test.dispose().unwrap();
    assert!(test.is_disposed());
}

#[test]
fn begin_after_dispose_fails() {
    let test = TestEngine::memory();
    test.dispose().unwrap();
    assert!(matches!(test.begin(), Err(CoreError::Disposed)));
    assert!(matches!(test.header(), Err(CoreError::Disposed)));
    assert!(matches!(test.wait_for_queue(), Err(CoreError::Disposed)));
}

#[test]
fn shutdown_is_sticky_and_rolls_back_in_flight_work() {
    let test = TestEngine::memory();
    let ids = write_filled_pages(&test, &[5]);

    let txn = test.begin().unwrap();
    txn.write_page(ids[0], filled_page(6)).unwrap();
    test.shutdown().unwrap();

    assert_eq!(txn.state(), TransactionState::RolledBack);
    assert!(matches!(txn.commit(), Err(CoreError::ShuttingDown)));
    assert!(matches!(test.begin(), Err(CoreError::ShuttingDown)));
    assert_eq!(test.pages_in_use().unwrap(), 0);
}

#[test]
fn shutdown_reaches_transactions_in_other_threads() {
    let test = TestEngine::memory();
    let ids = write_filled_pages(&test, &[1]);
    let started = Barrier::new(2);

    thread::scope(|s| {
        let worker = s.spawn(|| {
            let txn = test.begin().unwrap();
            started.wait();
            loop {
                match txn.read_page(ids[0]) {
                    Ok(_) => thread::yield_now(),
                    Err(e) => return e,
                }
            }
        });
        started.wait();
        test.shutdown().unwrap();
        assert!(matches!(worker.join().unwrap(), CoreError::ShuttingDown));
    });

    assert_eq!(test.stats().unwrap().active_transactions, 0);
}

#[test]
fn scoped_engine_is_disposed_on_error() {
    let test = TestEngine::file();
    let path = test.data_path().unwrap().to_path_buf();
    drop(test.dispose());

    let result: pagedb_core::CoreResult<()> =
        Engine::scoped(EngineSettings::new(path.clone()), |engine| {
            write_filled_pages(engine, &[1]);
            Err(CoreError::invalid_operation("stop"))
        });
    assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));

    let pages = Engine::scoped(EngineSettings::new(path), |engine| {
        Ok(engine.header()?.page_count)
    })
    .unwrap();
    assert_eq!(pages, 2);
}

#[test]
fn owned_companion_is_disposed_with_owner() {
    let test = TestEngine::memory();
    let temp = test.temp_engine().unwrap();
    write_filled_pages(&temp, &[1]);

    test.dispose().unwrap();
    assert!(temp.is_disposed());
}

#[test]
fn supplied_companion_survives_owner() {
    let companion = Arc::new(Engine::open(EngineSettings::memory()).unwrap());
    let test = TestEngine::memory();
    test.set_temp_engine(Arc::clone(&companion)).unwrap();

    test.dispose().unwrap();
    assert!(!companion.is_disposed());
    write_filled_pages(&companion, &[1]);
    companion.dispose().unwrap();
}

#[test]
fn second_companion_is_rejected() {
    let test = TestEngine::memory();
    let first = test.temp_engine().unwrap();
    let other = Arc::new(Engine::open(EngineSettings::memory()).unwrap());

    let err = test.set_temp_engine(Arc::clone(&other)).unwrap_err();
    assert!(matches!(err, CoreError::TempEngineAlreadyDefined));
    assert!(Arc::ptr_eq(&first, &test.temp_engine().unwrap()));
    assert!(!first.is_disposed());
    other.dispose().unwrap();
}

#[test]
fn pages_in_use_returns_to_zero() {
    let test = TestEngine::memory();
    let ids = write_filled_pages(&test, &[1, 2]);
    {
        let txn = test.begin().unwrap();
        let a = txn.read_page(ids[0]).unwrap();
        let b = txn.read_page(ids[1]).unwrap();
        assert_eq!(test.pages_in_use().unwrap(), 2);
        drop((a, b));
    }
    assert_eq!(test.pages_in_use().unwrap(), 0);
    test.wait_for_queue().unwrap();
    assert_eq!(test.queue_length().unwrap(), 0);
}
