use std::thread;
use std::time::{Duration, Instant};

use small_bpt::{
    begin_trx, db_find, db_insert, db_update, end_trx, init_db, open_table, types::TrxId,
    Database, ErrorKind,
};

mod common;

use common::{fresh_path, setup};

/// Spin until the transaction is parked in the lock manager. Panics if it
/// never gets there.
fn wait_until_blocked(tid: TrxId) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !Database::lock_manager().is_waiting(tid) {
        assert!(
            Instant::now() < deadline,
            "trx {} never blocked on a lock",
            tid
        );
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_shared_readers_do_not_block() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("shared_readers.db");
    let table_id = open_table(&path).unwrap();
    db_insert(table_id, 1, "one").unwrap();

    let t1 = begin_trx();
    let t2 = begin_trx();

    // both shared reads are granted immediately
    assert_eq!(db_find(table_id, 1, Some(t1)).unwrap(), "one");
    assert_eq!(db_find(table_id, 1, Some(t2)).unwrap(), "one");

    end_trx(t1).unwrap();
    end_trx(t2).unwrap();
}

#[test]
fn test_writer_blocks_until_commit() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("writer_blocks.db");
    let table_id = open_table(&path).unwrap();
    db_insert(table_id, 5, "five").unwrap();

    let t1 = begin_trx();
    let t2 = begin_trx();
    db_update(table_id, 5, "a", t1).unwrap();

    let (sender, receiver) = crossbeam::channel::bounded(1);
    let handle = thread::spawn(move || {
        // conflicts with t1's exclusive lock and parks
        db_update(table_id, 5, "b", t2).unwrap();
        end_trx(t2).unwrap();
        sender.send(()).unwrap();
    });

    wait_until_blocked(t2);
    assert!(receiver.try_recv().is_err());
    assert_eq!(db_find(table_id, 5, None).unwrap(), "a");

    // committing t1 hands the lock to t2
    end_trx(t1).unwrap();
    receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("t2 did not finish after t1 committed");
    handle.join().unwrap();

    assert_eq!(db_find(table_id, 5, None).unwrap(), "b");
}

#[test]
fn test_reader_queues_behind_writer() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("reader_queues.db");
    let table_id = open_table(&path).unwrap();
    db_insert(table_id, 9, "nine").unwrap();

    let t1 = begin_trx();
    let t2 = begin_trx();
    db_update(table_id, 9, "draft", t1).unwrap();

    let (sender, receiver) = crossbeam::channel::bounded(1);
    let handle = thread::spawn(move || {
        let value = db_find(table_id, 9, Some(t2)).unwrap();
        end_trx(t2).unwrap();
        sender.send(value).unwrap();
    });

    wait_until_blocked(t2);
    end_trx(t1).unwrap();

    // the read was granted after commit and sees t1's write
    let value = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value, "draft");
    handle.join().unwrap();
}

#[test]
fn test_upgrade_succeeds_with_writer_queued_behind() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("upgrade_queued.db");
    let table_id = open_table(&path).unwrap();
    db_insert(table_id, 7, "seven").unwrap();

    let t1 = begin_trx();
    let t2 = begin_trx();

    // t1 reads the record, holding a shared lock on it
    assert_eq!(db_find(table_id, 7, Some(t1)).unwrap(), "seven");

    let (sender, receiver) = crossbeam::channel::bounded(1);
    let handle = thread::spawn(move || {
        // queues an exclusive request behind t1's shared lock
        db_update(table_id, 7, "b", t2).unwrap();
        end_trx(t2).unwrap();
        sender.send(()).unwrap();
    });

    wait_until_blocked(t2);

    // t1's own write upgrades its shared lock in place; the waiter queued
    // behind it is no reason to abort
    db_update(table_id, 7, "a", t1).unwrap();
    assert!(receiver.try_recv().is_err());
    assert_eq!(db_find(table_id, 7, None).unwrap(), "a");

    end_trx(t1).unwrap();
    receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("t2 did not finish after t1 committed");
    handle.join().unwrap();

    assert_eq!(db_find(table_id, 7, None).unwrap(), "b");
}

#[test]
fn test_deadlock_aborts_requester_and_undoes() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("deadlock.db");
    let table_id = open_table(&path).unwrap();
    db_insert(table_id, 1, "one").unwrap();
    db_insert(table_id, 2, "two").unwrap();

    let t1 = begin_trx();
    let t2 = begin_trx();

    db_update(table_id, 1, "t1-one", t1).unwrap();

    let (done_sender, done_receiver) = crossbeam::channel::bounded(1);
    let handle = thread::spawn(move || {
        db_update(table_id, 2, "t2-two", t2).unwrap();
        // parks behind t1's exclusive lock on key 1; the read is granted
        // once t1 aborts, after its update has been rolled back
        let value = db_find(table_id, 1, Some(t2)).unwrap();
        end_trx(t2).unwrap();
        done_sender.send(value).unwrap();
    });

    wait_until_blocked(t2);

    // t1 -> t2 -> t1 closes the cycle: this request must abort t1
    let err = db_update(table_id, 2, "t1-two", t1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockDeadlock);
    assert!(!Database::lock_manager().is_active(t1));

    // t2 observed the rolled-back value
    let value = done_receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value, "one");
    handle.join().unwrap();

    assert_eq!(db_find(table_id, 1, None).unwrap(), "one");
    assert_eq!(db_find(table_id, 2, None).unwrap(), "t2-two");
}

#[test]
fn test_update_is_atomic_per_transaction() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("atomic.db");
    let table_id = open_table(&path).unwrap();
    db_insert(table_id, 1, "initial").unwrap();

    // a committed chain of updates by one transaction sticks
    let t1 = begin_trx();
    db_update(table_id, 1, "first", t1).unwrap();
    db_update(table_id, 1, "second", t1).unwrap();
    end_trx(t1).unwrap();

    assert_eq!(db_find(table_id, 1, None).unwrap(), "second");

    // an unknown transaction id is rejected outright
    let err = db_update(table_id, 1, "ghost", 9999).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(db_find(table_id, 1, None).unwrap(), "second");
}
