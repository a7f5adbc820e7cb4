use small_bpt::{
    close_table, db_delete, db_find, db_insert, init_db, join_table, open_table, shutdown_db,
    storage::file::FileManager, ErrorKind,
};

mod common;

use common::{fresh_path, setup};

#[test]
fn test_operations_require_init() {
    let _guard = setup();

    let path = fresh_path("no_init.db");
    assert_eq!(open_table(&path).unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_init_twice_fails() {
    let _guard = setup();

    init_db(16).unwrap();
    assert_eq!(init_db(16).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(init_db(0).unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_close_and_reopen_persists() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("persist.db");
    let table_id = open_table(&path).unwrap();
    for i in 1..=100 {
        db_insert(table_id, i, &i.to_string()).unwrap();
    }
    close_table(table_id).unwrap();

    // closing released the id; the path opens again and the data is there
    let table_id = open_table(&path).unwrap();
    assert_eq!(db_find(table_id, 73, None).unwrap(), "73");

    // a full shutdown flushes too
    for i in 101..=200 {
        db_insert(table_id, i, &i.to_string()).unwrap();
    }
    shutdown_db().unwrap();

    init_db(16).unwrap();
    let table_id = open_table(&path).unwrap();
    assert_eq!(db_find(table_id, 200, None).unwrap(), "200");
}

#[test]
fn test_close_table_twice_fails() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("double_close.db");
    let table_id = open_table(&path).unwrap();
    close_table(table_id).unwrap();
    assert_eq!(close_table(table_id).unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_long_values_are_truncated() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("truncate.db");
    let table_id = open_table(&path).unwrap();

    let long = "x".repeat(200);
    db_insert(table_id, 1, &long).unwrap();

    let stored = db_find(table_id, 1, None).unwrap();
    assert_eq!(stored.len(), 119);
    assert_eq!(stored, "x".repeat(119));
}

#[test]
fn test_join_emits_matching_keys() {
    let _guard = setup();
    init_db(16).unwrap();

    let path_1 = fresh_path("join_left.db");
    let path_2 = fresh_path("join_right.db");
    let table_1 = open_table(&path_1).unwrap();
    let table_2 = open_table(&path_2).unwrap();

    for i in 1..=10 {
        db_insert(table_1, i, &format!("left{}", i)).unwrap();
    }
    for i in 1..=10 {
        db_insert(table_2, 2 * i, &format!("right{}", 2 * i)).unwrap();
    }

    let out_path = fresh_path("join_out.csv");
    join_table(table_1, table_2, &out_path).unwrap();

    let output = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines,
        vec![
            "2,left2,2,right2",
            "4,left4,4,right4",
            "6,left6,6,right6",
            "8,left8,8,right8",
            "10,left10,10,right10",
        ]
    );

    FileManager::destroy_file(&out_path);
}

#[test]
fn test_join_with_empty_table() {
    let _guard = setup();
    init_db(16).unwrap();

    let path_1 = fresh_path("join_empty_left.db");
    let path_2 = fresh_path("join_empty_right.db");
    let table_1 = open_table(&path_1).unwrap();
    let table_2 = open_table(&path_2).unwrap();

    db_insert(table_1, 1, "one").unwrap();

    let out_path = fresh_path("join_empty_out.csv");
    join_table(table_1, table_2, &out_path).unwrap();
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "");

    FileManager::destroy_file(&out_path);
}

#[test]
fn test_join_crosses_leaf_boundaries() {
    let _guard = setup();
    init_db(32).unwrap();

    let path_1 = fresh_path("join_big_left.db");
    let path_2 = fresh_path("join_big_right.db");
    let table_1 = open_table(&path_1).unwrap();
    let table_2 = open_table(&path_2).unwrap();

    // both tables span several leaves; every third key matches
    for i in 1..=200 {
        db_insert(table_1, i, &i.to_string()).unwrap();
    }
    for i in 1..=66 {
        db_insert(table_2, 3 * i, &(3 * i).to_string()).unwrap();
    }

    let out_path = fresh_path("join_big_out.csv");
    join_table(table_1, table_2, &out_path).unwrap();

    let output = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(output.lines().count(), 66);
    let first = output.lines().next().unwrap();
    assert_eq!(first, "3,3,3,3");

    FileManager::destroy_file(&out_path);
}

#[test]
fn test_failed_insert_after_delete_cycle() {
    let _guard = setup();
    init_db(16).unwrap();

    let path = fresh_path("cycle.db");
    let table_id = open_table(&path).unwrap();

    db_insert(table_id, 5, "five").unwrap();
    db_delete(table_id, 5).unwrap();
    assert_eq!(db_find(table_id, 5, None).unwrap_err().kind(), ErrorKind::KeyNotFound);

    // insert-delete-find round trip laws
    db_insert(table_id, 5, "five again").unwrap();
    assert_eq!(db_find(table_id, 5, None).unwrap(), "five again");
}
