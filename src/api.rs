//! The public entry points of the engine.
//!
//! This is a thin facade over the database handle and the B+ tree
//! operations; the interactive shell dispatches straight onto these
//! functions. Duplicate keys and missing keys come back as the
//! `KeyDuplicate` / `KeyNotFound` kinds, a deadlock abort as
//! `LockDeadlock`. After an abort the transaction id is dead and must be
//! discarded.

use crate::{
    btree::{join, tree::BTreeTable},
    error::{ErrorKind, SmallError},
    types::{SmallResult, TableId, TrxId},
    Database,
};

/// Initialize the buffer pool with `num_buf` frames. Must run once before
/// any table is opened; fails on a second initialization.
pub fn init_db(num_buf: usize) -> SmallResult {
    Database::mut_buffer_pool().init(num_buf)
}

/// Open (or create) the table file at `pathname` and return its table id.
/// Reopening the same path returns the same id.
pub fn open_table(pathname: &str) -> Result<TableId, SmallError> {
    if !Database::mut_buffer_pool().is_initialized() {
        return Err(SmallError::new(
            ErrorKind::InvalidState,
            "init_db must be called before open_table",
        ));
    }
    Database::mut_file_manager().open_file(pathname)
}

/// Flush the table's cached pages and release its id.
pub fn close_table(table_id: TableId) -> SmallResult {
    Database::mut_buffer_pool().close_table(table_id)
}

/// Flush everything and tear the buffer pool down.
pub fn shutdown_db() -> SmallResult {
    Database::mut_buffer_pool().shutdown()
}

/// Insert `key -> value`. Values longer than 119 bytes are truncated.
pub fn db_insert(table_id: TableId, key: i64, value: &str) -> SmallResult {
    BTreeTable::new(table_id).insert(key, value.as_bytes())
}

/// Look the key up. With a transaction id the read takes a SHARED record
/// lock: it may block behind a writer and may abort on deadlock.
pub fn db_find(table_id: TableId, key: i64, trx: Option<TrxId>) -> Result<String, SmallError> {
    let table = BTreeTable::new(table_id);
    match trx {
        Some(tid) => table.find_trx(key, tid),
        None => table.find(key),
    }
}

/// Overwrite the value of an existing record under an EXCLUSIVE record
/// lock, keeping the pre-image in the transaction's undo stack.
pub fn db_update(table_id: TableId, key: i64, value: &str, trx: TrxId) -> SmallResult {
    BTreeTable::new(table_id).update_trx(key, value.as_bytes(), trx)
}

/// Delete the record with `key`.
pub fn db_delete(table_id: TableId, key: i64) -> SmallResult {
    BTreeTable::new(table_id).delete(key)
}

/// Start a transaction and return its id.
pub fn begin_trx() -> TrxId {
    Database::lock_manager().begin_trx()
}

/// Commit: release the transaction's locks and discard its undo stack.
pub fn end_trx(trx: TrxId) -> SmallResult {
    Database::lock_manager().end_trx(trx)
}

/// Equality join of two open tables, written to `pathname` as
/// `"k,v,k,v"` lines.
pub fn join_table(table_id_1: TableId, table_id_2: TableId, pathname: &str) -> SmallResult {
    join::join_table(table_id_1, table_id_2, pathname)
}
