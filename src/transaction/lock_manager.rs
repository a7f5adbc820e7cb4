use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    types::{PageNum, SmallResult, TableId, TrxId},
    Database,
};

pub use super::transaction::UndoRecord;
use super::transaction::{Trx, TrxStatus};

/// Number of buckets in the lock hash table, keyed by
/// `page_number % LOCK_HASH_TABLE_SIZE`.
pub const LOCK_HASH_TABLE_SIZE: usize = 128;

pub type LockId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Outcome of a lock request. `Conflict` means the lock was enqueued and
/// the caller must wait; `Deadlock` means granting it would close a cycle
/// and the requesting transaction has to abort.
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireResult {
    Success,
    Conflict,
    Deadlock,
}

struct Lock {
    table_id: TableId,
    pagenum: PageNum,
    slot: usize,
    mode: LockMode,
    acquired: bool,
    tid: TrxId,
}

impl Lock {
    fn is_record(&self, table_id: TableId, pagenum: PageNum, slot: usize) -> bool {
        self.table_id == table_id && self.pagenum == pagenum && self.slot == slot
    }
}

struct LockTables {
    /// `LOCK_HASH_TABLE_SIZE` buckets of lock ids in arrival order. Locks
    /// for the same record form a sub-sequence of their bucket.
    buckets: Vec<Vec<LockId>>,
    locks: HashMap<LockId, Lock>,
    trxs: HashMap<TrxId, Trx>,
    next_lock_id: LockId,
    next_tid: TrxId,
}

impl LockTables {
    fn new() -> Self {
        Self {
            buckets: (0..LOCK_HASH_TABLE_SIZE).map(|_| Vec::new()).collect(),
            locks: HashMap::new(),
            trxs: HashMap::new(),
            next_lock_id: 1,
            next_tid: 1,
        }
    }

    fn bucket_of(pagenum: PageNum) -> usize {
        (pagenum % LOCK_HASH_TABLE_SIZE as u64) as usize
    }

    /// The arrival-ordered chain of locks on one record.
    fn record_chain(&self, table_id: TableId, pagenum: PageNum, slot: usize) -> Vec<LockId> {
        self.buckets[Self::bucket_of(pagenum)]
            .iter()
            .copied()
            .filter(|id| self.locks[id].is_record(table_id, pagenum, slot))
            .collect()
    }

    fn add_lock(
        &mut self,
        table_id: TableId,
        pagenum: PageNum,
        slot: usize,
        mode: LockMode,
        acquired: bool,
        tid: TrxId,
    ) -> LockId {
        let lock_id = self.next_lock_id;
        self.next_lock_id += 1;
        self.locks.insert(
            lock_id,
            Lock {
                table_id,
                pagenum,
                slot,
                mode,
                acquired,
                tid,
            },
        );
        self.buckets[Self::bucket_of(pagenum)].push(lock_id);
        self.trxs.get_mut(&tid).unwrap().locks.push(lock_id);
        lock_id
    }

    /// Follow the waits-for chain starting at `start`. Returns true when
    /// the walk reaches `target`, i.e. enqueuing `target` behind `start`
    /// would close a cycle. A visited set bounds the walk on pre-existing
    /// cycles that do not involve `target`.
    fn wait_chain_reaches(&self, start: TrxId, target: TrxId) -> bool {
        let mut current = start;
        let mut visited = HashSet::new();
        loop {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            let trx = match self.trxs.get(&current) {
                Some(trx) => trx,
                None => return false,
            };
            if trx.status != TrxStatus::Waiting {
                return false;
            }
            let lock_id = match trx.waiting_for {
                Some(lock_id) => lock_id,
                None => return false,
            };
            current = self.locks[&lock_id].tid;
        }
    }

    /// Re-examine one record's chain after a lock went away and grant
    /// every lock that is now compatible: the head of the chain, a run of
    /// shared locks, or a lock whose transaction already owns everything
    /// granted so far (upgrade completion). Newly granted waiters are
    /// woken; still-blocked waiters are retargeted at their nearest
    /// predecessor so no waits-for edge dangles.
    fn regrant(&mut self, table_id: TableId, pagenum: PageNum, slot: usize) {
        let chain = self.record_chain(table_id, pagenum, slot);

        let mut granted: Vec<(TrxId, LockMode)> = Vec::new();
        let mut prev: Option<LockId> = None;
        for lock_id in chain {
            let (tid, mode, acquired) = {
                let lock = &self.locks[&lock_id];
                (lock.tid, lock.mode, lock.acquired)
            };

            let compatible = granted.is_empty()
                || (mode == LockMode::Shared
                    && granted.iter().all(|(_, m)| *m == LockMode::Shared))
                || granted.iter().all(|(t, _)| *t == tid);

            if compatible {
                granted.push((tid, mode));
                if !acquired {
                    self.locks.get_mut(&lock_id).unwrap().acquired = true;
                    let trx = self.trxs.get_mut(&tid).unwrap();
                    trx.status = TrxStatus::Running;
                    trx.waiting_for = None;
                    trx.cond.notify_all();
                    debug!("trx {} granted lock on ({}, {}, {})", tid, table_id, pagenum, slot);
                }
            } else {
                let trx = self.trxs.get_mut(&tid).unwrap();
                if trx.status == TrxStatus::Waiting {
                    trx.waiting_for = prev;
                }
            }
            prev = Some(lock_id);
        }
    }
}

/// Record-level lock manager with deadlock detection and per-transaction
/// undo.
///
/// One latch guards both the lock hash table and the transaction table
/// (the consistent latch order in its simplest form); it is always
/// released before a caller parks on its transaction's condition variable.
pub struct LockManager {
    inner: Mutex<LockTables>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockTables::new()),
        }
    }

    /// Register a new transaction and hand out the next tid.
    pub fn begin_trx(&self) -> TrxId {
        let mut tables = self.inner.lock().unwrap();
        let tid = tables.next_tid;
        tables.next_tid += 1;
        tables.trxs.insert(tid, Trx::new());
        debug!("trx {} started", tid);
        tid
    }

    /// Commit: release all locks (waking compatible successors) and
    /// discard the undo stack.
    pub fn end_trx(&self, tid: TrxId) -> SmallResult {
        debug!("trx {} committing", tid);
        self.release_trx(tid)
    }

    pub fn is_active(&self, tid: TrxId) -> bool {
        self.inner.lock().unwrap().trxs.contains_key(&tid)
    }

    /// Whether `tid` is currently parked behind another transaction's
    /// lock.
    pub fn is_waiting(&self, tid: TrxId) -> bool {
        let tables = self.inner.lock().unwrap();
        tables
            .trxs
            .get(&tid)
            .map_or(false, |trx| trx.status == TrxStatus::Waiting)
    }

    /// Request a record lock for `tid`.
    ///
    /// The case analysis, in order: fresh record, lock already held
    /// (no-op or upgrade), shared stacking behind a shared tail, and the
    /// general conflict with a deadlock check before enqueuing.
    pub fn acquire_lock(
        &self,
        table_id: TableId,
        pagenum: PageNum,
        slot: usize,
        mode: LockMode,
        tid: TrxId,
    ) -> Result<AcquireResult, SmallError> {
        let mut tables = self.inner.lock().unwrap();
        if !tables.trxs.contains_key(&tid) {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("transaction {} is not active", tid),
            ));
        }

        let chain = tables.record_chain(table_id, pagenum, slot);

        // case: nobody holds the record
        if chain.is_empty() {
            tables.add_lock(table_id, pagenum, slot, mode, true, tid);
            return Ok(AcquireResult::Success);
        }

        // case: this transaction already holds a lock here
        if let Some(held_pos) = chain.iter().position(|id| tables.locks[id].tid == tid) {
            let held_id = chain[held_pos];
            let held_mode = tables.locks[&held_id].mode;
            if mode == LockMode::Shared || held_mode == LockMode::Exclusive {
                return Ok(AcquireResult::Success);
            }

            // upgrade shared -> exclusive: only the locks queued ahead of
            // our own matter; anything queued behind us keeps waiting
            if let Some(&blocker_id) = chain[..held_pos]
                .iter()
                .rev()
                .find(|id| tables.locks[id].tid != tid)
            {
                tables.add_lock(table_id, pagenum, slot, mode, false, tid);
                let blocker_tid = tables.locks[&blocker_id].tid;
                let trx = tables.trxs.get_mut(&tid).unwrap();
                trx.status = TrxStatus::Waiting;
                trx.waiting_for = Some(blocker_id);
                debug!(
                    "trx {} upgrade on ({}, {}, {}) blocked behind trx {}",
                    tid, table_id, pagenum, slot, blocker_tid
                );
                return Ok(AcquireResult::Conflict);
            }

            // everything ahead of our lock is ours, upgrade in place
            tables.locks.get_mut(&held_id).unwrap().mode = LockMode::Exclusive;
            return Ok(AcquireResult::Success);
        }

        // case: the record is held by other transactions only
        let tail_id = *chain.last().unwrap();
        let (tail_mode, tail_acquired, tail_tid) = {
            let tail = &tables.locks[&tail_id];
            (tail.mode, tail.acquired, tail.tid)
        };

        if mode == LockMode::Shared && tail_mode == LockMode::Shared && tail_acquired {
            // shared stacking behind an acquired shared tail
            tables.add_lock(table_id, pagenum, slot, mode, true, tid);
            return Ok(AcquireResult::Success);
        }

        // the request must wait; pick the lock to wait behind and run the
        // deadlock walk from its transaction before enqueuing
        let blocker_id = if mode == LockMode::Shared && tail_mode == LockMode::Shared {
            // the shared tail is itself still waiting, wait on its blocker
            match tables.trxs[&tail_tid].waiting_for {
                Some(blocker_id) => blocker_id,
                None => tail_id,
            }
        } else {
            tail_id
        };
        let blocker_tid = tables.locks[&blocker_id].tid;

        if tables.wait_chain_reaches(blocker_tid, tid) {
            return Ok(AcquireResult::Deadlock);
        }

        tables.add_lock(table_id, pagenum, slot, mode, false, tid);
        let trx = tables.trxs.get_mut(&tid).unwrap();
        trx.status = TrxStatus::Waiting;
        trx.waiting_for = Some(blocker_id);
        debug!(
            "trx {} blocked on ({}, {}, {}) behind trx {}",
            tid, table_id, pagenum, slot, blocker_tid
        );
        Ok(AcquireResult::Conflict)
    }

    /// Park until the pending lock of `tid` is granted. Must only be
    /// called after `acquire_lock` returned `Conflict`.
    pub fn wait_until_granted(&self, tid: TrxId) {
        let mut tables = self.inner.lock().unwrap();
        loop {
            match tables.trxs.get(&tid) {
                Some(trx) if trx.status == TrxStatus::Waiting => {
                    let cond = trx.cond.clone();
                    tables = cond.wait(tables).unwrap();
                }
                _ => return,
            }
        }
    }

    /// Record the pre-image of a record about to be overwritten by `tid`.
    pub fn push_undo(&self, tid: TrxId, record: UndoRecord) -> SmallResult {
        let mut tables = self.inner.lock().unwrap();
        match tables.trxs.get_mut(&tid) {
            Some(trx) => {
                trx.undo.push(record);
                Ok(())
            }
            None => Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("transaction {} is not active", tid),
            )),
        }
    }

    /// Abort: restore every undone value through the buffer pool (newest
    /// first), then release locks and retire the transaction.
    pub fn abort_trx(&self, tid: TrxId) -> SmallResult {
        let undo = {
            let mut tables = self.inner.lock().unwrap();
            let trx = tables.trxs.get_mut(&tid).ok_or_else(|| {
                SmallError::new(
                    ErrorKind::InvalidState,
                    &format!("transaction {} is not active", tid),
                )
            })?;
            std::mem::replace(&mut trx.undo, Vec::new())
        };

        for record in undo.iter().rev() {
            let page = Database::mut_buffer_pool().get_page(record.table_id, record.pagenum)?;
            page.wl().set_record_value(record.slot, &record.old_value);
        }

        debug!("trx {} rolled back {} updates", tid, undo.len());
        self.release_trx(tid)
    }

    /// Drop every lock of `tid` from the hash table and per-record chains,
    /// waking any waiter that becomes grantable, and remove the
    /// transaction from the table.
    fn release_trx(&self, tid: TrxId) -> SmallResult {
        let mut tables = self.inner.lock().unwrap();
        let trx = tables.trxs.remove(&tid).ok_or_else(|| {
            SmallError::new(
                ErrorKind::InvalidState,
                &format!("transaction {} is not active", tid),
            )
        })?;

        for lock_id in trx.locks {
            if let Some(lock) = tables.locks.remove(&lock_id) {
                let bucket = LockTables::bucket_of(lock.pagenum);
                tables.buckets[bucket].retain(|&id| id != lock_id);
                tables.regrant(lock.table_id, lock.pagenum, lock.slot);
            }
        }

        debug!("trx {} released its locks", tid);
        Ok(())
    }
}
