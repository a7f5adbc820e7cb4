use std::sync::{Arc, Once, RwLock, RwLockWriteGuard};

use crate::{
    btree::buffer_pool::BufferPool, storage::file::FileManager,
    transaction::lock_manager::LockManager, types::Pod, utils::HandyRwLock,
};

/// We collect all global state of the engine here: the file manager, the
/// buffer pool and the lock manager.
///
/// These cannot be plain static variables because their constructors are
/// not const; the singleton is boxed on first use instead. `init_db`
/// populates the buffer pool of this handle, every API call reaches the
/// subsystems through the accessors below.
pub struct Database {
    file_manager: Pod<FileManager>,
    buffer_pool: Pod<BufferPool>,
    lock_manager: LockManager,
}

static mut SINGLETON: *mut Database = 0 as *mut Database;
static INIT: Once = Once::new();

impl Database {
    fn new() -> Self {
        Self {
            file_manager: Arc::new(RwLock::new(FileManager::new())),
            buffer_pool: Arc::new(RwLock::new(BufferPool::new())),
            lock_manager: LockManager::new(),
        }
    }

    pub fn global() -> &'static Database {
        INIT.call_once(|| unsafe {
            // Put it in the heap so it can outlive this call.
            SINGLETON = Box::into_raw(Box::new(Database::new()));
        });

        unsafe { SINGLETON.as_ref().unwrap() }
    }

    /// Replace the engine with a fresh instance, dropping all cached
    /// state. Used by tests; callers must make sure no other thread is
    /// inside the engine.
    pub fn reset() {
        Self::global();
        unsafe {
            let old = SINGLETON;
            SINGLETON = Box::into_raw(Box::new(Database::new()));
            drop(Box::from_raw(old));
        }
    }

    pub fn mut_file_manager() -> RwLockWriteGuard<'static, FileManager> {
        Self::global().file_manager.wl()
    }

    pub fn mut_buffer_pool() -> RwLockWriteGuard<'static, BufferPool> {
        Self::global().buffer_pool.wl()
    }

    pub fn lock_manager() -> &'static LockManager {
        &Self::global().lock_manager
    }
}
