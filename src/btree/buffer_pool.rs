use std::{
    cell::Cell,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::{debug, info};

use crate::{
    error::{ErrorKind, SmallError},
    storage::page::{Page, PAGE_SIZE},
    types::{PageNum, Pod, SmallResult, TableId},
    utils::HandyRwLock,
    Database,
};

/// One slot of the buffer pool, caching one page of one table.
///
/// `table_id == 0` marks the frame invalid. A positive pin count keeps the
/// frame out of eviction; the reference bit gives it a second chance on
/// the clock sweep.
struct Frame {
    table_id: TableId,
    pagenum: PageNum,
    page: Pod<Page>,
    dirty: bool,
    pin_count: u32,
    ref_bit: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            table_id: 0,
            pagenum: 0,
            page: Arc::new(RwLock::new(Page::new())),
            dirty: false,
            pin_count: 0,
            ref_bit: false,
        }
    }
}

/// A pinned page handed out by `BufferPool::get_page`.
///
/// The pin is dropped when this guard is dropped; writing through `wl()`
/// marks the frame dirty. Never hold the pool latch while a guard drops,
/// the drop has to reacquire it.
#[derive(Debug)]
pub struct PinnedPage {
    frame_index: usize,
    pagenum: PageNum,
    page: Pod<Page>,
    dirty: Cell<bool>,
}

impl PinnedPage {
    pub fn pagenum(&self) -> PageNum {
        self.pagenum
    }

    pub fn rl(&self) -> RwLockReadGuard<'_, Page> {
        self.page.rl()
    }

    /// Write access to the page content. Marks the frame dirty.
    pub fn wl(&self) -> RwLockWriteGuard<'_, Page> {
        self.dirty.set(true);
        self.page.wl()
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        Database::mut_buffer_pool().unpin(self.frame_index, self.dirty.get());
    }
}

/// A fixed array of frames with second-chance (clock) replacement.
///
/// The pool itself is protected by the pool-wide latch of the `Database`
/// handle (`Database::mut_buffer_pool()`); the content of each frame is
/// protected by its own `RwLock`. Lookup is a linear scan, which is fine
/// for the tens to low hundreds of frames this engine is configured with.
pub struct BufferPool {
    frames: Vec<Frame>,
    clock_hand: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            clock_hand: 0,
        }
    }

    /// Allocate `buf_num` empty frames. Fails on a nonsensical size or if
    /// the pool is already initialized.
    pub fn init(&mut self, buf_num: usize) -> SmallResult {
        if buf_num < 1 {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("invalid buffer pool size {}", buf_num),
            ));
        }
        if !self.frames.is_empty() {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                "buffer pool is already initialized",
            ));
        }

        self.frames = (0..buf_num).map(|_| Frame::new()).collect();
        self.clock_hand = 0;
        info!("buffer pool initialized with {} frames", buf_num);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Fetch a page, pinning its frame. Cache hit, empty slot and clock
    /// eviction, in that order.
    pub fn get_page(&mut self, table_id: TableId, pagenum: PageNum) -> Result<PinnedPage, SmallError> {
        let frame_index = self.fetch(table_id, pagenum)?;
        Ok(PinnedPage {
            frame_index,
            pagenum,
            page: self.frames[frame_index].page.clone(),
            dirty: Cell::new(false),
        })
    }

    fn fetch(&mut self, table_id: TableId, pagenum: PageNum) -> Result<usize, SmallError> {
        if self.frames.is_empty() {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                "buffer pool is not initialized",
            ));
        }

        // case 1: cache hit. Pins stack re-entrantly; content races are
        // kept out by the per-frame lock.
        for (i, frame) in self.frames.iter_mut().enumerate() {
            if frame.table_id == table_id && frame.pagenum == pagenum {
                frame.pin_count += 1;
                frame.ref_bit = true;
                return Ok(i);
            }
        }

        // case 2: the pool still has an invalid slot
        if let Some(i) = self.frames.iter().position(|f| f.table_id == 0) {
            self.load(i, table_id, pagenum)?;
            return Ok(i);
        }

        // case 3: run the clock. Every unpinned frame is visited at most
        // twice (once to lose its reference bit, once as victim), so a
        // sweep longer than two revolutions means every frame is pinned.
        let mut steps = 0;
        loop {
            if steps >= 2 * self.frames.len() {
                return Err(SmallError::new(
                    ErrorKind::OutOfSlots,
                    "all buffer frames are pinned",
                ));
            }
            steps += 1;

            let i = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % self.frames.len();

            let frame = &mut self.frames[i];
            if frame.pin_count > 0 {
                continue;
            }
            if frame.ref_bit {
                frame.ref_bit = false;
                continue;
            }

            // found the victim
            debug!(
                "evicting page {} of table {} from frame {}",
                frame.pagenum, frame.table_id, i
            );
            if frame.dirty {
                let page = frame.page.clone();
                Database::mut_file_manager().write_page(
                    frame.table_id,
                    frame.pagenum,
                    &page.rl(),
                )?;
            }
            self.load(i, table_id, pagenum)?;
            return Ok(i);
        }
    }

    /// Read the requested page into frame `i` and reset its bookkeeping.
    fn load(&mut self, i: usize, table_id: TableId, pagenum: PageNum) -> SmallResult {
        {
            let page = self.frames[i].page.clone();
            let mut page = page.wl();
            Database::mut_file_manager().read_page(table_id, pagenum, &mut page)?;
        }

        let frame = &mut self.frames[i];
        frame.table_id = table_id;
        frame.pagenum = pagenum;
        frame.dirty = false;
        frame.pin_count = 1;
        frame.ref_bit = true;
        Ok(())
    }

    /// Drop one pin from a frame, folding in the caller's dirty flag.
    pub(crate) fn unpin(&mut self, frame_index: usize, dirty: bool) {
        if let Some(frame) = self.frames.get_mut(frame_index) {
            frame.dirty |= dirty;
            debug_assert!(frame.pin_count > 0);
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }

    /// Allocate a page for the table, reusing the head of the free list
    /// when it is nonempty and extending the file otherwise. The header
    /// page is updated through its buffered copy.
    pub fn alloc_page(&mut self, table_id: TableId) -> Result<PageNum, SmallError> {
        let header_index = self.fetch(table_id, 0)?;
        let header_pod = self.frames[header_index].page.clone();

        let free_head = header_pod.rl().free_page_head();

        let result;
        if free_head == 0 {
            // no free page, extend the file by one
            let extend_result = {
                let mut header = header_pod.wl();
                Database::mut_file_manager().extend_file(table_id, Some(&mut header))
            };
            match extend_result {
                Ok(offset) => result = offset / PAGE_SIZE as u64,
                Err(e) => {
                    self.unpin(header_index, false);
                    return Err(e);
                }
            }
        } else {
            // pop the head of the free list
            let free_index = match self.fetch(table_id, free_head) {
                Ok(i) => i,
                Err(e) => {
                    self.unpin(header_index, false);
                    return Err(e);
                }
            };
            let next_free = self.frames[free_index].page.rl().next_free();
            header_pod.wl().set_free_page_head(next_free);
            self.unpin(free_index, false);
            result = free_head;
        }

        self.unpin(header_index, true);
        debug!("allocated page {} in table {}", result, table_id);
        Ok(result)
    }

    /// Return a page to the head of the table's free list.
    pub fn free_page(&mut self, table_id: TableId, pagenum: PageNum) -> SmallResult {
        let header_index = self.fetch(table_id, 0)?;
        let freeing_index = match self.fetch(table_id, pagenum) {
            Ok(i) => i,
            Err(e) => {
                self.unpin(header_index, false);
                return Err(e);
            }
        };

        let header_pod = self.frames[header_index].page.clone();
        let freeing_pod = self.frames[freeing_index].page.clone();

        let old_head = header_pod.rl().free_page_head();
        freeing_pod.wl().set_next_free(old_head);
        header_pod.wl().set_free_page_head(pagenum);

        self.unpin(header_index, true);
        self.unpin(freeing_index, true);
        debug!("freed page {} in table {}", pagenum, table_id);
        Ok(())
    }

    /// Write back every dirty frame of the table, invalidate the frames,
    /// and close the backing file.
    ///
    /// Pins never outlive a top-level operation and operations serialize
    /// behind the pool latch, so frames of the table are unpinned here; a
    /// remaining pin is a bug in the caller, not something to wait out.
    pub fn close_table(&mut self, table_id: TableId) -> SmallResult {
        if !Database::mut_file_manager().is_open(table_id) {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("table id {} is not open", table_id),
            ));
        }

        for frame in self.frames.iter_mut() {
            if frame.table_id != table_id {
                continue;
            }
            if frame.pin_count > 0 {
                return Err(SmallError::new(
                    ErrorKind::InvalidState,
                    &format!("page {} of table {} is still pinned", frame.pagenum, table_id),
                ));
            }
            if frame.dirty {
                let page = frame.page.clone();
                Database::mut_file_manager().write_page(table_id, frame.pagenum, &page.rl())?;
            }
            frame.table_id = 0;
            frame.dirty = false;
            frame.ref_bit = false;
        }

        Database::mut_file_manager().close_file(table_id)?;
        info!("closed table {}", table_id);
        Ok(())
    }

    /// Flush every valid frame and drop the frame array. The pool can be
    /// initialized again afterwards.
    pub fn shutdown(&mut self) -> SmallResult {
        for frame in self.frames.iter() {
            if frame.table_id == 0 {
                continue;
            }
            if frame.pin_count > 0 {
                return Err(SmallError::new(
                    ErrorKind::InvalidState,
                    &format!(
                        "page {} of table {} is still pinned",
                        frame.pagenum, frame.table_id
                    ),
                ));
            }
            if frame.dirty {
                let page = frame.page.clone();
                Database::mut_file_manager().write_page(frame.table_id, frame.pagenum, &page.rl())?;
            }
        }

        self.frames.clear();
        self.clock_hand = 0;
        info!("buffer pool shut down");
        Ok(())
    }
}
