use std::fs::{remove_file, File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};

use log::{debug, error};

use crate::error::{ErrorKind, SmallError};
use crate::storage::page::{Page, PAGE_SIZE};
use crate::types::{PageNum, SmallResult, TableId};

/// Largest valid table id. Ids run from 1 to `MAX_TABLE_ID`; 0 is the
/// invalid id.
pub const MAX_TABLE_ID: usize = 10;

/// Byte offset of `total_pages` inside the header page, for the unbuffered
/// update path of `extend_file`.
const TOTAL_PAGES_OFFSET: u64 = 16;

struct TableSlot {
    file: File,
    path: String,
}

/// Binds table ids to open files and performs whole-page synchronous I/O.
///
/// Every write is followed by fsync: the engine has no other durability
/// mechanism, so a completed operation must be on disk before the next one
/// starts.
pub struct FileManager {
    // slot 0 is never used, table ids index directly
    slots: Vec<Option<TableSlot>>,
}

impl FileManager {
    pub fn new() -> Self {
        Self {
            slots: (0..=MAX_TABLE_ID).map(|_| None).collect(),
        }
    }

    /// Open or create the file at `pathname` and bind it to a table id.
    ///
    /// Reopening a path that is already registered returns the existing id.
    /// Otherwise the lowest free slot is taken; on first creation the file
    /// gets an initialized header page, written through to disk.
    pub fn open_file(&mut self, pathname: &str) -> Result<TableId, SmallError> {
        let mut empty_id = 0;
        for table_id in (1..=MAX_TABLE_ID).rev() {
            match &self.slots[table_id] {
                Some(slot) => {
                    if slot.path == pathname {
                        return Ok(table_id as TableId);
                    }
                }
                None => empty_id = table_id,
            }
        }

        if empty_id == 0 {
            return Err(SmallError::new(
                ErrorKind::OutOfSlots,
                &format!("no free table slot for {}", pathname),
            ));
        }

        let file = match OpenOptions::new().read(true).write(true).open(pathname) {
            Ok(file) => file,
            Err(_) => {
                // Create the file with an initialized header page.
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .mode(0o777)
                    .open(pathname)?;

                let mut header = Page::new();
                header.init_header();
                file.write_all_at(header.bytes(), 0)?;
                file.sync_all()?;
                debug!("created table file {}", pathname);
                file
            }
        };

        self.slots[empty_id] = Some(TableSlot {
            file,
            path: pathname.to_string(),
        });

        debug!("opened table {} as id {}", pathname, empty_id);
        Ok(empty_id as TableId)
    }

    fn slot(&self, table_id: TableId) -> Result<&TableSlot, SmallError> {
        self.slots
            .get(table_id as usize)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| {
                SmallError::new(
                    ErrorKind::InvalidState,
                    &format!("table id {} is not open", table_id),
                )
            })
    }

    pub fn is_open(&self, table_id: TableId) -> bool {
        table_id > 0
            && (table_id as usize) <= MAX_TABLE_ID
            && self.slots[table_id as usize].is_some()
    }

    /// Grow the file by exactly one page and return the byte offset of the
    /// start of the new page.
    ///
    /// The page count in the header must follow the growth: when the
    /// header page is buffered, the caller passes its in-memory copy and
    /// only that copy is updated; otherwise the 8-byte count is written
    /// straight to the header on disk.
    pub fn extend_file(
        &self,
        table_id: TableId,
        header: Option<&mut Page>,
    ) -> Result<u64, SmallError> {
        let slot = self.slot(table_id)?;

        let old_len = slot.file.metadata()?.len();
        slot.file
            .write_all_at(&[0u8], old_len + PAGE_SIZE as u64 - 1)?;
        slot.file.sync_all()?;

        let total_pages = old_len / PAGE_SIZE as u64 + 1;
        match header {
            Some(header) => header.set_total_pages(total_pages),
            None => {
                slot.file
                    .write_all_at(&total_pages.to_le_bytes(), TOTAL_PAGES_OFFSET)?;
                slot.file.sync_all()?;
            }
        }

        debug!(
            "extended table {} to {} pages (new page at {:#x})",
            table_id, total_pages, old_len
        );
        Ok(old_len)
    }

    pub fn read_page(
        &self,
        table_id: TableId,
        pagenum: PageNum,
        dest: &mut Page,
    ) -> SmallResult {
        let slot = self.slot(table_id)?;
        slot.file
            .read_exact_at(dest.bytes_mut(), pagenum * PAGE_SIZE as u64)
            .map_err(|e| {
                error!("read of page {} in table {} failed: {}", pagenum, table_id, e);
                SmallError::from(e)
            })
    }

    pub fn write_page(&self, table_id: TableId, pagenum: PageNum, src: &Page) -> SmallResult {
        let slot = self.slot(table_id)?;
        slot.file
            .write_all_at(src.bytes(), pagenum * PAGE_SIZE as u64)
            .and_then(|_| slot.file.sync_all())
            .map_err(|e| {
                error!(
                    "write of page {} in table {} failed: {}",
                    pagenum, table_id, e
                );
                SmallError::from(e)
            })
    }

    /// Close the file and release the slot for reuse.
    pub fn close_file(&mut self, table_id: TableId) -> SmallResult {
        if !self.is_open(table_id) {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("table id {} is not open", table_id),
            ));
        }
        self.slots[table_id as usize] = None;
        Ok(())
    }

    /// Remove a table file from disk. Test helper; the engine itself never
    /// deletes files.
    pub fn destroy_file(pathname: &str) {
        let _ = remove_file(pathname);
    }
}
