use std::fs::File;
use std::io::{BufWriter, Write};

use log::debug;

use crate::{
    error::SmallError,
    storage::page::unpack_value,
    types::{PageNum, SmallResult, TableId},
    Database,
};

use super::tree::BTreeTable;

/// A cursor over the leaf chain of one table.
struct LeafCursor {
    table_id: TableId,
    pagenum: PageNum,
    slot: usize,
}

impl LeafCursor {
    /// Position the cursor on the first record of the tree, if any.
    fn open(table: &BTreeTable) -> Result<Option<LeafCursor>, SmallError> {
        let leaf = table.find_leaf(i64::MIN)?;
        if leaf == 0 {
            return Ok(None);
        }
        let mut cursor = LeafCursor {
            table_id: table.table_id(),
            pagenum: leaf,
            slot: 0,
        };
        if cursor.skip_empty()? {
            Ok(Some(cursor))
        } else {
            Ok(None)
        }
    }

    /// Hop right until the slot points at a real record. False when the
    /// chain is exhausted.
    fn skip_empty(&mut self) -> Result<bool, SmallError> {
        loop {
            let page = Database::mut_buffer_pool().get_page(self.table_id, self.pagenum)?;
            let (num_keys, right_sibling) = {
                let node = page.rl();
                (node.num_keys(), node.right_sibling())
            };
            if self.slot < num_keys {
                return Ok(true);
            }
            if right_sibling == 0 {
                return Ok(false);
            }
            self.pagenum = right_sibling;
            self.slot = 0;
        }
    }

    fn current(&self) -> Result<(i64, String), SmallError> {
        let page = Database::mut_buffer_pool().get_page(self.table_id, self.pagenum)?;
        let node = page.rl();
        Ok((
            node.record_key(self.slot),
            unpack_value(&node.record_value(self.slot)),
        ))
    }

    fn advance(&mut self) -> Result<bool, SmallError> {
        self.slot += 1;
        self.skip_empty()
    }
}

/// Equality join of two tables over their keys.
///
/// Both leaf chains are walked once in key order, advancing whichever
/// cursor holds the smaller key; matches are written to `pathname` as
/// `"k,v,k,v"` lines. Keys are unique per table, so each match is emitted
/// exactly once.
pub fn join_table(table_id_1: TableId, table_id_2: TableId, pathname: &str) -> SmallResult {
    let out = File::create(pathname)?;
    let mut writer = BufWriter::new(out);

    let table_1 = BTreeTable::new(table_id_1);
    let table_2 = BTreeTable::new(table_id_2);

    let cursor_1 = LeafCursor::open(&table_1)?;
    let cursor_2 = LeafCursor::open(&table_2)?;

    let (mut cursor_1, mut cursor_2) = match (cursor_1, cursor_2) {
        (Some(c1), Some(c2)) => (c1, c2),
        // one side is empty, so is the join
        _ => return writer.flush().map_err(SmallError::from),
    };

    let mut matches = 0u64;
    loop {
        let (key_1, value_1) = cursor_1.current()?;
        let (key_2, value_2) = cursor_2.current()?;

        if key_1 < key_2 {
            if !cursor_1.advance()? {
                break;
            }
        } else if key_2 < key_1 {
            if !cursor_2.advance()? {
                break;
            }
        } else {
            writeln!(writer, "{},{},{},{}", key_1, value_1, key_2, value_2)?;
            matches += 1;
            if !cursor_2.advance()? {
                break;
            }
        }
    }

    writer.flush()?;
    debug!(
        "join of tables {} and {} wrote {} matches to {}",
        table_id_1, table_id_2, matches, pathname
    );
    Ok(())
}
