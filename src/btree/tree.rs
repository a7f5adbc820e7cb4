use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    storage::page::{pack_value, unpack_value, Record, ORDER_INT, ORDER_LEAF},
    transaction::lock_manager::{AcquireResult, LockMode, UndoRecord},
    types::{PageNum, SmallResult, TableId, TrxId},
    utils::ceil_div,
    Database,
};

use super::buffer_pool::PinnedPage;

/// B+ tree operations over one open table.
///
/// The struct is only a table id; every page access goes through the
/// buffer pool of the global database handle. Pages refer to each other by
/// page number, so there is no in-memory tree structure to keep alive.
pub struct BTreeTable {
    table_id: TableId,
}

impl BTreeTable {
    pub fn new(table_id: TableId) -> Self {
        Self { table_id }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    fn get_page(&self, pagenum: PageNum) -> Result<PinnedPage, SmallError> {
        Database::mut_buffer_pool().get_page(self.table_id, pagenum)
    }

    fn alloc_page(&self) -> Result<PageNum, SmallError> {
        Database::mut_buffer_pool().alloc_page(self.table_id)
    }

    fn free_page(&self, pagenum: PageNum) -> SmallResult {
        Database::mut_buffer_pool().free_page(self.table_id, pagenum)
    }

    /// Current root page number; 0 means the tree is empty.
    pub fn root(&self) -> Result<PageNum, SmallError> {
        let header = self.get_page(0)?;
        let root = header.rl().root_page();
        Ok(root)
    }

    fn set_root(&self, pagenum: PageNum) -> SmallResult {
        let header = self.get_page(0)?;
        header.wl().set_root_page(pagenum);
        Ok(())
    }
}

// search
impl BTreeTable {
    /// Trace the path from the root to the leaf that should contain `key`.
    /// Returns 0 when the tree is empty.
    pub fn find_leaf(&self, key: i64) -> Result<PageNum, SmallError> {
        let mut current = self.root()?;
        if current == 0 {
            return Ok(current);
        }

        loop {
            let page = self.get_page(current)?;
            let next = {
                let node = page.rl();
                if node.is_leaf() {
                    return Ok(current);
                }
                // child index = count of keys <= key
                let mut i = 0;
                while i < node.num_keys() && key >= node.entry_key(i) {
                    i += 1;
                }
                node.child(i)
            };
            current = next;
        }
    }

    /// Slot of `key` within its leaf, or `KeyNotFound`.
    fn locate(&self, key: i64) -> Result<(PageNum, usize), SmallError> {
        let leaf = self.find_leaf(key)?;
        if leaf == 0 {
            return Err(SmallError::new(
                ErrorKind::KeyNotFound,
                &format!("key {} not found in table {}", key, self.table_id),
            ));
        }

        let page = self.get_page(leaf)?;
        let node = page.rl();
        for slot in 0..node.num_keys() {
            if node.record_key(slot) == key {
                return Ok((leaf, slot));
            }
        }
        Err(SmallError::new(
            ErrorKind::KeyNotFound,
            &format!("key {} not found in table {}", key, self.table_id),
        ))
    }

    /// Point lookup, no locking.
    pub fn find(&self, key: i64) -> Result<String, SmallError> {
        let (leaf, slot) = self.locate(key)?;
        let page = self.get_page(leaf)?;
        let value = unpack_value(&page.rl().record_value(slot));
        Ok(value)
    }
}

// insertion
impl BTreeTable {
    /// Insert a record, keeping the leaf sorted and splitting pages on the
    /// way up as needed. Duplicate keys are rejected and leave the tree
    /// unmodified.
    pub fn insert(&self, key: i64, value: &[u8]) -> SmallResult {
        match self.find(key) {
            Ok(_) => {
                return Err(SmallError::new(
                    ErrorKind::KeyDuplicate,
                    &format!("key {} already exists in table {}", key, self.table_id),
                ));
            }
            Err(e) if e.kind() != ErrorKind::KeyNotFound => return Err(e),
            Err(_) => {}
        }

        let root = self.root()?;
        if root == 0 {
            return self.start_new_tree(key, value);
        }

        let leaf = self.find_leaf(key)?;
        let num_keys = {
            let page = self.get_page(leaf)?;
            let n = page.rl().num_keys();
            n
        };

        if num_keys < ORDER_LEAF - 1 {
            self.insert_into_leaf(leaf, key, value)
        } else {
            self.insert_into_leaf_after_split(leaf, key, value)
        }
    }

    /// First insertion: a single leaf becomes the root.
    fn start_new_tree(&self, key: i64, value: &[u8]) -> SmallResult {
        let root = self.alloc_page()?;
        {
            let page = self.get_page(root)?;
            let mut leaf = page.wl();
            leaf.init_leaf(0);
            leaf.set_record(
                0,
                &Record {
                    key,
                    value: pack_value(value),
                },
            );
            leaf.set_num_keys(1);
        }
        debug!("table {}: new tree rooted at page {}", self.table_id, root);
        self.set_root(root)
    }

    fn insert_into_leaf(&self, leaf: PageNum, key: i64, value: &[u8]) -> SmallResult {
        let page = self.get_page(leaf)?;
        let mut node = page.wl();

        let n = node.num_keys();
        let mut insertion_point = 0;
        while insertion_point < n && node.record_key(insertion_point) < key {
            insertion_point += 1;
        }

        let mut i = n;
        while i > insertion_point {
            let record = node.record(i - 1);
            node.set_record(i, &record);
            i -= 1;
        }
        node.set_record(
            insertion_point,
            &Record {
                key,
                value: pack_value(value),
            },
        );
        node.set_num_keys(n + 1);
        Ok(())
    }

    /// Insert into a full leaf: stage all 32 records in order, keep the
    /// first 16 in the old leaf, move the rest into a fresh right sibling,
    /// then push the new sibling's first key to the parent.
    fn insert_into_leaf_after_split(&self, leaf: PageNum, key: i64, value: &[u8]) -> SmallResult {
        let new_leaf = self.alloc_page()?;

        let old_pod = self.get_page(leaf)?;
        let (mut temp, old_right, parent) = {
            let node = old_pod.rl();
            let n = node.num_keys();
            let mut temp: Vec<Record> = Vec::with_capacity(ORDER_LEAF);
            for i in 0..n {
                temp.push(node.record(i));
            }
            (temp, node.right_sibling(), node.parent())
        };

        let mut insertion_index = 0;
        while insertion_index < temp.len() && temp[insertion_index].key < key {
            insertion_index += 1;
        }
        temp.insert(
            insertion_index,
            Record {
                key,
                value: pack_value(value),
            },
        );

        let split = ceil_div(ORDER_LEAF - 1, 2);
        {
            let mut node = old_pod.wl();
            for i in 0..split {
                node.set_record(i, &temp[i]);
            }
            node.set_num_keys(split);
            node.set_right_sibling(new_leaf);
        }
        drop(old_pod);

        let new_key = temp[split].key;
        {
            let new_pod = self.get_page(new_leaf)?;
            let mut node = new_pod.wl();
            node.init_leaf(parent);
            for (slot, record) in temp[split..].iter().enumerate() {
                node.set_record(slot, record);
            }
            node.set_num_keys(temp.len() - split);
            node.set_right_sibling(old_right);
        }

        debug!(
            "table {}: split leaf {} into {} at key {}",
            self.table_id, leaf, new_leaf, new_key
        );
        self.insert_into_parent(leaf, new_key, new_leaf)
    }

    /// Hook a freshly split pair into the tree: grow a new root, insert
    /// into a parent with room, or split the parent and recurse.
    fn insert_into_parent(&self, left: PageNum, key: i64, right: PageNum) -> SmallResult {
        let parent = {
            let page = self.get_page(left)?;
            let p = page.rl().parent();
            p
        };

        if parent == 0 {
            return self.insert_into_new_root(left, key, right);
        }

        let left_index = self.get_left_index(parent, left)?;
        let num_keys = {
            let page = self.get_page(parent)?;
            let n = page.rl().num_keys();
            n
        };

        if num_keys < ORDER_INT - 1 {
            self.insert_into_node(parent, left_index, key, right)
        } else {
            self.insert_into_node_after_split(parent, left_index, key, right)
        }
    }

    fn insert_into_new_root(&self, left: PageNum, key: i64, right: PageNum) -> SmallResult {
        let root = self.alloc_page()?;
        {
            let page = self.get_page(root)?;
            let mut node = page.wl();
            node.init_internal(0);
            node.set_leftmost_child(left);
            node.set_entry_key(0, key);
            node.set_entry_child(0, right);
            node.set_num_keys(1);
        }

        for child in &[left, right] {
            let page = self.get_page(*child)?;
            page.wl().set_parent(root);
        }

        debug!("table {}: new root {} over {} | {}", self.table_id, root, left, right);
        self.set_root(root)
    }

    /// Index of the parent's child pointer to `left`.
    fn get_left_index(&self, parent: PageNum, left: PageNum) -> Result<usize, SmallError> {
        let page = self.get_page(parent)?;
        let node = page.rl();
        for i in 0..=node.num_keys() {
            if node.child(i) == left {
                return Ok(i);
            }
        }
        Err(SmallError::new(
            ErrorKind::InvalidState,
            &format!("page {} is not a child of page {}", left, parent),
        ))
    }

    /// Insert a key and right child into an internal node with room.
    fn insert_into_node(
        &self,
        node: PageNum,
        left_index: usize,
        key: i64,
        right: PageNum,
    ) -> SmallResult {
        let page = self.get_page(node)?;
        let mut internal = page.wl();

        let n = internal.num_keys();
        let mut i = n;
        while i > left_index {
            let child = internal.child(i);
            internal.set_child(i + 1, child);
            let k = internal.entry_key(i - 1);
            internal.set_entry_key(i, k);
            i -= 1;
        }
        internal.set_entry_child(left_index, right);
        internal.set_entry_key(left_index, key);
        internal.set_num_keys(n + 1);
        Ok(())
    }

    /// Split a full internal node. All 249 keys and 250 children are
    /// staged in logical order, the middle key (index 124) moves up, the
    /// old node keeps 124 keys and the new node takes the remaining 124.
    fn insert_into_node_after_split(
        &self,
        old_node: PageNum,
        left_index: usize,
        key: i64,
        right: PageNum,
    ) -> SmallResult {
        let new_node = self.alloc_page()?;

        let old_pod = self.get_page(old_node)?;
        let (mut temp_keys, mut temp_children, parent) = {
            let node = old_pod.rl();
            let n = node.num_keys();
            let mut keys = Vec::with_capacity(ORDER_INT);
            let mut children = Vec::with_capacity(ORDER_INT + 1);
            for i in 0..n {
                keys.push(node.entry_key(i));
            }
            for i in 0..=n {
                children.push(node.child(i));
            }
            (keys, children, node.parent())
        };

        temp_keys.insert(left_index, key);
        temp_children.insert(left_index + 1, right);

        let split = ceil_div(ORDER_INT, 2);
        let k_prime = temp_keys[split - 1];

        {
            let mut node = old_pod.wl();
            node.set_child(0, temp_children[0]);
            for i in 0..split - 1 {
                node.set_entry_key(i, temp_keys[i]);
                node.set_entry_child(i, temp_children[i + 1]);
            }
            node.set_num_keys(split - 1);
        }
        drop(old_pod);

        {
            let new_pod = self.get_page(new_node)?;
            let mut node = new_pod.wl();
            node.init_internal(parent);
            node.set_child(0, temp_children[split]);
            let mut slot = 0;
            for i in split..temp_keys.len() {
                node.set_entry_key(slot, temp_keys[i]);
                node.set_entry_child(slot, temp_children[i + 1]);
                slot += 1;
            }
            node.set_num_keys(slot);
        }

        // the moved children now live under the new node
        for child in &temp_children[split..] {
            let page = self.get_page(*child)?;
            page.wl().set_parent(new_node);
        }

        debug!(
            "table {}: split internal {} into {} pushing key {}",
            self.table_id, old_node, new_node, k_prime
        );
        self.insert_into_parent(old_node, k_prime, new_node)
    }
}

// deletion
impl BTreeTable {
    /// Delete a record. The leaf is merged with a neighbor only when it
    /// becomes completely empty (delayed merge); until then no occupancy
    /// maintenance happens.
    pub fn delete(&self, key: i64) -> SmallResult {
        let root = self.root()?;
        let leaf = self.find_leaf(key)?;
        if leaf == 0 {
            return Err(SmallError::new(
                ErrorKind::KeyNotFound,
                &format!("key {} not found in table {}", key, self.table_id),
            ));
        }
        self.delete_record(root, leaf, key)
    }

    fn delete_record(&self, root: PageNum, leaf: PageNum, key: i64) -> SmallResult {
        let remaining = self.remove_record_from_leaf(leaf, key)?;

        if leaf == root {
            return self.adjust_root(root);
        }
        if remaining > 0 {
            return Ok(());
        }

        // the leaf is empty, merge it away
        let parent = {
            let page = self.get_page(leaf)?;
            let p = page.rl().parent();
            p
        };
        let neighbor_index = self.get_neighbor_index(parent, leaf)?;
        let k_prime_index = neighbor_index.unwrap_or(0);
        let (neighbor, k_prime) = {
            let page = self.get_page(parent)?;
            let node = page.rl();
            let neighbor = match neighbor_index {
                Some(i) => node.child(i),
                None => node.child(1),
            };
            (neighbor, node.entry_key(k_prime_index))
        };

        self.delayed_merge(root, leaf, parent, neighbor, neighbor_index, k_prime)
    }

    fn remove_record_from_leaf(&self, leaf: PageNum, key: i64) -> Result<usize, SmallError> {
        let page = self.get_page(leaf)?;
        let mut node = page.wl();

        let n = node.num_keys();
        let mut slot = 0;
        while slot < n && node.record_key(slot) != key {
            slot += 1;
        }
        if slot == n {
            return Err(SmallError::new(
                ErrorKind::KeyNotFound,
                &format!("key {} not found in table {}", key, self.table_id),
            ));
        }

        for i in slot + 1..n {
            let record = node.record(i);
            node.set_record(i - 1, &record);
        }
        node.set_num_keys(n - 1);
        Ok(n - 1)
    }

    fn remove_entry_from_internal(
        &self,
        node: PageNum,
        key: i64,
        pointer: PageNum,
    ) -> Result<usize, SmallError> {
        let page = self.get_page(node)?;
        let mut internal = page.wl();

        let n = internal.num_keys();

        let mut i = 0;
        while i < n && internal.entry_key(i) != key {
            i += 1;
        }
        if i == n {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("separator key {} missing from page {}", key, node),
            ));
        }
        for j in i + 1..n {
            let k = internal.entry_key(j);
            internal.set_entry_key(j - 1, k);
        }

        let mut i = 0;
        while i <= n && internal.child(i) != pointer {
            i += 1;
        }
        if i > n {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("child pointer {} missing from page {}", pointer, node),
            ));
        }
        for j in i + 1..=n {
            let child = internal.child(j);
            internal.set_child(j - 1, child);
        }

        internal.set_num_keys(n - 1);
        Ok(n - 1)
    }

    /// The left neighbor of `node` under `parent`: `Some(i)` when the
    /// neighbor is logical child `i`, `None` when `node` is the leftmost
    /// child and only a right neighbor exists.
    fn get_neighbor_index(
        &self,
        parent: PageNum,
        node: PageNum,
    ) -> Result<Option<usize>, SmallError> {
        let page = self.get_page(parent)?;
        let internal = page.rl();
        for i in 0..=internal.num_keys() {
            if internal.child(i) == node {
                return Ok(if i == 0 { None } else { Some(i - 1) });
            }
        }
        Err(SmallError::new(
            ErrorKind::InvalidState,
            &format!("page {} is not a child of page {}", node, parent),
        ))
    }

    /// Fold an empty node into a neighbor.
    ///
    /// Leaves splice the sibling chain; when the empty leaf is the
    /// leftmost child it instead absorbs the right neighbor's content so
    /// the leftmost page keeps its identity, and the neighbor is the page
    /// that gets freed. An empty internal node still owns one child, which
    /// moves to the neighbor together with the separator key.
    fn delayed_merge(
        &self,
        root: PageNum,
        node: PageNum,
        parent: PageNum,
        neighbor: PageNum,
        neighbor_index: Option<usize>,
        k_prime: i64,
    ) -> SmallResult {
        let node_pod = self.get_page(node)?;
        let (is_leaf, orphan) = {
            let guard = node_pod.rl();
            let orphan = if guard.is_leaf() {
                guard.right_sibling()
            } else {
                guard.leftmost_child()
            };
            (guard.is_leaf(), orphan)
        };

        let neighbor_pod = self.get_page(neighbor)?;
        let freed;

        if is_leaf {
            match neighbor_index {
                Some(_) => {
                    neighbor_pod.wl().set_right_sibling(orphan);
                    freed = node;
                }
                None => {
                    let neighbor_page = neighbor_pod.rl();
                    node_pod.wl().copy_from(&neighbor_page);
                    freed = neighbor;
                }
            }
        } else {
            {
                let mut neighbor_node = neighbor_pod.wl();
                let n = neighbor_node.num_keys();
                match neighbor_index {
                    Some(_) => {
                        neighbor_node.set_entry_key(n, k_prime);
                        neighbor_node.set_entry_child(n, orphan);
                    }
                    None => {
                        // prepend: demote the leftmost child into the
                        // shifted entry array
                        let mut i = n;
                        while i > 0 {
                            let k = neighbor_node.entry_key(i - 1);
                            let c = neighbor_node.entry_child(i - 1);
                            neighbor_node.set_entry_key(i, k);
                            neighbor_node.set_entry_child(i, c);
                            i -= 1;
                        }
                        let old_leftmost = neighbor_node.leftmost_child();
                        neighbor_node.set_entry_child(0, old_leftmost);
                        neighbor_node.set_entry_key(0, k_prime);
                        neighbor_node.set_leftmost_child(orphan);
                    }
                }
                neighbor_node.set_num_keys(n + 1);
            }

            let child_pod = self.get_page(orphan)?;
            child_pod.wl().set_parent(neighbor);
            freed = node;
        }

        drop(node_pod);
        drop(neighbor_pod);

        debug!(
            "table {}: merged page {} into {} (freed {})",
            self.table_id, node, neighbor, freed
        );
        self.free_page(freed)?;
        self.delete_internal_entry(root, parent, k_prime, freed)
    }

    fn delete_internal_entry(
        &self,
        root: PageNum,
        node: PageNum,
        key: i64,
        pointer: PageNum,
    ) -> SmallResult {
        let remaining = self.remove_entry_from_internal(node, key, pointer)?;

        if node == root {
            return self.adjust_root(root);
        }
        if remaining > 0 {
            return Ok(());
        }

        let parent = {
            let page = self.get_page(node)?;
            let p = page.rl().parent();
            p
        };
        let neighbor_index = self.get_neighbor_index(parent, node)?;
        let k_prime_index = neighbor_index.unwrap_or(0);
        let (neighbor, k_prime) = {
            let page = self.get_page(parent)?;
            let internal = page.rl();
            let neighbor = match neighbor_index {
                Some(i) => internal.child(i),
                None => internal.child(1),
            };
            (neighbor, internal.entry_key(k_prime_index))
        };

        let neighbor_keys = {
            let page = self.get_page(neighbor)?;
            let n = page.rl().num_keys();
            n
        };

        // A full neighbor cannot take the separator and the orphaned
        // child, so one entry is rotated through the parent instead.
        if neighbor_keys < ORDER_INT - 1 {
            self.delayed_merge(root, node, parent, neighbor, neighbor_index, k_prime)
        } else {
            self.redistribute(node, parent, neighbor, neighbor_index, k_prime, k_prime_index)
        }
    }

    /// Rotate one key/child pair from a full neighbor into the empty
    /// internal node, moving the separator through the parent.
    fn redistribute(
        &self,
        node: PageNum,
        parent: PageNum,
        neighbor: PageNum,
        neighbor_index: Option<usize>,
        k_prime: i64,
        k_prime_index: usize,
    ) -> SmallResult {
        let stolen_child;

        match neighbor_index {
            Some(_) => {
                // left neighbor: take its last entry
                let stolen_key;
                {
                    let page = self.get_page(neighbor)?;
                    let mut neighbor_node = page.wl();
                    let n = neighbor_node.num_keys();
                    stolen_key = neighbor_node.entry_key(n - 1);
                    stolen_child = neighbor_node.entry_child(n - 1);
                    neighbor_node.set_num_keys(n - 1);
                }
                {
                    let page = self.get_page(parent)?;
                    page.wl().set_entry_key(k_prime_index, stolen_key);
                }
                {
                    let page = self.get_page(node)?;
                    let mut empty_node = page.wl();
                    let old_leftmost = empty_node.leftmost_child();
                    empty_node.set_entry_key(0, k_prime);
                    empty_node.set_entry_child(0, old_leftmost);
                    empty_node.set_leftmost_child(stolen_child);
                    empty_node.set_num_keys(1);
                }
            }
            None => {
                // right neighbor: take its leftmost child and first key
                let stolen_key;
                {
                    let page = self.get_page(neighbor)?;
                    let mut neighbor_node = page.wl();
                    let n = neighbor_node.num_keys();
                    stolen_key = neighbor_node.entry_key(0);
                    stolen_child = neighbor_node.leftmost_child();
                    let promoted = neighbor_node.entry_child(0);
                    neighbor_node.set_leftmost_child(promoted);
                    for i in 0..n - 1 {
                        let k = neighbor_node.entry_key(i + 1);
                        let c = neighbor_node.entry_child(i + 1);
                        neighbor_node.set_entry_key(i, k);
                        neighbor_node.set_entry_child(i, c);
                    }
                    neighbor_node.set_num_keys(n - 1);
                }
                {
                    let page = self.get_page(parent)?;
                    page.wl().set_entry_key(k_prime_index, stolen_key);
                }
                {
                    let page = self.get_page(node)?;
                    let mut empty_node = page.wl();
                    empty_node.set_entry_key(0, k_prime);
                    empty_node.set_entry_child(0, stolen_child);
                    empty_node.set_num_keys(1);
                }
            }
        }

        let page = self.get_page(stolen_child)?;
        page.wl().set_parent(node);

        debug!(
            "table {}: redistributed one entry from {} into {}",
            self.table_id, neighbor, node
        );
        Ok(())
    }

    /// Called after a deletion emptied the root. An internal root promotes
    /// its only child; an empty leaf root leaves the tree empty.
    fn adjust_root(&self, root: PageNum) -> SmallResult {
        let (num_keys, is_leaf, only_child) = {
            let page = self.get_page(root)?;
            let node = page.rl();
            let only_child = if node.is_leaf() {
                0
            } else {
                node.leftmost_child()
            };
            (node.num_keys(), node.is_leaf(), only_child)
        };

        if num_keys > 0 {
            return Ok(());
        }

        let new_root;
        if !is_leaf {
            new_root = only_child;
            let page = self.get_page(new_root)?;
            page.wl().set_parent(0);
        } else {
            new_root = 0;
        }

        debug!("table {}: root {} replaced by {}", self.table_id, root, new_root);
        self.set_root(new_root)?;
        self.free_page(root)
    }
}

// transactional read and update
impl BTreeTable {
    /// Point lookup under a SHARED record lock. Blocks while a conflicting
    /// lock is held; aborts the transaction on deadlock.
    pub fn find_trx(&self, key: i64, tid: TrxId) -> Result<String, SmallError> {
        let (leaf, slot) = self.locate(key)?;
        self.lock_record(leaf, slot, LockMode::Shared, tid)?;

        let page = self.get_page(leaf)?;
        let value = unpack_value(&page.rl().record_value(slot));
        Ok(value)
    }

    /// Overwrite a record's value under an EXCLUSIVE lock, capturing the
    /// prior value for undo first.
    pub fn update_trx(&self, key: i64, value: &[u8], tid: TrxId) -> SmallResult {
        let (leaf, slot) = self.locate(key)?;
        self.lock_record(leaf, slot, LockMode::Exclusive, tid)?;

        let page = self.get_page(leaf)?;
        let mut node = page.wl();
        let old_value = node.record_value(slot);
        Database::lock_manager().push_undo(
            tid,
            UndoRecord {
                table_id: self.table_id,
                pagenum: leaf,
                slot,
                old_value,
            },
        )?;
        node.set_record_value(slot, &pack_value(value));
        Ok(())
    }

    fn lock_record(&self, pagenum: PageNum, slot: usize, mode: LockMode, tid: TrxId) -> SmallResult {
        let lock_manager = Database::lock_manager();
        match lock_manager.acquire_lock(self.table_id, pagenum, slot, mode, tid)? {
            AcquireResult::Success => Ok(()),
            AcquireResult::Conflict => {
                debug!(
                    "trx {} waiting for {:?} lock on ({}, {}, {})",
                    tid, mode, self.table_id, pagenum, slot
                );
                lock_manager.wait_until_granted(tid);
                Ok(())
            }
            AcquireResult::Deadlock => {
                lock_manager.abort_trx(tid)?;
                let err = SmallError::new(
                    ErrorKind::LockDeadlock,
                    &format!("transaction {} aborted by deadlock detection", tid),
                );
                err.show_backtrace();
                Err(err)
            }
        }
    }
}
