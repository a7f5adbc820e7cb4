#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use small_bpt::{
    btree::tree::BTreeTable,
    storage::file::FileManager,
    types::{PageNum, TableId},
    utils, Database,
};

// The engine is a process-wide singleton, so tests inside one binary have
// to take turns.
static TEST_LATCH: Mutex<()> = Mutex::new(());

/// Reset the engine and serialize the calling test against the others.
/// Keep the returned guard alive for the whole test.
pub fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LATCH.lock().unwrap_or_else(|e| e.into_inner());
    utils::init_log();
    Database::reset();
    guard
}

/// A unique, initially absent db file path for this test.
pub fn fresh_path(name: &str) -> String {
    let path = std::env::temp_dir().join(format!("small_bpt_it_{}_{}", std::process::id(), name));
    let path = path.to_str().unwrap().to_string();
    FileManager::destroy_file(&path);
    path
}

pub struct TreeSummary {
    pub depth: usize,
    pub leaf_count: u64,
    pub internal_count: u64,
    pub record_count: usize,
}

/// Walk the leaf chain left to right and return all keys in traversal
/// order, asserting strict ascent on the way.
pub fn collect_leaf_keys(table_id: TableId) -> Vec<i64> {
    let table = BTreeTable::new(table_id);
    let mut keys = Vec::new();

    let mut pagenum = table.find_leaf(i64::MIN).unwrap();
    while pagenum != 0 {
        let page = Database::mut_buffer_pool()
            .get_page(table_id, pagenum)
            .unwrap();
        let (page_keys, right) = {
            let node = page.rl();
            assert!(node.is_leaf(), "page {} on the leaf chain is not a leaf", pagenum);
            let page_keys: Vec<i64> = (0..node.num_keys()).map(|i| node.record_key(i)).collect();
            (page_keys, node.right_sibling())
        };
        keys.extend(page_keys);
        pagenum = right;
    }

    for window in keys.windows(2) {
        assert!(window[0] < window[1], "leaf keys out of order: {:?}", window);
    }
    keys
}

/// Check every structural invariant of the tree and return a summary.
///
/// Verified: parent edges, key ordering inside nodes, subtree key ranges,
/// equal leaf depth, and that the sibling chain covers exactly the leaves
/// in left-to-right order.
pub fn check_tree(table_id: TableId) -> TreeSummary {
    let table = BTreeTable::new(table_id);
    let root = table.root().unwrap();

    let mut summary = TreeSummary {
        depth: 0,
        leaf_count: 0,
        internal_count: 0,
        record_count: 0,
    };
    if root == 0 {
        assert!(collect_leaf_keys(table_id).is_empty());
        return summary;
    }

    let mut leaves = Vec::new();
    summary.depth = check_subtree(table_id, root, 0, None, None, &mut leaves, &mut summary);

    // the sibling chain must be exactly the in-order leaves
    let mut chain = Vec::new();
    let mut pagenum = leaves[0];
    let mut seen = HashSet::new();
    while pagenum != 0 {
        assert!(seen.insert(pagenum), "leaf chain contains a cycle at {}", pagenum);
        chain.push(pagenum);
        let page = Database::mut_buffer_pool()
            .get_page(table_id, pagenum)
            .unwrap();
        let right = page.rl().right_sibling();
        pagenum = right;
    }
    assert_eq!(chain, leaves, "sibling chain does not match the in-order leaves");

    summary
}

fn check_subtree(
    table_id: TableId,
    pagenum: PageNum,
    expected_parent: PageNum,
    lower: Option<i64>,
    upper: Option<i64>,
    leaves: &mut Vec<PageNum>,
    summary: &mut TreeSummary,
) -> usize {
    let in_range = |key: i64| {
        lower.map_or(true, |bound| key >= bound) && upper.map_or(true, |bound| key < bound)
    };

    // copy what we need out, so no page stays pinned across the recursion
    let page = Database::mut_buffer_pool()
        .get_page(table_id, pagenum)
        .unwrap();
    let (is_leaf, parent, keys, children) = {
        let node = page.rl();
        let n = node.num_keys();
        if node.is_leaf() {
            let keys: Vec<i64> = (0..n).map(|i| node.record_key(i)).collect();
            (true, node.parent(), keys, Vec::new())
        } else {
            let keys: Vec<i64> = (0..n).map(|i| node.entry_key(i)).collect();
            let children: Vec<PageNum> = (0..=n).map(|i| node.child(i)).collect();
            (false, node.parent(), keys, children)
        }
    };
    drop(page);

    assert_eq!(
        parent, expected_parent,
        "page {} has parent {} instead of {}",
        pagenum, parent, expected_parent
    );
    for window in keys.windows(2) {
        assert!(window[0] < window[1], "page {} keys out of order", pagenum);
    }
    for &key in &keys {
        assert!(in_range(key), "page {} key {} escapes its range", pagenum, key);
    }

    if is_leaf {
        summary.leaf_count += 1;
        summary.record_count += keys.len();
        leaves.push(pagenum);
        return 1;
    }

    summary.internal_count += 1;
    assert!(!keys.is_empty(), "internal page {} has no keys", pagenum);

    let mut depth = 0;
    for (i, &child) in children.iter().enumerate() {
        let child_lower = if i == 0 { lower } else { Some(keys[i - 1]) };
        let child_upper = if i == keys.len() { upper } else { Some(keys[i]) };
        let child_depth =
            check_subtree(table_id, child, pagenum, child_lower, child_upper, leaves, summary);
        if i == 0 {
            depth = child_depth;
        } else {
            assert_eq!(depth, child_depth, "leaves under page {} differ in depth", pagenum);
        }
    }
    depth + 1
}

/// Length of the free list, with a cycle check.
pub fn free_list_len(table_id: TableId) -> u64 {
    let mut seen = HashSet::new();
    let mut len = 0;

    let mut pagenum = {
        let page = Database::mut_buffer_pool().get_page(table_id, 0).unwrap();
        let head = page.rl().free_page_head();
        head
    };
    while pagenum != 0 {
        assert!(seen.insert(pagenum), "free list contains a cycle at {}", pagenum);
        len += 1;
        let page = Database::mut_buffer_pool()
            .get_page(table_id, pagenum)
            .unwrap();
        let next = page.rl().next_free();
        pagenum = next;
    }
    len
}

pub fn total_pages(table_id: TableId) -> u64 {
    let page = Database::mut_buffer_pool().get_page(table_id, 0).unwrap();
    let total = page.rl().total_pages();
    total
}
