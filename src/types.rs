use std::sync::{Arc, RwLock};

use crate::error::SmallError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type SmallResult = Result<(), SmallError>;

/// Table ids are small positive integers handed out by the file manager;
/// 0 is reserved as the invalid id.
pub type TableId = i32;

/// ID of pages, implemented as the byte offset of the page divided by the
/// page size.
pub type PageNum = u64;

/// Transaction ids increase monotonically from 1.
pub type TrxId = u64;
