pub mod api;
pub mod btree;
pub mod database;
pub mod error;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod utils;

pub use api::{
    begin_trx, close_table, db_delete, db_find, db_insert, db_update, end_trx, init_db,
    join_table, open_table, shutdown_db,
};
pub use database::Database;
pub use error::{ErrorKind, SmallError};
