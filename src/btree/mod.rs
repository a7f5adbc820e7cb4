pub mod buffer_pool;
pub mod join;
pub mod tree;
